//! The boundary to the disk format engines.
//!
//! An engine knows how to turn one container format into track data and back.
//! The transfer worker picks the operation matching the request's direction
//! and format, passes its [`TransferCallback`], and classifies the
//! [`EngineStatus`] the engine returns.
use crate::density::Density;
use crate::recovery::TransferCallback;
use crate::transport::DeviceTransport;
use std::path::Path;

/// Number of tracks read per surface by default.
pub const STANDARD_TRACKS: u8 = 80;

/// Number of tracks read per surface with extended track count enabled.
pub const EXTENDED_TRACKS: u8 = 82;

/// Revolutions captured per track when reading flux.
pub const SCP_REVOLUTIONS: u8 = 3;

/// Final status of an engine operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Complete,
    CompletedWithErrors,
    Aborted,
    /// The image file could not be opened or created.
    FileError,
    /// Reading or writing the image file failed part way.
    FileIoError,
    BadScpFile,
    ExtendedAdfNotSupported,
    MediaSizeMismatch,
    FirmwareTooOld,
    IpfLibraryMissing,
    /// Communication with the drive interface failed.
    DriveError(String),
    WriteProtected,
}

/// Sector layout for plain sector images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectorLayout {
    /// IBM PC layout (`.img` / `.ima`).
    Ibm,
    /// Atari ST layout.
    AtariSt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    pub density: Density,
    pub verify: bool,
    pub precompensation: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadOptions {
    pub density: Density,
    pub tracks: u8,
}

/// One operation per (direction, format) pair. Every operation reports
/// through `callback` and returns exactly one status.
pub trait DiskFormatEngine {
    /// Measures the density of the inserted disk.
    fn guess_density(&mut self) -> Result<Density, EngineStatus>;

    fn write_adf(
        &mut self,
        source: &Path,
        options: &WriteOptions,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus;

    fn write_sector_image(
        &mut self,
        source: &Path,
        layout: SectorLayout,
        options: &WriteOptions,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus;

    fn write_scp(&mut self, source: &Path, callback: &mut dyn TransferCallback) -> EngineStatus;

    fn write_ipf(&mut self, source: &Path, callback: &mut dyn TransferCallback) -> EngineStatus;

    fn read_adf(
        &mut self,
        target: &Path,
        options: &ReadOptions,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus;

    fn read_scp(
        &mut self,
        target: &Path,
        options: &ReadOptions,
        revolutions: u8,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus;

    fn read_sector_image(
        &mut self,
        target: &Path,
        layout: SectorLayout,
        density: Density,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus;
}

/// A drive interface together with the engines that run on it.
pub trait DiskDrive: DeviceTransport + DiskFormatEngine {}

impl<T: DeviceTransport + DiskFormatEngine> DiskDrive for T {}

/// Produces a fresh, unopened drive for each transfer.
pub trait DriveConnector: Send + Sync {
    fn connect(&self) -> Box<dyn DiskDrive>;
}

impl<F> DriveConnector for F
where
    F: Fn() -> Box<dyn DiskDrive> + Send + Sync,
{
    fn connect(&self) -> Box<dyn DiskDrive> {
        self()
    }
}
