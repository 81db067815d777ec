//! A programmable, in-process drive.
//!
//! [`SimulatedDrive`] implements both the transport and the format engine
//! boundaries without any hardware. It walks the tracks of each operation,
//! reports progress through the worker's callback, raises anomalies where it
//! has been told to, and keeps a journal of everything that happened so
//! callers can check the order of events afterwards.
//!
//! Read operations create the target file and fill it with blank track data,
//! so the effects of a completed or aborted read are visible on disk.
//!
//! ```rust
//! use fluxbridge_core::sim::SimulatedDrive;
//! use fluxbridge_core::track::Surface;
//! use std::time::Duration;
//!
//! let drive = SimulatedDrive::new()
//!     .with_firmware(1, 9)
//!     .with_track_delay(Duration::from_millis(5))
//!     .with_fault(12, Surface::Lower, 2);
//! ```
use crate::density::Density;
use crate::engine::{
    DiskDrive, DiskFormatEngine, DriveConnector, EngineStatus, ReadOptions, STANDARD_TRACKS,
    SectorLayout, WriteOptions,
};
use crate::recovery::{
    Anomaly, CHECKSUM_RETRY_THRESHOLD, EngineResponse, Progress, ProgressCounters,
    TransferCallback,
};
use crate::track::Surface;
use crate::transport::{DeviceTransport, FirmwareVersion, TransportError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

const SECTOR_SIZE: usize = 512;

/// Something the simulated drive did, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriveEvent {
    Open { port: String },
    Closed,
    DensityProbe,
    Operation(SimOperation),
    Progress { track: usize, surface: Surface },
    Anomaly(Anomaly),
}

/// Which engine operation was invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimOperation {
    WriteAdf,
    WriteSectors(SectorLayout),
    WriteScp,
    WriteIpf,
    ReadAdf,
    ReadScp,
    ReadSectors(SectorLayout),
}

impl SimOperation {
    fn is_read(self) -> bool {
        matches!(
            self,
            SimOperation::ReadAdf | SimOperation::ReadScp | SimOperation::ReadSectors(_)
        )
    }
}

#[derive(Clone, Copy, Debug)]
struct Fault {
    track: usize,
    surface: Surface,
    failures: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FaultMode {
    Off,
    Verify,
    Checksum,
}

#[derive(Clone, Debug)]
struct SimConfig {
    open_error: Option<String>,
    firmware: FirmwareVersion,
    density: Option<Density>,
    write_tracks: usize,
    track_delay: Duration,
    faults: Vec<Fault>,
    min_read_firmware: Option<FirmwareVersion>,
    forced_status: Option<EngineStatus>,
    write_protected: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            open_error: None,
            firmware: FirmwareVersion::new(1, 9),
            density: Some(Density::Double),
            write_tracks: usize::from(STANDARD_TRACKS),
            track_delay: Duration::ZERO,
            faults: Vec::new(),
            min_read_firmware: None,
            forced_status: None,
            write_protected: false,
        }
    }
}

/// A simulated drive interface. Clones share configuration and journal, so
/// a clone kept by a test sees everything the worker's copy did.
#[derive(Clone, Debug, Default)]
pub struct SimulatedDrive {
    config: Arc<SimConfig>,
    journal: Arc<Mutex<Vec<DriveEvent>>>,
    opened: bool,
}

impl SimulatedDrive {
    /// A healthy DD drive on firmware 1.9 that writes 80 tracks per surface.
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, f: impl FnOnce(&mut SimConfig)) -> Self {
        f(Arc::make_mut(&mut self.config));
        self
    }

    pub fn with_firmware(self, major: u8, minor: u8) -> Self {
        self.configure(|c| c.firmware = FirmwareVersion::new(major, minor))
    }

    /// Makes opening the port fail with `detail`.
    pub fn with_open_error(self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        self.configure(|c| c.open_error = Some(detail))
    }

    /// Sets the result of density detection; `None` makes it fail.
    pub fn with_density(self, density: Option<Density>) -> Self {
        self.configure(|c| c.density = density)
    }

    /// Tracks per surface covered by write operations.
    pub fn with_write_tracks(self, tracks: usize) -> Self {
        self.configure(|c| c.write_tracks = tracks)
    }

    /// Time spent on every track.
    pub fn with_track_delay(self, delay: Duration) -> Self {
        self.configure(|c| c.track_delay = delay)
    }

    /// Makes `track` on `surface` fail `failures` times before it succeeds.
    /// Writes report a verify mismatch (only when verifying), reads a
    /// checksum failure past the retry threshold.
    pub fn with_fault(self, track: usize, surface: Surface, failures: u32) -> Self {
        self.configure(|c| {
            c.faults.push(Fault {
                track,
                surface,
                failures,
            })
        })
    }

    /// Read operations refuse to run on firmware older than `major.minor`.
    pub fn with_min_read_firmware(self, major: u8, minor: u8) -> Self {
        self.configure(|c| c.min_read_firmware = Some(FirmwareVersion::new(major, minor)))
    }

    /// Every engine operation returns `status` before touching a track.
    pub fn with_status(self, status: EngineStatus) -> Self {
        self.configure(|c| c.forced_status = Some(status))
    }

    pub fn with_write_protect(self) -> Self {
        self.configure(|c| c.write_protected = true)
    }

    /// Everything recorded so far, across all connections.
    pub fn journal(&self) -> Vec<DriveEvent> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: DriveEvent) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn preflight(&mut self, op: SimOperation) -> Option<EngineStatus> {
        self.record(DriveEvent::Operation(op));

        if !self.opened {
            return Some(EngineStatus::DriveError("port is not open".into()));
        }
        if let Some(status) = &self.config.forced_status {
            return Some(status.clone());
        }
        if op.is_read() {
            if let Some(min) = self.config.min_read_firmware {
                if !self.config.firmware.at_least(min) {
                    return Some(EngineStatus::FirmwareTooOld);
                }
            }
        } else if self.config.write_protected {
            return Some(EngineStatus::WriteProtected);
        }
        None
    }

    fn write_op(
        &mut self,
        op: SimOperation,
        source: &Path,
        faults: FaultMode,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        if let Some(status) = self.preflight(op) {
            return status;
        }
        if !source.is_file() {
            return EngineStatus::FileError;
        }
        let tracks = self.config.write_tracks;
        self.run_tracks(tracks, faults, None, 0, callback)
    }

    fn read_op(
        &mut self,
        op: SimOperation,
        target: &Path,
        tracks: usize,
        sectors: u32,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        if let Some(status) = self.preflight(op) {
            return status;
        }
        let file = match File::create(target) {
            Ok(file) => file,
            Err(_) => return EngineStatus::FileError,
        };
        let mut sink = BufWriter::new(file);
        let status = self.run_tracks(
            tracks,
            FaultMode::Checksum,
            Some(&mut sink as &mut dyn Write),
            sectors,
            callback,
        );
        if sink.flush().is_err() {
            return EngineStatus::FileIoError;
        }
        status
    }

    fn run_tracks(
        &mut self,
        tracks: usize,
        faults: FaultMode,
        mut sink: Option<&mut dyn Write>,
        sectors: u32,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        let mut pending: HashMap<(usize, Surface), u32> = match faults {
            FaultMode::Off => HashMap::new(),
            _ => self
                .config
                .faults
                .iter()
                .map(|f| ((f.track, f.surface), f.failures))
                .collect(),
        };
        let blank = vec![0u8; sectors as usize * SECTOR_SIZE];
        let mut had_errors = false;

        for track in 0..tracks {
            for surface in Surface::ALL {
                loop {
                    if !self.config.track_delay.is_zero() {
                        thread::sleep(self.config.track_delay);
                    }

                    if let Some(remaining) = pending.get_mut(&(track, surface)).filter(|n| **n > 0)
                    {
                        let anomaly = match faults {
                            FaultMode::Checksum => {
                                Anomaly::checksum(track, surface, CHECKSUM_RETRY_THRESHOLD + 1)
                            }
                            _ => Anomaly::verify_mismatch(track, surface),
                        };
                        self.record(DriveEvent::Anomaly(anomaly));
                        match callback.on_anomaly(&anomaly) {
                            EngineResponse::Retry | EngineResponse::Continue => {
                                *remaining -= 1;
                                continue;
                            }
                            EngineResponse::SkipBadTrack => {
                                had_errors = true;
                                break;
                            }
                            EngineResponse::Abort => return EngineStatus::Aborted,
                        }
                    }

                    if let Some(sink) = sink.as_mut() {
                        if sink.write_all(&blank).is_err() {
                            return EngineStatus::FileIoError;
                        }
                    }

                    self.record(DriveEvent::Progress { track, surface });
                    let progress = Progress::new(track, surface).with_counters(ProgressCounters {
                        retries: 0,
                        sectors_found: sectors,
                        bad_sectors: 0,
                        total_sectors: sectors,
                    });
                    match callback.on_progress(&progress) {
                        EngineResponse::Abort => return EngineStatus::Aborted,
                        _ => break,
                    }
                }
            }
        }

        if had_errors {
            EngineStatus::CompletedWithErrors
        } else {
            EngineStatus::Complete
        }
    }
}

fn sectors_per_track(layout: Option<SectorLayout>, density: Density) -> u32 {
    let dd = match layout {
        None => 11,
        Some(SectorLayout::Ibm) | Some(SectorLayout::AtariSt) => 9,
    };
    if density.is_high() { dd * 2 } else { dd }
}

impl DeviceTransport for SimulatedDrive {
    fn open(&mut self, port: &str) -> Result<(), TransportError> {
        self.record(DriveEvent::Open {
            port: port.to_string(),
        });
        if let Some(detail) = &self.config.open_error {
            return Err(TransportError::new(detail.clone()));
        }
        self.opened = true;
        Ok(())
    }

    fn firmware_version(&mut self) -> FirmwareVersion {
        self.config.firmware
    }

    fn close(&mut self) {
        self.opened = false;
        self.record(DriveEvent::Closed);
    }
}

impl DiskFormatEngine for SimulatedDrive {
    fn guess_density(&mut self) -> Result<Density, EngineStatus> {
        self.record(DriveEvent::DensityProbe);
        self.config
            .density
            .ok_or_else(|| EngineStatus::DriveError("unable to measure disk density".into()))
    }

    fn write_adf(
        &mut self,
        source: &Path,
        options: &WriteOptions,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        let faults = if options.verify { FaultMode::Verify } else { FaultMode::Off };
        self.write_op(SimOperation::WriteAdf, source, faults, callback)
    }

    fn write_sector_image(
        &mut self,
        source: &Path,
        layout: SectorLayout,
        options: &WriteOptions,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        let faults = if options.verify { FaultMode::Verify } else { FaultMode::Off };
        self.write_op(SimOperation::WriteSectors(layout), source, faults, callback)
    }

    fn write_scp(&mut self, source: &Path, callback: &mut dyn TransferCallback) -> EngineStatus {
        self.write_op(SimOperation::WriteScp, source, FaultMode::Off, callback)
    }

    fn write_ipf(&mut self, source: &Path, callback: &mut dyn TransferCallback) -> EngineStatus {
        self.write_op(SimOperation::WriteIpf, source, FaultMode::Verify, callback)
    }

    fn read_adf(
        &mut self,
        target: &Path,
        options: &ReadOptions,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        let sectors = sectors_per_track(None, options.density);
        self.read_op(
            SimOperation::ReadAdf,
            target,
            usize::from(options.tracks),
            sectors,
            callback,
        )
    }

    fn read_scp(
        &mut self,
        target: &Path,
        options: &ReadOptions,
        revolutions: u8,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        let sectors = sectors_per_track(None, options.density) * u32::from(revolutions);
        self.read_op(
            SimOperation::ReadScp,
            target,
            usize::from(options.tracks),
            sectors,
            callback,
        )
    }

    fn read_sector_image(
        &mut self,
        target: &Path,
        layout: SectorLayout,
        density: Density,
        callback: &mut dyn TransferCallback,
    ) -> EngineStatus {
        let sectors = sectors_per_track(Some(layout), density);
        self.read_op(
            SimOperation::ReadSectors(layout),
            target,
            usize::from(STANDARD_TRACKS),
            sectors,
            callback,
        )
    }
}

impl DriveConnector for SimulatedDrive {
    fn connect(&self) -> Box<dyn DiskDrive> {
        Box::new(SimulatedDrive {
            config: Arc::clone(&self.config),
            journal: Arc::clone(&self.journal),
            opened: false,
        })
    }
}
