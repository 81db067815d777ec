//! The body of the transfer worker thread.
//!
//! One call to [`run`] is one operation: open the drive, check its firmware,
//! settle the density, run the matching engine operation and turn whatever it
//! returns into a [`ResultCode`]. The drive is closed on every path out.
use crate::density::{self, Density};
use crate::engine::{
    DiskDrive, DiskFormatEngine, DriveConnector, EngineStatus, ReadOptions, SCP_REVOLUTIONS,
    SectorLayout, WriteOptions,
};
use crate::error::{ConfigError, FormatProblem, ResultCode, TransferError};
use crate::format::{Direction, Mode};
use crate::recovery::{RecoveryProtocol, UserDecisionSource};
use crate::request::{Job, TransferRequest};
use crate::track::TrackStatusBoard;
use crate::transport::{DeviceTransport, FirmwareVersion, OpenSession};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tracing::{info, info_span, warn};

/// Oldest firmware that can capture flux (SCP) from a disk.
const SCP_READ_FIRMWARE: FirmwareVersion = FirmwareVersion::new(1, 8);

/// Oldest firmware with the improved read timings.
const RECOMMENDED_READ_FIRMWARE: FirmwareVersion = FirmwareVersion::new(1, 8);

/// Shared state the worker needs, borrowed from the controller.
pub(crate) struct WorkerContext<'a> {
    pub board: &'a TrackStatusBoard,
    pub cancel: &'a AtomicBool,
    pub connector: &'a dyn DriveConnector,
    pub decisions: &'a dyn UserDecisionSource,
}

pub(crate) fn run(job: Job, ctx: &WorkerContext<'_>) -> ResultCode {
    let Job { request, mode } = job;
    let span = info_span!(
        "transfer",
        direction = %request.direction,
        %mode,
        path = %request.path.display(),
        port = %request.port,
    );
    let _entered = span.enter();

    info!("transfer started");
    let result = transfer(&request, mode, ctx);

    if request.direction == Direction::Read && result.is_user_abort() {
        discard_partial_image(&request.path);
    }

    match &result {
        ResultCode::Success => info!("transfer complete"),
        ResultCode::SuccessWithErrors { bad_tracks } => {
            warn!(bad_tracks, "transfer complete with bad tracks")
        }
        ResultCode::Failed(e) => warn!(error = %e, "transfer failed"),
    }
    result
}

fn transfer(request: &TransferRequest, mode: Mode, ctx: &WorkerContext<'_>) -> ResultCode {
    // Normally caught when the request is accepted.
    if request.direction == Direction::Read && !mode.is_readable() {
        return TransferError::from(ConfigError::UnsupportedFormat {
            path: request.path.clone(),
            direction: request.direction,
        })
        .into();
    }

    let mut drive = match OpenSession::open(ctx.connector.connect(), &request.port) {
        Ok(drive) => drive,
        Err(e) => return TransferError::DeviceOpen { detail: e.detail }.into(),
    };

    let firmware = drive.firmware_version();
    info!(%firmware, "drive interface opened");

    if let Err(e) = check_firmware(request.direction, mode, firmware) {
        return e.into();
    }

    if request.direction == Direction::Write && !mode.is_self_describing() && !request.verify {
        warn!("writing without verify is not recommended");
    }

    let requested = Density::from_high(request.high_density);
    let density = match density::advise(&mut *drive, request.direction, mode, firmware, requested)
    {
        Ok(density) => density,
        Err(e) => return e.into(),
    };
    let detected = density::should_detect(request.direction, mode, firmware).then_some(density);

    let mut protocol = RecoveryProtocol::new(ctx.board, ctx.cancel, ctx.decisions);
    let status = dispatch(&mut *drive, request, mode, density, &mut protocol);

    classify(status, request, mode, firmware, detected, &protocol)
}

/// Firmware requirements the worker enforces before handing over to an
/// engine. Engines may still refuse on their own.
fn check_firmware(
    direction: Direction,
    mode: Mode,
    firmware: FirmwareVersion,
) -> Result<(), TransferError> {
    if direction != Direction::Read || firmware.at_least(RECOMMENDED_READ_FIRMWARE) {
        return Ok(());
    }

    if mode == Mode::Scp && !firmware.at_least(SCP_READ_FIRMWARE) {
        return Err(TransferError::FirmwareTooOld {
            found: firmware,
            required: Some(SCP_READ_FIRMWARE),
        });
    }

    warn!(
        %firmware,
        recommended = %RECOMMENDED_READ_FIRMWARE,
        "firmware update strongly recommended, newer versions read old disks better"
    );
    Ok(())
}

fn dispatch(
    drive: &mut dyn DiskDrive,
    request: &TransferRequest,
    mode: Mode,
    density: Density,
    protocol: &mut RecoveryProtocol<'_>,
) -> EngineStatus {
    let path = request.path.as_path();
    let write = WriteOptions {
        density,
        verify: request.verify,
        precompensation: request.precompensation,
    };
    let read = ReadOptions {
        density,
        tracks: request.tracks(),
    };

    match (request.direction, mode) {
        (Direction::Write, Mode::Adf) => drive.write_adf(path, &write, protocol),
        (Direction::Write, Mode::Img) => {
            drive.write_sector_image(path, SectorLayout::Ibm, &write, protocol)
        }
        (Direction::Write, Mode::St) => {
            drive.write_sector_image(path, SectorLayout::AtariSt, &write, protocol)
        }
        (Direction::Write, Mode::Scp) => drive.write_scp(path, protocol),
        (Direction::Write, Mode::Ipf) => drive.write_ipf(path, protocol),
        (Direction::Read, Mode::Adf) => drive.read_adf(path, &read, protocol),
        (Direction::Read, Mode::Scp) => drive.read_scp(path, &read, SCP_REVOLUTIONS, protocol),
        (Direction::Read, Mode::Img) => {
            drive.read_sector_image(path, SectorLayout::Ibm, density, protocol)
        }
        (Direction::Read, Mode::St) => {
            drive.read_sector_image(path, SectorLayout::AtariSt, density, protocol)
        }
        (Direction::Read, Mode::Ipf) => EngineStatus::FileError,
    }
}

fn classify(
    status: EngineStatus,
    request: &TransferRequest,
    mode: Mode,
    firmware: FirmwareVersion,
    detected: Option<Density>,
    protocol: &RecoveryProtocol<'_>,
) -> ResultCode {
    let reading = request.direction == Direction::Read;
    let file_error = |action| TransferError::File {
        path: request.path.clone(),
        action,
    };

    let error = match status {
        EngineStatus::Complete | EngineStatus::CompletedWithErrors if protocol.aborted() => {
            TransferError::UserAbort
        }
        // Only tracks actually marked on the board make a completion partial.
        EngineStatus::Complete | EngineStatus::CompletedWithErrors => {
            return match protocol.bad_tracks() {
                0 => ResultCode::Success,
                bad_tracks => ResultCode::SuccessWithErrors { bad_tracks },
            };
        }
        EngineStatus::Aborted => TransferError::UserAbort,
        EngineStatus::FileError if reading => file_error("creating"),
        EngineStatus::FileError => file_error("opening"),
        EngineStatus::FileIoError if reading => file_error("writing"),
        EngineStatus::FileIoError => file_error("reading"),
        EngineStatus::BadScpFile => TransferError::Format(FormatProblem::BadScpFile),
        EngineStatus::ExtendedAdfNotSupported => {
            TransferError::Format(FormatProblem::ExtendedAdfNotSupported)
        }
        EngineStatus::MediaSizeMismatch => {
            TransferError::Format(FormatProblem::MediaSizeMismatch { mode, detected })
        }
        EngineStatus::IpfLibraryMissing => TransferError::Format(FormatProblem::IpfLibraryMissing),
        EngineStatus::FirmwareTooOld => TransferError::FirmwareTooOld {
            found: firmware,
            required: None,
        },
        EngineStatus::DriveError(detail) => TransferError::Device { detail },
        EngineStatus::WriteProtected => TransferError::WriteProtected,
    };
    ResultCode::Failed(error)
}

fn discard_partial_image(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed partial image"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "unable to remove partial image"),
    }
}
