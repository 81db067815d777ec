//! Result codes and error types for transfer operations.
//!
//! - [`ConfigError`] covers requests that can be rejected before any hardware
//!   is touched.
//! - [`StartError`] is what [`crate::controller::TransferController::start`]
//!   returns when it refuses a request.
//! - [`TransferError`] is the failure half of a finished operation's
//!   [`ResultCode`].
use crate::density::Density;
use crate::format::{Direction, Mode};
use crate::transport::FirmwareVersion;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A request that cannot be turned into an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no image file was given")]
    EmptyPath,
    #[error("'{}' is not a supported {direction} format", path.display())]
    UnsupportedFormat { path: PathBuf, direction: Direction },
    #[error("image file '{}' does not exist", path.display())]
    MissingFile { path: PathBuf },
}

/// Why a [`crate::controller::TransferController::start`] call was refused.
///
/// A refused start never disturbs an operation that is already running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("another transfer is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unable to start the transfer worker: {detail}")]
    Spawn { detail: String },
}

/// A container the engine could not handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatProblem {
    /// Bad, invalid or unsupported SCP file.
    BadScpFile,
    /// Extended ADF files are not supported.
    ExtendedAdfNotSupported,
    /// The image does not match the medium in the drive. `detected` is the
    /// density the drive reported, when known.
    MediaSizeMismatch { mode: Mode, detected: Option<Density> },
    /// IPF writing needs an external support library that is not installed.
    IpfLibraryMissing,
}

impl fmt::Display for FormatProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatProblem::BadScpFile => f.write_str("bad, invalid or unsupported SCP file"),
            FormatProblem::ExtendedAdfNotSupported => {
                f.write_str("extended ADF files are not supported")
            }
            FormatProblem::MediaSizeMismatch { mode, detected } => match (mode, detected) {
                (Mode::Scp | Mode::Ipf, _) => {
                    write!(f, "{mode} writing is only supported for DD disks and images")
                }
                (_, Some(Density::High)) => {
                    f.write_str("disk in drive was detected as HD, but a DD image was supplied")
                }
                (_, Some(Density::Double)) => {
                    f.write_str("disk in drive was detected as DD, but an HD image was supplied")
                }
                (_, None) => f.write_str("image size does not match the disk in the drive"),
            },
            FormatProblem::IpfLibraryMissing => {
                f.write_str("the IPF support library is not available")
            }
        }
    }
}

/// How a transfer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("unable to open the drive interface: {detail}")]
    DeviceOpen { detail: String },
    #[error("error communicating with the drive interface: {detail}")]
    Device { detail: String },
    #[error("{}", firmware_message(*found, *required))]
    FirmwareTooOld {
        found: FirmwareVersion,
        required: Option<FirmwareVersion>,
    },
    #[error("unable to work out the density of the disk inserted")]
    DensityUnknown,
    #[error("{0}")]
    Format(FormatProblem),
    #[error("disk is write protected")]
    WriteProtected,
    #[error("error {action} '{}'", path.display())]
    File { path: PathBuf, action: &'static str },
    #[error("transfer aborted")]
    UserAbort,
    #[error("transfer worker stopped unexpectedly")]
    WorkerPanicked,
}

fn firmware_message(found: FirmwareVersion, required: Option<FirmwareVersion>) -> String {
    match required {
        Some(required) => format!(
            "this operation requires firmware V{required} or newer (drive reports V{found})"
        ),
        None => format!("firmware V{found} is too old for this operation, upgrade it first"),
    }
}

/// The terminal outcome of one transfer. Produced exactly once per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    /// Completed, but at least one track was accepted as bad.
    SuccessWithErrors { bad_tracks: usize },
    Failed(TransferError),
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        !matches!(self, ResultCode::Failed(_))
    }

    pub fn is_user_abort(&self) -> bool {
        matches!(self, ResultCode::Failed(TransferError::UserAbort))
    }

    pub fn error(&self) -> Option<&TransferError> {
        match self {
            ResultCode::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransferError> for ResultCode {
    fn from(e: TransferError) -> Self {
        ResultCode::Failed(e)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Success => f.write_str("completed successfully"),
            ResultCode::SuccessWithErrors { bad_tracks: 1 } => {
                f.write_str("completed with 1 bad track")
            }
            ResultCode::SuccessWithErrors { bad_tracks } => {
                write!(f, "completed with {bad_tracks} bad tracks")
            }
            ResultCode::Failed(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_message_names_required_version() {
        let e = TransferError::FirmwareTooOld {
            found: FirmwareVersion::new(1, 7),
            required: Some(FirmwareVersion::new(1, 8)),
        };
        assert_eq!(
            e.to_string(),
            "this operation requires firmware V1.8 or newer (drive reports V1.7)"
        );
    }

    #[test]
    fn media_mismatch_message_depends_on_density() {
        let hd = FormatProblem::MediaSizeMismatch {
            mode: Mode::Adf,
            detected: Some(Density::High),
        };
        assert!(hd.to_string().contains("detected as HD"));

        let scp = FormatProblem::MediaSizeMismatch {
            mode: Mode::Scp,
            detected: None,
        };
        assert!(scp.to_string().starts_with("SCP writing"));
    }

    #[test]
    fn result_code_helpers() {
        assert!(ResultCode::Success.is_success());
        assert!(ResultCode::SuccessWithErrors { bad_tracks: 2 }.is_success());
        let abort = ResultCode::from(TransferError::UserAbort);
        assert!(abort.is_user_abort());
        assert!(!abort.is_success());
        assert_eq!(abort.error(), Some(&TransferError::UserAbort));
    }

    #[test]
    fn unsupported_format_message_names_direction() {
        let e = ConfigError::UnsupportedFormat {
            path: PathBuf::from("game.ipf"),
            direction: Direction::Read,
        };
        assert_eq!(e.to_string(), "'game.ipf' is not a supported read format");
    }
}
