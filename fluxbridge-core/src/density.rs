//! Pre-flight density detection for write operations.
use crate::engine::DiskFormatEngine;
use crate::error::TransferError;
use crate::format::{Direction, Mode};
use crate::transport::FirmwareVersion;
use std::fmt;
use tracing::{debug, info, warn};

/// Oldest firmware that can measure the density of the inserted disk.
pub const DENSITY_DETECTION_FIRMWARE: FirmwareVersion = FirmwareVersion::new(1, 9);

/// Recording density of the medium.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Density {
    /// Double density (DD).
    #[default]
    Double,
    /// High density (HD).
    High,
}

impl Density {
    pub fn from_high(high: bool) -> Self {
        if high { Density::High } else { Density::Double }
    }

    pub fn is_high(self) -> bool {
        self == Density::High
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Density::Double => f.write_str("DD"),
            Density::High => f.write_str("HD"),
        }
    }
}

/// Returns `true` if a transfer with these parameters should probe the disk
/// density before the first track.
pub fn should_detect(direction: Direction, mode: Mode, firmware: FirmwareVersion) -> bool {
    direction == Direction::Write
        && !mode.is_self_describing()
        && firmware.at_least(DENSITY_DETECTION_FIRMWARE)
}

/// Works out the density to use for the transfer.
///
/// When detection does not apply, `requested` is returned untouched.
///
/// # Errors
///
/// Returns [`TransferError::DensityUnknown`] if the engine cannot determine the
/// density of the inserted disk. Nothing has been written at that point.
pub fn advise<E: DiskFormatEngine + ?Sized>(
    engine: &mut E,
    direction: Direction,
    mode: Mode,
    firmware: FirmwareVersion,
    requested: Density,
) -> Result<Density, TransferError> {
    if !should_detect(direction, mode, firmware) {
        debug!(%requested, %firmware, "density detection skipped");
        return Ok(requested);
    }

    match engine.guess_density() {
        Ok(density) => {
            info!(%density, "detected disk density");
            Ok(density)
        }
        Err(status) => {
            warn!(?status, "density detection failed");
            Err(TransferError::DensityUnknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_writes_of_sector_formats_on_new_firmware_detect() {
        let v1_9 = FirmwareVersion::new(1, 9);
        let v1_8 = FirmwareVersion::new(1, 8);
        let v2_0 = FirmwareVersion::new(2, 0);

        assert!(should_detect(Direction::Write, Mode::Adf, v1_9));
        assert!(should_detect(Direction::Write, Mode::Img, v2_0));
        assert!(should_detect(Direction::Write, Mode::St, v1_9));
        assert!(!should_detect(Direction::Write, Mode::Adf, v1_8));
        assert!(!should_detect(Direction::Write, Mode::Scp, v2_0));
        assert!(!should_detect(Direction::Write, Mode::Ipf, v2_0));
        assert!(!should_detect(Direction::Read, Mode::Adf, v2_0));
    }

    #[test]
    fn density_names() {
        assert_eq!(Density::from_high(true).to_string(), "HD");
        assert_eq!(Density::default(), Density::Double);
    }
}
