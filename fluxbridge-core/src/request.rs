use crate::engine::{EXTENDED_TRACKS, STANDARD_TRACKS};
use crate::format::{Direction, Mode};
use std::path::PathBuf;

/// Everything needed to run one transfer, as entered by the operator.
///
/// The container format is not part of the request; it is derived from the
/// file extension when the request is accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Image to write from, or to create when reading.
    pub path: PathBuf,
    /// Serial port of the drive interface.
    pub port: String,
    pub direction: Direction,
    /// Read back and compare every track after writing it.
    pub verify: bool,
    /// Apply write precompensation.
    pub precompensation: bool,
    /// Read 82 tracks per surface instead of 80.
    pub extended_tracks: bool,
    /// Treat the disk as high density unless the drive can tell otherwise.
    pub high_density: bool,
}

impl TransferRequest {
    fn new(direction: Direction, path: impl Into<PathBuf>, port: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port: port.into(),
            direction,
            verify: true,
            precompensation: false,
            extended_tracks: false,
            high_density: false,
        }
    }

    /// A request to read the disk in the drive into `path`.
    pub fn read(path: impl Into<PathBuf>, port: impl Into<String>) -> Self {
        Self::new(Direction::Read, path, port)
    }

    /// A request to write `path` onto the disk in the drive. Verification is
    /// on by default.
    pub fn write(path: impl Into<PathBuf>, port: impl Into<String>) -> Self {
        Self::new(Direction::Write, path, port)
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_precompensation(mut self, precompensation: bool) -> Self {
        self.precompensation = precompensation;
        self
    }

    pub fn with_extended_tracks(mut self, extended_tracks: bool) -> Self {
        self.extended_tracks = extended_tracks;
        self
    }

    pub fn with_high_density(mut self, high_density: bool) -> Self {
        self.high_density = high_density;
        self
    }

    /// Tracks per surface to read.
    pub fn tracks(&self) -> u8 {
        if self.extended_tracks {
            EXTENDED_TRACKS
        } else {
            STANDARD_TRACKS
        }
    }
}

/// An accepted request, bound to its resolved format. Owned by the worker
/// for the lifetime of the operation.
#[derive(Debug)]
pub(crate) struct Job {
    pub request: TransferRequest,
    pub mode: Mode,
}
