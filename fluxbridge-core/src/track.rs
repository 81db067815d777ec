//! Per-track outcome record shared between the worker and any number of
//! readers.
//!
//! The board covers a fixed address space of [`TRACK_COUNT`] tracks on each of
//! the two surfaces, whatever the geometry of the disk being transferred.
//! Entries that a transfer never reaches simply stay [`TrackStatus::Untouched`].
//!
//! Each entry is stored in its own atomic cell, so a [`TrackStatusBoard::snapshot`]
//! taken while the worker is writing sees every entry either fully before or
//! fully after the write. No lock is involved, which means readers can poll at
//! any rate and a worker blocked on an operator decision holds nothing they need.
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Number of addressable tracks per surface.
pub const TRACK_COUNT: usize = 83;

/// Number of entries on the board: every track on both surfaces.
pub const ENTRY_COUNT: usize = TRACK_COUNT * 2;

/// One side of the disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Surface {
    Upper,
    Lower,
}

impl Surface {
    pub const ALL: [Surface; 2] = [Surface::Upper, Surface::Lower];

    fn offset(self) -> usize {
        match self {
            Surface::Upper => 0,
            Surface::Lower => 1,
        }
    }
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::Upper => f.write_str("upper"),
            Surface::Lower => f.write_str("lower"),
        }
    }
}

/// Outcome of a single track on a single surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackStatus {
    /// Not reached by the current operation.
    #[default]
    Untouched = 0,
    /// Transferred successfully.
    Good = 1,
    /// The operator chose to skip this track despite an anomaly.
    BadAccepted = 2,
}

impl TrackStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => TrackStatus::Good,
            2 => TrackStatus::BadAccepted,
            _ => TrackStatus::Untouched,
        }
    }
}

fn index(track: usize, surface: Surface) -> Option<usize> {
    (track < TRACK_COUNT).then(|| track * 2 + surface.offset())
}

/// The live status board.
///
/// Writes are reserved to the crate: only the active transfer worker updates
/// entries. Presentation code reads it through [`TrackStatusBoard::snapshot`].
pub struct TrackStatusBoard {
    cells: [AtomicU8; ENTRY_COUNT],
}

impl TrackStatusBoard {
    pub fn new() -> Self {
        Self {
            cells: std::array::from_fn(|_| AtomicU8::new(TrackStatus::Untouched as u8)),
        }
    }

    /// Returns every entry to [`TrackStatus::Untouched`].
    pub(crate) fn reset(&self) {
        for cell in &self.cells {
            cell.store(TrackStatus::Untouched as u8, Ordering::Release);
        }
    }

    /// Records `status` for one entry. Returns `false` if `track` is outside
    /// the addressable range, in which case nothing is written.
    pub(crate) fn set(&self, track: usize, surface: Surface, status: TrackStatus) -> bool {
        match index(track, surface) {
            Some(i) => {
                self.cells[i].store(status as u8, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Reads a single entry. Out-of-range tracks read as untouched.
    pub fn get(&self, track: usize, surface: Surface) -> TrackStatus {
        index(track, surface)
            .map(|i| TrackStatus::from_raw(self.cells[i].load(Ordering::Acquire)))
            .unwrap_or_default()
    }

    /// Takes an ordered copy of all entries. Safe to call from any thread at
    /// any time.
    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            entries: std::array::from_fn(|i| {
                TrackStatus::from_raw(self.cells[i].load(Ordering::Acquire))
            }),
        }
    }
}

impl Default for TrackStatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackStatusBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackStatusBoard")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// A point-in-time copy of the board, ordered by track then surface
/// (upper before lower).
#[derive(Clone, PartialEq, Eq)]
pub struct TrackSnapshot {
    entries: [TrackStatus; ENTRY_COUNT],
}

impl TrackSnapshot {
    pub fn get(&self, track: usize, surface: Surface) -> TrackStatus {
        index(track, surface)
            .map(|i| self.entries[i])
            .unwrap_or_default()
    }

    /// All entries in board order.
    pub fn entries(&self) -> &[TrackStatus; ENTRY_COUNT] {
        &self.entries
    }

    /// Iterates `(track, surface, status)` in board order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Surface, TrackStatus)> + '_ {
        (0..TRACK_COUNT).flat_map(move |track| {
            Surface::ALL
                .into_iter()
                .map(move |surface| (track, surface, self.get(track, surface)))
        })
    }

    pub fn count(&self, status: TrackStatus) -> usize {
        self.entries.iter().filter(|s| **s == status).count()
    }

    /// Entries that have been reached, whether good or accepted as bad.
    pub fn processed(&self) -> usize {
        ENTRY_COUNT - self.count(TrackStatus::Untouched)
    }

    pub fn all(&self, status: TrackStatus) -> bool {
        self.entries.iter().all(|s| *s == status)
    }
}

impl Default for TrackSnapshot {
    fn default() -> Self {
        Self {
            entries: [TrackStatus::Untouched; ENTRY_COUNT],
        }
    }
}

impl fmt::Debug for TrackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSnapshot")
            .field("good", &self.count(TrackStatus::Good))
            .field("bad_accepted", &self.count(TrackStatus::BadAccepted))
            .field("untouched", &self.count(TrackStatus::Untouched))
            .finish()
    }
}
