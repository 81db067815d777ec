//! The callback contract between a disk format engine and the transfer worker.
//!
//! An engine drives the transfer track by track and calls back into the
//! worker, on the worker's own thread, for two kinds of event:
//!
//! - **Progress**: a track was transferred. The worker marks it
//!   [`TrackStatus::Good`] and answers [`EngineResponse::Continue`], or
//!   [`EngineResponse::Abort`] if cancellation was requested.
//! - **Anomaly**: a write failed verification, or a read kept failing its
//!   checksum past [`CHECKSUM_RETRY_THRESHOLD`] attempts. The worker never
//!   resolves these on its own. It asks a [`UserDecisionSource`] and blocks
//!   the engine until the answer comes back.
//!
//! Cancellation is only observed when answering a progress event. A pending
//! anomaly still gets an explicit decision.
use crate::track::{Surface, TrackStatus, TrackStatusBoard};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// Read retries an engine performs on a track before the operator is asked.
pub const CHECKSUM_RETRY_THRESHOLD: u32 = 20;

/// Format-specific counters that accompany a progress event. Engines fill in
/// whatever applies to them and leave the rest at zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    pub retries: u32,
    pub sectors_found: u32,
    pub bad_sectors: u32,
    pub total_sectors: u32,
}

/// A track has been transferred.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub track: usize,
    pub surface: Surface,
    pub counters: ProgressCounters,
}

impl Progress {
    pub fn new(track: usize, surface: Surface) -> Self {
        Self {
            track,
            surface,
            counters: ProgressCounters::default(),
        }
    }

    pub fn with_counters(mut self, counters: ProgressCounters) -> Self {
        self.counters = counters;
        self
    }

    /// `true` once the engine has retried this track more often than the
    /// operator is willing to wait for silently.
    pub fn exceeds_retry_threshold(&self) -> bool {
        self.counters.retries > CHECKSUM_RETRY_THRESHOLD
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnomalyKind {
    /// Data read back after writing did not match the source.
    VerifyMismatch,
    /// Checksum errors or missing sectors persisted across `retries` reads.
    Checksum { retries: u32 },
}

/// A per-track integrity problem that needs an operator decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Anomaly {
    pub track: usize,
    pub surface: Surface,
    pub kind: AnomalyKind,
}

impl Anomaly {
    pub fn verify_mismatch(track: usize, surface: Surface) -> Self {
        Self {
            track,
            surface,
            kind: AnomalyKind::VerifyMismatch,
        }
    }

    pub fn checksum(track: usize, surface: Surface, retries: u32) -> Self {
        Self {
            track,
            surface,
            kind: AnomalyKind::Checksum { retries },
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AnomalyKind::VerifyMismatch => write!(
                f,
                "disk write verify error on track {}, {} side",
                self.track, self.surface
            ),
            AnomalyKind::Checksum { retries } => write!(
                f,
                "track {}, {} side has checksum errors or missing data after {retries} attempts",
                self.track, self.surface
            ),
        }
    }
}

/// How the operator resolved an anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Try the track again.
    Retry,
    /// Move on and record the track as bad.
    SkipAndMarkBad,
    /// Stop the whole transfer.
    Abort,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Retry => f.write_str("retry"),
            Decision::SkipAndMarkBad => f.write_str("skip"),
            Decision::Abort => f.write_str("abort"),
        }
    }
}

/// What the worker tells the engine after a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineResponse {
    Continue,
    Retry,
    SkipBadTrack,
    Abort,
}

impl From<Decision> for EngineResponse {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Retry => EngineResponse::Retry,
            Decision::SkipAndMarkBad => EngineResponse::SkipBadTrack,
            Decision::Abort => EngineResponse::Abort,
        }
    }
}

/// Implemented by the worker and handed to every engine operation.
///
/// Both methods are called synchronously on the worker thread and the engine
/// waits for the answer before touching the drive again.
pub trait TransferCallback {
    fn on_progress(&mut self, progress: &Progress) -> EngineResponse;

    fn on_anomaly(&mut self, anomaly: &Anomaly) -> EngineResponse;
}

/// Where anomaly decisions come from: an interactive prompt, a scripted list
/// in tests, or a fixed policy for unattended runs.
///
/// `decide` is called on the worker thread and may block for as long as it
/// takes a human to answer. It is never called while any state shared with
/// the presentation side is locked.
pub trait UserDecisionSource: Send + Sync {
    fn decide(&self, anomaly: &Anomaly) -> Decision;
}

impl<F> UserDecisionSource for F
where
    F: Fn(&Anomaly) -> Decision + Send + Sync,
{
    fn decide(&self, anomaly: &Anomaly) -> Decision {
        self(anomaly)
    }
}

/// Answers every anomaly the same way.
#[derive(Clone, Copy, Debug)]
pub struct FixedDecision(pub Decision);

impl UserDecisionSource for FixedDecision {
    fn decide(&self, _anomaly: &Anomaly) -> Decision {
        self.0
    }
}

/// Replays a list of decisions in order, then falls back to a default.
/// Every anomaly it is asked about is kept for later inspection.
#[derive(Debug)]
pub struct ScriptedDecisions {
    queue: Mutex<VecDeque<Decision>>,
    fallback: Decision,
    asked: Mutex<Vec<Anomaly>>,
}

impl ScriptedDecisions {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            queue: Mutex::new(decisions.into_iter().collect()),
            fallback: Decision::Abort,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Decision) -> Self {
        self.fallback = fallback;
        self
    }

    /// The anomalies presented so far, oldest first.
    pub fn asked(&self) -> Vec<Anomaly> {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UserDecisionSource for ScriptedDecisions {
    fn decide(&self, anomaly: &Anomaly) -> Decision {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*anomaly);
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

/// The worker's side of the contract: keeps the status board current,
/// forwards anomalies to the decision source and honours cancellation.
pub struct RecoveryProtocol<'a> {
    board: &'a TrackStatusBoard,
    cancel: &'a AtomicBool,
    decisions: &'a dyn UserDecisionSource,
    bad_tracks: usize,
    aborted: bool,
}

impl<'a> RecoveryProtocol<'a> {
    pub fn new(
        board: &'a TrackStatusBoard,
        cancel: &'a AtomicBool,
        decisions: &'a dyn UserDecisionSource,
    ) -> Self {
        Self {
            board,
            cancel,
            decisions,
            bad_tracks: 0,
            aborted: false,
        }
    }

    /// Number of entries accepted as bad during this operation.
    pub fn bad_tracks(&self) -> usize {
        self.bad_tracks
    }

    /// `true` once any callback has answered [`EngineResponse::Abort`].
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    fn abort(&mut self) -> EngineResponse {
        self.aborted = true;
        EngineResponse::Abort
    }

    /// Returns `false` if the entry is outside the board and was not written.
    fn mark(&self, track: usize, surface: Surface, status: TrackStatus) -> bool {
        let written = self.board.set(track, surface, status);
        if !written {
            warn!(track, %surface, "engine reported a track outside the addressable range");
        }
        written
    }
}

impl TransferCallback for RecoveryProtocol<'_> {
    fn on_progress(&mut self, progress: &Progress) -> EngineResponse {
        if self.aborted {
            return EngineResponse::Abort;
        }

        if progress.exceeds_retry_threshold() {
            let anomaly = Anomaly::checksum(
                progress.track,
                progress.surface,
                progress.counters.retries,
            );
            return self.on_anomaly(&anomaly);
        }

        let Progress {
            track,
            surface,
            counters,
        } = *progress;
        trace!(
            track,
            %surface,
            retries = counters.retries,
            sectors_found = counters.sectors_found,
            bad_sectors = counters.bad_sectors,
            total_sectors = counters.total_sectors,
            "track progress"
        );

        // A skipped track keeps its mark even if the engine reports it again.
        if self.board.get(track, surface) != TrackStatus::BadAccepted {
            self.mark(track, surface, TrackStatus::Good);
        }

        if self.cancel.load(Ordering::SeqCst) {
            info!(track, %surface, "cancellation requested, stopping transfer");
            return self.abort();
        }

        EngineResponse::Continue
    }

    fn on_anomaly(&mut self, anomaly: &Anomaly) -> EngineResponse {
        if self.aborted {
            return EngineResponse::Abort;
        }

        warn!(track = anomaly.track, surface = %anomaly.surface, kind = ?anomaly.kind, "track anomaly");
        let decision = self.decisions.decide(anomaly);
        info!(track = anomaly.track, surface = %anomaly.surface, %decision, "anomaly resolved");

        match decision {
            Decision::Retry => EngineResponse::Retry,
            Decision::SkipAndMarkBad => {
                let already_bad =
                    self.board.get(anomaly.track, anomaly.surface) == TrackStatus::BadAccepted;
                if self.mark(anomaly.track, anomaly.surface, TrackStatus::BadAccepted)
                    && !already_bad
                {
                    self.bad_tracks += 1;
                }
                debug!(bad_tracks = self.bad_tracks, "track accepted as bad");
                EngineResponse::SkipBadTrack
            }
            Decision::Abort => self.abort(),
        }
    }
}
