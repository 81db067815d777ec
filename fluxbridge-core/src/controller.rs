//! Owns the lifecycle of transfer operations.
//!
//! A [`TransferController`] is a cheap, cloneable handle. The presentation
//! side keeps one clone to start, cancel and poll; the worker thread holds
//! another for as long as it runs. At most one operation runs at a time.
use crate::engine::DriveConnector;
use crate::error::{ConfigError, ResultCode, StartError, TransferError};
use crate::format::{self, Direction, Mode};
use crate::recovery::UserDecisionSource;
use crate::request::{Job, TransferRequest};
use crate::track::{TrackSnapshot, TrackStatusBoard};
use crate::worker::{self, WorkerContext};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Where the controller is in an operation's lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Running,
    Completed(ResultCode),
}

struct Shared {
    state: Mutex<OperationState>,
    board: TrackStatusBoard,
    cancel: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    connector: Arc<dyn DriveConnector>,
    decisions: Arc<dyn UserDecisionSource>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn run_worker(&self, job: Job) {
        let ctx = WorkerContext {
            board: &self.board,
            cancel: &self.cancel,
            connector: self.connector.as_ref(),
            decisions: self.decisions.as_ref(),
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| worker::run(job, &ctx)))
            .unwrap_or_else(|_| {
                error!("transfer worker panicked");
                ResultCode::Failed(TransferError::WorkerPanicked)
            });
        *self.lock_state() = OperationState::Completed(result);
    }
}

/// Starts transfers on a background worker and exposes their progress.
#[derive(Clone)]
pub struct TransferController {
    shared: Arc<Shared>,
}

impl TransferController {
    /// Creates an idle controller.
    ///
    /// `connector` supplies a fresh drive for each operation. `decisions`
    /// answers anomalies and is called from the worker thread; it may block
    /// for as long as it needs to.
    pub fn new(
        connector: Arc<dyn DriveConnector>,
        decisions: Arc<dyn UserDecisionSource>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(OperationState::Idle),
                board: TrackStatusBoard::new(),
                cancel: AtomicBool::new(false),
                worker: Mutex::new(None),
                connector,
                decisions,
            }),
        }
    }

    /// Validates `request` and, if it is acceptable, starts it on a new
    /// worker thread. Returns as soon as the worker is running, with the
    /// container format that was selected.
    ///
    /// # Errors
    ///
    /// - [`StartError::AlreadyRunning`] if an operation is in progress. That
    ///   operation is not affected.
    /// - [`StartError::Config`] if the file extension is not supported for the
    ///   requested direction, or a write source does not exist.
    /// - [`StartError::Spawn`] if the worker thread cannot be created.
    ///
    /// A start refused as busy or misconfigured leaves the state, the status
    /// board and the previous result untouched.
    pub fn start(&self, request: TransferRequest) -> Result<Mode, StartError> {
        let mut state = self.shared.lock_state();
        if *state == OperationState::Running {
            return Err(StartError::AlreadyRunning);
        }

        let mode = format::resolve(&request.path, request.direction)?;
        if request.direction == Direction::Write && !request.path.exists() {
            return Err(ConfigError::MissingFile {
                path: request.path.clone(),
            }
            .into());
        }

        // The previous worker has already published its result.
        if let Some(previous) = self.shared.take_worker() {
            let _ = previous.join();
        }

        self.shared.board.reset();
        self.shared.cancel.store(false, Ordering::SeqCst);
        let previous_state = std::mem::replace(&mut *state, OperationState::Running);

        info!(
            direction = %request.direction,
            %mode,
            path = %request.path.display(),
            "transfer accepted"
        );

        let shared = Arc::clone(&self.shared);
        let job = Job { request, mode };
        let spawned = thread::Builder::new()
            .name("transfer-worker".into())
            .spawn(move || shared.run_worker(job));

        match spawned {
            Ok(handle) => {
                *self
                    .shared
                    .worker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(mode)
            }
            Err(e) => {
                *state = previous_state;
                Err(StartError::Spawn {
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Asks the running operation to stop. The worker notices the next time a
    /// track completes; device calls already in flight are not interrupted.
    pub fn request_cancel(&self) {
        if self.is_running() {
            debug!("cancellation requested");
        }
        self.shared.cancel.store(true, Ordering::SeqCst);
    }

    /// Blocks until the current worker, if any, has exited.
    ///
    /// Call this before process shutdown so the drive is closed cleanly.
    pub fn join(&self) {
        if let Some(handle) = self.shared.take_worker() {
            if handle.join().is_err() {
                error!("transfer worker terminated abnormally");
            }
        }
    }

    /// Joins the worker and returns the result of the last operation, if one
    /// has completed and not been acknowledged.
    pub fn wait(&self) -> Option<ResultCode> {
        self.join();
        match self.state() {
            OperationState::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// Clears a completed operation, returning its result. The controller is
    /// idle afterwards. Does nothing while an operation is running.
    pub fn acknowledge(&self) -> Option<ResultCode> {
        let mut state = self.shared.lock_state();
        if !matches!(*state, OperationState::Completed(_)) {
            return None;
        }
        match std::mem::replace(&mut *state, OperationState::Idle) {
            OperationState::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn state(&self) -> OperationState {
        self.shared.lock_state().clone()
    }

    pub fn is_running(&self) -> bool {
        *self.shared.lock_state() == OperationState::Running
    }

    /// A copy of the per-track status board. Never blocks on the worker.
    pub fn snapshot(&self) -> TrackSnapshot {
        self.shared.board.snapshot()
    }
}
