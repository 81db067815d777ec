//! The core, UI-agnostic transfer engine for the `fluxbridge` floppy utility.
//!
//! `fluxbridge-core` is designed to be used as a library by any front-end,
//! whether it's a command-line interface (like `fluxbridge`) or a graphical
//! user interface. It runs one disk operation at a time on a background
//! worker, keeps a per-track status board the front-end can poll, and routes
//! data-integrity anomalies to the operator for a retry, skip or abort
//! decision.
//!
//! The library is structured into several key modules:
//! - [`controller`]: The [`controller::TransferController`] that starts,
//!   cancels and joins operations.
//! - [`format`]: Maps image file extensions to container formats.
//! - [`track`]: The concurrently readable per-track status board.
//! - [`recovery`]: The callback contract between format engines and the
//!   worker, and the sources of operator decisions.
//! - [`density`]: Pre-flight density detection for writes.
//! - [`transport`] and [`engine`]: The boundaries to the drive interface and
//!   the per-format engines, which live outside this crate.
//! - [`sim`]: A programmable simulated drive.
//! - [`platform`]: Discovery of serial ports a drive interface may be on.
//!
//! Front-ends never block on the worker: they poll
//! [`controller::TransferController::state`] and
//! [`controller::TransferController::snapshot`] at their own pace. The only
//! place the worker itself waits is inside a
//! [`recovery::UserDecisionSource`], while an anomaly is shown to the
//! operator.
//!
//! ## Example: Reading a Disk with Progress Reporting
//!
//! ```rust,no_run
//! use fluxbridge_core::controller::{OperationState, TransferController};
//! use fluxbridge_core::recovery::{Decision, FixedDecision};
//! use fluxbridge_core::request::TransferRequest;
//! use fluxbridge_core::sim::SimulatedDrive;
//! use fluxbridge_core::track::TrackStatus;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> anyhow::Result<()> {
//!     // Any `DriveConnector` works here; the simulator needs no hardware.
//!     let controller = TransferController::new(
//!         Arc::new(SimulatedDrive::new()),
//!         Arc::new(FixedDecision(Decision::SkipAndMarkBad)),
//!     );
//!
//!     controller.start(TransferRequest::read("backup.adf", "/dev/ttyUSB0"))?;
//!
//!     // A real app would redraw a track map here.
//!     while controller.is_running() {
//!         let snapshot = controller.snapshot();
//!         println!("{} tracks done", snapshot.count(TrackStatus::Good));
//!         std::thread::sleep(Duration::from_millis(100));
//!     }
//!
//!     if let Some(result) = controller.wait() {
//!         println!("Read {result}.");
//!     }
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod density;
pub mod device;
pub mod engine;
pub mod error;
pub mod format;
pub mod platform;
pub mod recovery;
pub mod request;
pub mod sim;
pub mod track;
pub mod transport;
mod worker;

pub use controller::{OperationState, TransferController};
pub use error::{ResultCode, StartError, TransferError};
pub use request::TransferRequest;
