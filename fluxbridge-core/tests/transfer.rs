use fluxbridge_core::controller::{OperationState, TransferController};
use fluxbridge_core::density::Density;
use fluxbridge_core::engine::{EngineStatus, SectorLayout};
use fluxbridge_core::error::{ConfigError, FormatProblem, ResultCode, StartError, TransferError};
use fluxbridge_core::format::{Direction, Mode};
use fluxbridge_core::recovery::{
    Anomaly, CHECKSUM_RETRY_THRESHOLD, Decision, FixedDecision, ScriptedDecisions,
    UserDecisionSource,
};
use fluxbridge_core::request::TransferRequest;
use fluxbridge_core::sim::{DriveEvent, SimOperation, SimulatedDrive};
use fluxbridge_core::track::{ENTRY_COUNT, Surface, TrackStatus};
use fluxbridge_core::transport::FirmwareVersion;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const PORT: &str = "/dev/ttyUSB0";

fn controller(sim: &SimulatedDrive, decisions: Arc<dyn UserDecisionSource>) -> TransferController {
    TransferController::new(Arc::new(sim.clone()), decisions)
}

fn abort_on_anomaly() -> Arc<dyn UserDecisionSource> {
    Arc::new(FixedDecision(Decision::Abort))
}

fn image(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, vec![0u8; 4096]).unwrap();
    path
}

fn finish(controller: &TransferController) -> ResultCode {
    controller.wait().expect("operation should have completed")
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn ran_operation(sim: &SimulatedDrive) -> bool {
    sim.journal()
        .iter()
        .any(|e| matches!(e, DriveEvent::Operation(_)))
}

#[test]
fn writing_an_adf_marks_every_track_good() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "test.adf");
    let sim = SimulatedDrive::new().with_write_tracks(83);
    let controller = controller(&sim, abort_on_anomaly());

    let mode = controller.start(TransferRequest::write(&source, PORT)).unwrap();
    assert_eq!(mode, Mode::Adf);

    assert_eq!(finish(&controller), ResultCode::Success);
    assert!(controller.snapshot().all(TrackStatus::Good));

    let journal = sim.journal();
    assert_eq!(journal.first(), Some(&DriveEvent::Open { port: PORT.into() }));
    assert!(journal.contains(&DriveEvent::DensityProbe));
    assert!(journal.contains(&DriveEvent::Operation(SimOperation::WriteAdf)));
    assert_eq!(journal.last(), Some(&DriveEvent::Closed));
}

#[test]
fn engine_firmware_refusal_leaves_the_board_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("test.img");
    let sim = SimulatedDrive::new()
        .with_firmware(1, 7)
        .with_min_read_firmware(1, 8);
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::read(&target, PORT)).unwrap();

    assert_eq!(
        finish(&controller),
        ResultCode::Failed(TransferError::FirmwareTooOld {
            found: FirmwareVersion::new(1, 7),
            required: None,
        })
    );
    assert!(controller.snapshot().all(TrackStatus::Untouched));
    assert!(
        sim.journal()
            .contains(&DriveEvent::Operation(SimOperation::ReadSectors(SectorLayout::Ibm)))
    );
    assert_eq!(sim.journal().last(), Some(&DriveEvent::Closed));
}

#[test]
fn scp_reads_are_gated_before_the_engine_runs() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("flux.scp");
    let sim = SimulatedDrive::new().with_firmware(1, 7);
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::read(&target, PORT)).unwrap();

    assert_eq!(
        finish(&controller),
        ResultCode::Failed(TransferError::FirmwareTooOld {
            found: FirmwareVersion::new(1, 7),
            required: Some(FirmwareVersion::new(1, 8)),
        })
    );
    assert!(!ran_operation(&sim));
    assert!(controller.snapshot().all(TrackStatus::Untouched));
    assert!(!target.exists());
}

#[test]
fn skipping_a_checksum_anomaly_marks_the_track_bad_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("test.img");
    let sim = SimulatedDrive::new().with_fault(5, Surface::Lower, 1);
    let decisions = Arc::new(ScriptedDecisions::new([Decision::SkipAndMarkBad]));
    let controller = controller(&sim, decisions.clone());

    controller.start(TransferRequest::read(&target, PORT)).unwrap();

    assert_eq!(
        finish(&controller),
        ResultCode::SuccessWithErrors { bad_tracks: 1 }
    );
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.get(5, Surface::Lower), TrackStatus::BadAccepted);
    assert_eq!(snapshot.get(5, Surface::Upper), TrackStatus::Good);
    assert_eq!(snapshot.get(6, Surface::Upper), TrackStatus::Good);
    assert_eq!(snapshot.count(TrackStatus::Good), 159);
    assert_eq!(
        decisions.asked(),
        [Anomaly::checksum(5, Surface::Lower, CHECKSUM_RETRY_THRESHOLD + 1)]
    );
    assert!(target.exists());
}

#[test]
fn retrying_an_anomaly_gets_the_track_through() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "dos.ima");
    let sim = SimulatedDrive::new().with_fault(2, Surface::Lower, 2);
    let decisions = Arc::new(ScriptedDecisions::new([Decision::Retry, Decision::Retry]));
    let controller = controller(&sim, decisions.clone());

    assert_eq!(
        controller.start(TransferRequest::write(&source, PORT)).unwrap(),
        Mode::Img
    );

    assert_eq!(finish(&controller), ResultCode::Success);
    assert_eq!(decisions.asked().len(), 2);
    assert_eq!(controller.snapshot().get(2, Surface::Lower), TrackStatus::Good);
}

#[test]
fn aborting_an_anomaly_stops_all_track_activity() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "test.st");
    let sim = SimulatedDrive::new().with_fault(10, Surface::Upper, 1);
    let controller = controller(&sim, Arc::new(ScriptedDecisions::new([Decision::Abort])));

    controller.start(TransferRequest::write(&source, PORT)).unwrap();

    assert_eq!(finish(&controller), ResultCode::Failed(TransferError::UserAbort));

    let journal = sim.journal();
    let anomaly_at = journal
        .iter()
        .position(|e| matches!(e, DriveEvent::Anomaly(_)))
        .unwrap();
    assert!(
        journal[anomaly_at..]
            .iter()
            .all(|e| !matches!(e, DriveEvent::Progress { .. }))
    );

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.get(10, Surface::Upper), TrackStatus::Untouched);
    assert_eq!(snapshot.count(TrackStatus::Good), 20);
}

#[test]
fn aborted_reads_remove_the_partial_image() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("partial.adf");
    let sim = SimulatedDrive::new().with_fault(40, Surface::Upper, 1);
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::read(&target, PORT)).unwrap();

    assert!(finish(&controller).is_user_abort());
    assert!(!target.exists());
    assert_eq!(controller.snapshot().count(TrackStatus::Good), 80);
}

#[test]
fn unsupported_extension_is_rejected_synchronously() {
    let sim = SimulatedDrive::new();
    let controller = controller(&sim, abort_on_anomaly());

    let err = controller
        .start(TransferRequest::write("test.xyz", PORT))
        .unwrap_err();

    assert!(matches!(
        err,
        StartError::Config(ConfigError::UnsupportedFormat {
            direction: Direction::Write,
            ..
        })
    ));
    assert_eq!(controller.state(), OperationState::Idle);
    assert!(sim.journal().is_empty());
}

#[test]
fn ipf_cannot_be_read() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedDrive::new();
    let controller = controller(&sim, abort_on_anomaly());

    let err = controller
        .start(TransferRequest::read(dir.path().join("game.ipf"), PORT))
        .unwrap_err();
    assert!(matches!(err, StartError::Config(ConfigError::UnsupportedFormat { .. })));
    assert_eq!(controller.state(), OperationState::Idle);
}

#[test]
fn missing_write_source_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sim = SimulatedDrive::new();
    let controller = controller(&sim, abort_on_anomaly());

    let err = controller
        .start(TransferRequest::write(dir.path().join("gone.adf"), PORT))
        .unwrap_err();
    assert!(matches!(err, StartError::Config(ConfigError::MissingFile { .. })));
    assert_eq!(controller.state(), OperationState::Idle);
    assert!(sim.journal().is_empty());
}

#[test]
fn a_second_start_while_running_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "first.adf");
    let other = image(&dir, "second.adf");
    let sim = SimulatedDrive::new().with_track_delay(Duration::from_millis(2));
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::write(&source, PORT)).unwrap();
    assert_eq!(controller.state(), OperationState::Running);

    assert_eq!(
        controller.start(TransferRequest::write(&other, PORT)),
        Err(StartError::AlreadyRunning)
    );
    assert_eq!(controller.state(), OperationState::Running);

    assert_eq!(finish(&controller), ResultCode::Success);
    let opens = sim
        .journal()
        .iter()
        .filter(|e| matches!(e, DriveEvent::Open { .. }))
        .count();
    assert_eq!(opens, 1);
}

#[test]
fn cancellation_finishes_the_current_track_then_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "long.adf");
    let sim = SimulatedDrive::new().with_track_delay(Duration::from_millis(5));
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::write(&source, PORT)).unwrap();
    assert!(wait_until(|| controller.snapshot().processed() >= 4));

    controller.request_cancel();
    let result = finish(&controller);

    assert_eq!(result, ResultCode::Failed(TransferError::UserAbort));
    let done = controller.snapshot().processed();
    assert!(done >= 4, "tracks done before the request are kept, got {done}");
    assert!(done < 160);
    assert_eq!(sim.journal().last(), Some(&DriveEvent::Closed));
}

#[test]
fn polling_stays_responsive_while_a_decision_is_pending() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("slow.adf");
    let sim = SimulatedDrive::new().with_fault(1, Surface::Upper, 1);

    let asked = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<Decision>();
    let decisions: Arc<dyn UserDecisionSource> = {
        let asked = asked.clone();
        let rx = Mutex::new(rx);
        Arc::new(move |_: &Anomaly| {
            asked.store(true, Ordering::SeqCst);
            rx.lock().unwrap().recv().unwrap_or(Decision::Abort)
        })
    };
    let controller = controller(&sim, decisions);

    controller.start(TransferRequest::read(&target, PORT)).unwrap();
    assert!(wait_until(|| asked.load(Ordering::SeqCst)));

    // The worker is parked in the decision source; polling must not block.
    for _ in 0..10 {
        assert_eq!(controller.state(), OperationState::Running);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.get(0, Surface::Lower), TrackStatus::Good);
        assert_eq!(snapshot.get(1, Surface::Upper), TrackStatus::Untouched);
    }

    // Cancellation does not resolve the anomaly on the operator's behalf.
    controller.request_cancel();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(controller.state(), OperationState::Running);

    tx.send(Decision::SkipAndMarkBad).unwrap();
    let result = finish(&controller);

    // The skip is honoured, then the pending cancellation stops the read.
    assert!(result.is_user_abort());
    assert_eq!(controller.snapshot().get(1, Surface::Upper), TrackStatus::BadAccepted);
    assert!(!target.exists());
}

#[test]
fn failed_density_detection_aborts_before_any_track() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "test.adf");
    let sim = SimulatedDrive::new().with_firmware(1, 9).with_density(None);
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::write(&source, PORT)).unwrap();

    assert_eq!(finish(&controller), ResultCode::Failed(TransferError::DensityUnknown));
    assert!(controller.snapshot().all(TrackStatus::Untouched));
    assert!(sim.journal().contains(&DriveEvent::DensityProbe));
    assert!(!ran_operation(&sim));
}

#[test]
fn density_detection_is_skipped_for_old_firmware_and_flux_images() {
    let dir = tempfile::tempdir().unwrap();
    let adf = image(&dir, "old.adf");
    let scp = image(&dir, "flux.scp");

    let old = SimulatedDrive::new().with_firmware(1, 8).with_density(None);
    let old_controller = controller(&old, abort_on_anomaly());
    old_controller.start(TransferRequest::write(&adf, PORT)).unwrap();
    assert_eq!(finish(&old_controller), ResultCode::Success);
    assert!(!old.journal().contains(&DriveEvent::DensityProbe));

    let new = SimulatedDrive::new().with_firmware(2, 0).with_density(None);
    let controller = controller(&new, abort_on_anomaly());
    controller.start(TransferRequest::write(&scp, PORT)).unwrap();
    assert_eq!(finish(&controller), ResultCode::Success);
    assert!(!new.journal().contains(&DriveEvent::DensityProbe));
    assert!(new.journal().contains(&DriveEvent::Operation(SimOperation::WriteScp)));
}

#[test]
fn open_failure_reports_the_transport_detail() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "test.adf");
    let sim = SimulatedDrive::new().with_open_error("port busy");
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::write(&source, PORT)).unwrap();

    assert_eq!(
        finish(&controller),
        ResultCode::Failed(TransferError::DeviceOpen {
            detail: "port busy".into()
        })
    );
    assert!(!sim.journal().contains(&DriveEvent::Closed));
    assert!(controller.snapshot().all(TrackStatus::Untouched));
}

#[test]
fn write_protected_disks_fail_before_any_track() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "game.ipf");
    let sim = SimulatedDrive::new().with_write_protect();
    let controller = controller(&sim, abort_on_anomaly());

    assert_eq!(
        controller.start(TransferRequest::write(&source, PORT)).unwrap(),
        Mode::Ipf
    );
    assert_eq!(finish(&controller), ResultCode::Failed(TransferError::WriteProtected));
    assert!(controller.snapshot().all(TrackStatus::Untouched));
}

#[test]
fn completion_with_errors_but_no_bad_tracks_is_a_success() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "x.adf");
    let sim = SimulatedDrive::new().with_status(EngineStatus::CompletedWithErrors);
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::write(&source, PORT)).unwrap();

    assert_eq!(finish(&controller), ResultCode::Success);
    assert_eq!(controller.snapshot().count(TrackStatus::BadAccepted), 0);
}

#[test]
fn media_mismatch_reports_the_detected_density() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "dd.adf");
    let sim = SimulatedDrive::new()
        .with_density(Some(Density::High))
        .with_status(EngineStatus::MediaSizeMismatch);
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::write(&source, PORT)).unwrap();

    assert_eq!(
        finish(&controller),
        ResultCode::Failed(TransferError::Format(FormatProblem::MediaSizeMismatch {
            mode: Mode::Adf,
            detected: Some(Density::High),
        }))
    );
}

#[test]
fn each_start_resets_the_board() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("extended.adf");
    let source = image(&dir, "plain.adf");
    let sim = SimulatedDrive::new();
    let controller = controller(&sim, abort_on_anomaly());

    controller
        .start(TransferRequest::read(&target, PORT).with_extended_tracks(true))
        .unwrap();
    assert_eq!(finish(&controller), ResultCode::Success);
    assert_eq!(controller.snapshot().get(81, Surface::Lower), TrackStatus::Good);
    assert_eq!(controller.snapshot().processed(), 164);

    controller.start(TransferRequest::write(&source, PORT)).unwrap();
    assert_eq!(finish(&controller), ResultCode::Success);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.get(81, Surface::Lower), TrackStatus::Untouched);
    assert_eq!(snapshot.processed(), 160);
    assert_eq!(snapshot.entries().len(), ENTRY_COUNT);
}

#[test]
fn acknowledge_returns_to_idle() {
    let dir = tempfile::tempdir().unwrap();
    let source = image(&dir, "ack.adf");
    let sim = SimulatedDrive::new();
    let controller = controller(&sim, abort_on_anomaly());

    assert_eq!(controller.acknowledge(), None);
    controller.start(TransferRequest::write(&source, PORT)).unwrap();
    controller.join();

    assert_eq!(controller.state(), OperationState::Completed(ResultCode::Success));
    assert_eq!(controller.acknowledge(), Some(ResultCode::Success));
    assert_eq!(controller.state(), OperationState::Idle);
    assert_eq!(controller.wait(), None);
}

#[test]
fn missing_source_for_the_engine_is_a_file_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("folder.adf");
    std::fs::create_dir(&source).unwrap();
    let sim = SimulatedDrive::new();
    let controller = controller(&sim, abort_on_anomaly());

    controller.start(TransferRequest::write(&source, PORT)).unwrap();

    assert_eq!(
        finish(&controller),
        ResultCode::Failed(TransferError::File {
            path: source.clone(),
            action: "opening",
        })
    );
    assert!(Path::new(&source).is_dir());
}
