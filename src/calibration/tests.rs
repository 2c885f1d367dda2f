use super::abort_monitor::Armed;
use super::*;
use crate::config::{MonitorConfig, SyncConfig};
use crate::error::CalibrationError;
use crate::keychain::Keychain;
use crate::link::{
    AckResult, CMD_PREFLIGHT_REBOOT, CalibrationFlags, CommandAck, InboundMessage, LinkEvent, LinkMonitor,
    Severity,
};
use crate::sim::{SentCommand, SimConfig, SimLink, SimVehicle};
use crate::util::Vec3D;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc},
    time::{Instant, sleep, timeout},
};

struct Rig {
    sim: Arc<SimVehicle>,
    keys: Keychain,
}

impl Rig {
    fn new(config: SimConfig, categories: &[CategoryId]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sim = SimVehicle::new(config, tx);
        let keys = Keychain::new(
            Arc::new(SimLink(Arc::clone(&sim))),
            rx,
            SyncConfig::default(),
            MonitorConfig::default(),
            categories,
        );
        Self { sim, keys }
    }

    fn all() -> Self {
        let cats = [
            CategoryId::Accelerometer,
            CategoryId::Gyroscope,
            CategoryId::Compass,
            CategoryId::Barometer,
            CategoryId::LevelHorizon,
        ];
        Self::new(SimConfig::default(), &cats)
    }

    async fn synced(self) -> Self {
        let outcome = self.keys.store().refresh().await.await.unwrap().unwrap();
        assert!(outcome.complete);
        self
    }
}

async fn next_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    next_event_within(rx, Duration::from_secs(30), pred).await
}

async fn next_event_within<F>(rx: &mut broadcast::Receiver<SessionEvent>, dt: Duration, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    timeout(dt, async {
        loop {
            let ev = rx.recv().await.unwrap();
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .expect("session event not emitted")
}

fn gravity_on(pos: AccelPosition) -> Vec3D<f32> {
    let (axis, positive) = pos.expected_axis();
    Vec3D::unit(axis, positive) * GRAVITY + Vec3D::new(0.05, -0.04, 0.03)
}

fn armed(category: CategoryId, now: Instant) -> Armed {
    Armed { category, run: 1, started: now, last_heartbeat: now, position: None }
}

#[tokio::test(start_paused = true)]
async fn test_condition_priority() {
    let cfg = MonitorConfig::default();
    let t0 = Instant::now();
    let mut state = armed(CategoryId::Accelerometer, t0);
    state.position = Some((1, t0));

    assert_eq!(state.check(&cfg, t0 + Duration::from_secs(4), true), None);

    // Heartbeat and position are both overdue: heartbeat wins.
    let late = t0 + Duration::from_secs(61);
    let (reason, _) = state.check(&cfg, late, false).unwrap();
    assert_eq!(reason, AbortReason::HeartbeatLost);

    state.last_heartbeat = late;
    let (reason, msg) = state.check(&cfg, late, false).unwrap();
    assert_eq!(reason, AbortReason::UserNonCompliance);
    assert!(msg.contains("Position 1"));

    let (reason, _) = state.check(&cfg, late, true).unwrap();
    assert_eq!(reason, AbortReason::UserNonCompliance);

    // Positions only matter for the accelerometer.
    let mut gyro = armed(CategoryId::Gyroscope, t0);
    gyro.position = Some((1, t0));
    gyro.last_heartbeat = late;
    assert_eq!(gyro.check(&cfg, late, true), None);
    assert_eq!(gyro.check(&cfg, late, false).unwrap().0, AbortReason::ConnectionLost);

    let end = t0 + Duration::from_secs(301);
    gyro.last_heartbeat = end;
    assert_eq!(gyro.check(&cfg, end, true).unwrap().0, AbortReason::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_loss_beats_non_compliance() {
    let link = Arc::new(LinkMonitor::new(true));
    let (monitor, mut abort_rx) = AbortMonitor::new(Arc::clone(&link), MonitorConfig::default());
    let t0 = Instant::now();
    monitor.start(CategoryId::Accelerometer).await;
    assert_eq!(monitor.state(), MonitorState::Monitoring);

    sleep(Duration::from_secs(1)).await;
    link.handle(InboundMessage::Heartbeat);
    monitor.set_current_position(1).await;

    let abort = timeout(Duration::from_secs(10), abort_rx.recv()).await.unwrap().unwrap();
    assert_eq!(abort.reason(), AbortReason::HeartbeatLost);
    assert_eq!(abort.category(), CategoryId::Accelerometer);
    assert!(abort.elapsed() > Duration::from_millis(6100));
    assert!(t0.elapsed() < Duration::from_secs(7));
    assert_eq!(monitor.state(), MonitorState::Idle);
    assert_eq!(abort.reason().as_error(), CalibrationError::LinkLost);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_fires_between_ticks() {
    let link = Arc::new(LinkMonitor::new(true));
    let (monitor, mut abort_rx) = AbortMonitor::new(Arc::clone(&link), MonitorConfig::default());
    monitor.start(CategoryId::Gyroscope).await;
    sleep(Duration::from_millis(600)).await;
    link.handle(InboundMessage::ConnectionState(false));

    let abort = timeout(Duration::from_millis(100), abort_rx.recv()).await.unwrap().unwrap();
    assert_eq!(abort.reason(), AbortReason::ConnectionLost);
    assert!(abort.elapsed() < Duration::from_millis(700));
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_trigger_is_one_shot_and_stop_is_final() {
    let link = Arc::new(LinkMonitor::new(true));
    let (monitor, mut abort_rx) = AbortMonitor::new(Arc::clone(&link), MonitorConfig::default());

    assert!(!monitor.trigger_manual_abort(AbortReason::FirmwareFailure, "idle").await);

    monitor.start(CategoryId::Compass).await;
    assert!(monitor.trigger_manual_abort(AbortReason::FirmwareFailure, "Compass failed").await);
    assert!(!monitor.trigger_manual_abort(AbortReason::CommandRejected, "again").await);
    let abort = abort_rx.recv().await.unwrap();
    assert_eq!(abort.message(), "Compass failed");
    assert_eq!(abort.run(), 1);
    assert!(abort_rx.try_recv().is_err());

    monitor.start(CategoryId::Compass).await;
    monitor.stop().await;
    assert_eq!(monitor.state(), MonitorState::Idle);
    sleep(Duration::from_secs(20)).await;
    assert!(!monitor.trigger_manual_abort(AbortReason::UserCancelled, "late").await);
    assert!(matches!(abort_rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_start_requires_connection() {
    let rig = Rig::all();
    rig.sim.set_connected(false);
    let session = rig.keys.session();
    assert_eq!(session.start(CategoryId::Gyroscope).await, Err(CalibrationError::NotConnected));
    assert_eq!(
        session.category(CategoryId::Gyroscope).unwrap().status(),
        CategoryStatus::NotCalibrated
    );
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_category() {
    let rig = Rig::new(SimConfig::default(), &[CategoryId::Gyroscope, CategoryId::Accelerometer]);
    let session = rig.keys.session();
    assert_eq!(
        session.start(CategoryId::Compass).await,
        Err(CalibrationError::UnknownCategory("Compass".to_string()))
    );
    assert!(matches!(session.commit(CategoryId::Barometer).await, Err(CalibrationError::UnknownCategory(_))));
    assert_eq!(session.parse_category("GYRO"), Ok(CategoryId::Gyroscope));
    assert_eq!(
        session.parse_category("airspeed"),
        Err(CalibrationError::UnknownCategory("airspeed".to_string()))
    );
    assert!(session.parse_category("baro").is_err());
    assert_eq!(session.categories().len(), 2);
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_category_at_a_time() {
    let rig = Rig::all();
    let session = rig.keys.session();
    session.start(CategoryId::Gyroscope).await.unwrap();
    assert_eq!(session.active(), Some(CategoryId::Gyroscope));
    assert_eq!(
        session.start(CategoryId::Accelerometer).await,
        Err(CalibrationError::SessionBusy(CategoryId::Gyroscope))
    );
    assert_eq!(
        session.advance(CategoryId::Accelerometer).await,
        Err(CalibrationError::NotActive(CategoryId::Accelerometer))
    );
    session.advance(CategoryId::Gyroscope).await.unwrap();
    assert_eq!(session.active(), None);
    session.start(CategoryId::Accelerometer).await.unwrap();
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_single_shot_category_and_commit() {
    let rig = Rig::all().synced().await;
    let session = rig.keys.session();
    let mut events = session.subscribe();

    session.start(CategoryId::Gyroscope).await.unwrap();
    let gyro = session.category(CategoryId::Gyroscope).unwrap();
    assert_eq!(gyro.status(), CategoryStatus::InProgress);
    assert_eq!(gyro.steps()[0].status(), StepStatus::InProgress);

    session.advance(CategoryId::Gyroscope).await.unwrap();
    next_event(&mut events, |e| *e == SessionEvent::CategoryCompleted(CategoryId::Gyroscope)).await;
    let gyro = session.category(CategoryId::Gyroscope).unwrap();
    assert_eq!(gyro.status(), CategoryStatus::Complete);
    assert!(gyro.steps().iter().all(|s| s.status() == StepStatus::Complete));

    let report = session.commit(CategoryId::Gyroscope).await.unwrap();
    assert_eq!(report.verification, Verification::Verified);
    assert!(!report.reboot_required);

    let sent = rig.sim.sent().await;
    let gyro_flags = CalibrationFlags { gyro: 1, ..CalibrationFlags::CANCEL };
    assert!(sent.contains(&SentCommand::CalibrationStart(gyro_flags)));
    assert!(!sent.contains(&SentCommand::CalibrationCancel));
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_accelerometer_checked_walkthrough() {
    let rig = Rig::all().synced().await;
    let _beat = rig.sim.start_heartbeat();
    let session = rig.keys.session();
    let mut events = session.subscribe();
    let accel = CategoryId::Accelerometer;

    session.start(accel).await.unwrap();
    let prompt = next_event(&mut events, |e| matches!(e, SessionEvent::Instruction { .. })).await;
    assert_eq!(
        prompt,
        SessionEvent::Instruction {
            category: accel,
            position: Some(AccelPosition::Level),
            text: "Place vehicle level and press any key.".to_string(),
        }
    );

    // Upside down while level is requested.
    let wrong = session.advance_checked(accel, &gravity_on(AccelPosition::Back)).await;
    assert_eq!(wrong, Err(CalibrationError::AxisMisaligned));
    let shaking = session.advance_checked(accel, &Vec3D::new(0.0, 0.0, 14.0)).await;
    assert!(matches!(shaking, Err(CalibrationError::MagnitudeOutOfRange(_))));
    assert_eq!(session.category(accel).unwrap().current_step(), Some(0));

    for (i, pos) in [
        AccelPosition::Level,
        AccelPosition::Left,
        AccelPosition::Right,
        AccelPosition::NoseDown,
        AccelPosition::NoseUp,
        AccelPosition::Back,
    ]
    .into_iter()
    .enumerate()
    {
        assert_eq!(session.category(accel).unwrap().current_step(), Some(i));
        session.advance_checked(accel, &gravity_on(pos)).await.unwrap();
    }
    next_event(&mut events, |e| matches!(e, SessionEvent::FirmwareReport { .. })).await;

    let cat = session.category(accel).unwrap();
    assert_eq!(cat.status(), CategoryStatus::Complete);
    let confirms: Vec<u8> = rig
        .sim
        .sent()
        .await
        .into_iter()
        .filter_map(|c| match c {
            SentCommand::PositionConfirm(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(confirms, vec![1, 2, 3, 4, 5, 6]);

    let report = session.commit(accel).await.unwrap();
    assert!(report.verification.is_verified(), "{:?}", report.verification);
    assert!(report.reboot_required);
    let mut link_events = rig.keys.link_mon().subscribe();
    assert!(session.reboot_vehicle().await);
    assert_eq!(rig.sim.sent().await.last(), Some(&SentCommand::Reboot));
    let reboot_ack = CommandAck { command: CMD_PREFLIGHT_REBOOT, result: AckResult::Accepted };
    timeout(Duration::from_secs(1), async {
        while !matches!(link_events.recv().await, Ok(LinkEvent::CommandAck(ack)) if ack == reboot_ack) {}
    })
    .await
    .expect("reboot not acknowledged");
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_abort_marks_error_and_cancels() {
    let rig = Rig::all();
    let session = rig.keys.session();
    let mut events = session.subscribe();
    let accel = CategoryId::Accelerometer;

    session.start(accel).await.unwrap();
    session.advance(accel).await.unwrap();
    session.abort(accel).await.unwrap();

    let cat = session.category(accel).unwrap();
    assert_eq!(cat.status(), CategoryStatus::Error);
    assert_eq!(cat.steps()[0].status(), StepStatus::Complete);
    assert_eq!(cat.steps()[1].status(), StepStatus::Error);
    assert_eq!(cat.steps()[2].status(), StepStatus::NotStarted);
    assert!(rig.sim.sent().await.contains(&SentCommand::CalibrationCancel));
    assert_eq!(session.monitor().state(), MonitorState::Idle);

    let SessionEvent::Aborted(abort) = next_event(&mut events, |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.reason(), AbortReason::UserCancelled);
    assert_eq!(abort.reason().as_error(), CalibrationError::Cancelled);
    assert_eq!(session.abort(accel).await, Err(CalibrationError::NotActive(accel)));
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_aborts_running_calibration() {
    let rig = Rig::all();
    let session = rig.keys.session();
    let mut events = session.subscribe();

    session.start(CategoryId::Compass).await.unwrap();
    rig.sim.set_connected(false);

    let SessionEvent::Aborted(abort) = next_event(&mut events, |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.reason(), AbortReason::ConnectionLost);
    assert_eq!(abort.category(), CategoryId::Compass);
    assert_eq!(session.category(CategoryId::Compass).unwrap().status(), CategoryStatus::Error);
    assert_eq!(session.active(), None);
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_firmware_failure_text_aborts() {
    let rig = Rig::all();
    let session = rig.keys.session();
    let mut events = session.subscribe();

    session.start(CategoryId::Gyroscope).await.unwrap();
    rig.sim.emit_status(Severity::Critical, "Gyro calibration FAILED");

    let SessionEvent::Aborted(abort) = next_event(&mut events, |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.reason(), AbortReason::FirmwareFailure);
    assert_eq!(abort.message(), "Gyro calibration FAILED");
    assert!(rig.sim.sent().await.contains(&SentCommand::CalibrationCancel));
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_start_command_aborts() {
    let config = SimConfig { reject_calibration: true, ..SimConfig::default() };
    let rig = Rig::new(config, &[CategoryId::Barometer]);
    let session = rig.keys.session();
    let mut events = session.subscribe();

    session.start(CategoryId::Barometer).await.unwrap();
    let SessionEvent::Aborted(abort) = next_event(&mut events, |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.reason(), AbortReason::CommandRejected);
    assert_eq!(session.category(CategoryId::Barometer).unwrap().status(), CategoryStatus::Error);
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_commit_with_unanswered_verification_still_completes() {
    let rig = Rig::all().synced().await;
    let session = rig.keys.session();
    session.start(CategoryId::Compass).await.unwrap();
    session.advance(CategoryId::Compass).await.unwrap();

    rig.sim.set_answer_reads(false);
    let report = session.commit(CategoryId::Compass).await.unwrap();
    assert!(!report.verification.is_verified());
    assert!(matches!(report.verification.as_error(), Some(CalibrationError::VerificationFailed(_))));
    assert!(report.reboot_required);

    let compass = session.category(CategoryId::Compass).unwrap();
    assert_eq!(compass.status(), CategoryStatus::Complete);
    assert!(compass.steps().iter().all(|s| s.status() == StepStatus::Complete));
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_commit_reports_out_of_bounds_values() {
    let rig = Rig::all().synced().await;
    let store = rig.keys.store();
    assert!(store.set("AHRS_TRIM_X", 0.5).await);

    let session = rig.keys.session();
    session.start(CategoryId::LevelHorizon).await.unwrap();
    let tilted = session.advance_checked(CategoryId::LevelHorizon, &gravity_on(AccelPosition::NoseUp)).await;
    assert_eq!(tilted, Err(CalibrationError::AxisMisaligned));
    session.advance_checked(CategoryId::LevelHorizon, &gravity_on(AccelPosition::Level)).await.unwrap();

    let report = session.commit(CategoryId::LevelHorizon).await.unwrap();
    let Verification::Failed(why) = report.verification else {
        panic!("out-of-bounds trim accepted");
    };
    assert!(why.contains("AHRS_TRIM_X"));
    assert!(!why.contains("AHRS_TRIM_Y"));
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dispose_silences_session() {
    let rig = Rig::all();
    let session = rig.keys.session();
    let mut events = session.subscribe();
    session.start(CategoryId::Gyroscope).await.unwrap();
    next_event(&mut events, |e| *e == SessionEvent::Started(CategoryId::Gyroscope)).await;

    session.dispose().await;
    assert_eq!(session.monitor().state(), MonitorState::Idle);
    rig.sim.set_connected(false);
    sleep(Duration::from_secs(10)).await;
    assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    assert_eq!(session.start(CategoryId::Gyroscope).await, Err(CalibrationError::Cancelled));
    rig.keys.shutdown().await;
}

const ACCEL_SEQUENCE: [AccelPosition; 6] = [
    AccelPosition::Level,
    AccelPosition::Left,
    AccelPosition::Right,
    AccelPosition::NoseDown,
    AccelPosition::NoseUp,
    AccelPosition::Back,
];

#[tokio::test(start_paused = true)]
async fn test_firmware_failure_after_last_position() {
    let rig = Rig::all().synced().await;
    let _beat = rig.sim.start_heartbeat();
    let session = rig.keys.session();
    let mut events = session.subscribe();
    let accel = CategoryId::Accelerometer;

    session.start(accel).await.unwrap();
    for pos in ACCEL_SEQUENCE {
        session.advance_checked(accel, &gravity_on(pos)).await.unwrap();
    }
    next_event(&mut events, |e| *e == SessionEvent::CategoryCompleted(accel)).await;
    assert_eq!(session.monitor().state(), MonitorState::Idle);
    assert!(!rig.sim.sent().await.contains(&SentCommand::CalibrationCancel));

    // The fit result only arrives once all positions are confirmed.
    rig.sim.emit_status(Severity::Critical, "Calibration FAILED");
    let SessionEvent::Aborted(abort) = next_event(&mut events, |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.reason(), AbortReason::FirmwareFailure);
    assert_eq!(abort.category(), accel);
    assert_eq!(session.category(accel).unwrap().status(), CategoryStatus::Error);
    assert!(rig.sim.sent().await.contains(&SentCommand::CalibrationCancel));
    assert_eq!(session.active(), None);
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stale_abort_ignored_after_restart() {
    let rig = Rig::all().synced().await;
    let _beat = rig.sim.start_heartbeat();
    let session = rig.keys.session();
    let gyro = CategoryId::Gyroscope;

    session.start(gyro).await.unwrap();
    session.advance(gyro).await.unwrap();
    session.commit(gyro).await.unwrap();
    session.start(gyro).await.unwrap();
    let mut events = session.subscribe();

    let stale = AbortEvent::new(AbortReason::FirmwareFailure, "old run".to_string(), gyro, 1, Duration::ZERO);
    session.monitor().report_unsupervised(stale);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(session.active(), Some(gyro));
    assert_eq!(session.monitor().state(), MonitorState::Monitoring);
    assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));

    assert!(session.monitor().trigger_manual_abort(AbortReason::FirmwareFailure, "new run").await);
    let SessionEvent::Aborted(abort) = next_event(&mut events, |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.run(), 2);
    assert_eq!(session.category(gyro).unwrap().status(), CategoryStatus::Error);
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_position_aborts_session() {
    let rig = Rig::all();
    let _beat = rig.sim.start_heartbeat();
    let session = rig.keys.session();
    let mut events = session.subscribe();
    let accel = CategoryId::Accelerometer;

    session.start(accel).await.unwrap();
    sleep(Duration::from_secs(40)).await;
    session.advance(accel).await.unwrap();
    let t1 = Instant::now();

    let SessionEvent::Aborted(abort) =
        next_event_within(&mut events, Duration::from_secs(90), |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.reason(), AbortReason::UserNonCompliance);
    assert!(abort.message().contains("Position 2"));
    assert_eq!(abort.reason().as_error(), CalibrationError::StepComplianceTimeout);
    assert!(t1.elapsed() >= Duration::from_secs(60));
    assert!(t1.elapsed() < Duration::from_secs(62));

    let cat = session.category(accel).unwrap();
    assert_eq!(cat.status(), CategoryStatus::Error);
    assert_eq!(cat.steps()[1].status(), StepStatus::Error);
    assert!(rig.sim.sent().await.contains(&SentCommand::CalibrationCancel));
    rig.keys.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_overlong_calibration_times_out() {
    let rig = Rig::all();
    let _beat = rig.sim.start_heartbeat();
    let session = rig.keys.session();
    let mut events = session.subscribe();
    let t0 = Instant::now();

    session.start(CategoryId::Compass).await.unwrap();
    let SessionEvent::Aborted(abort) =
        next_event_within(&mut events, Duration::from_secs(310), |e| matches!(e, SessionEvent::Aborted(_))).await
    else {
        unreachable!()
    };
    assert_eq!(abort.reason(), AbortReason::Timeout);
    assert_eq!(abort.reason().as_error(), CalibrationError::SessionTimeout);
    assert!(abort.elapsed() > Duration::from_secs(300));
    assert!(t0.elapsed() < Duration::from_secs(302));
    assert_eq!(session.category(CategoryId::Compass).unwrap().status(), CategoryStatus::Error);
    assert!(rig.sim.sent().await.contains(&SentCommand::CalibrationCancel));
    rig.keys.shutdown().await;
}
