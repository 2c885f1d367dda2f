use super::{
    abort_event::{AbortEvent, AbortReason},
    abort_monitor::AbortMonitor,
    category::{CalibrationCategory, CategoryId, CategoryStatus},
    orientation::{AccelPosition, validate},
    status_text::{StatusClass, classify},
    verification::{Verification, verify},
};
use crate::config::MonitorConfig;
use crate::error::CalibrationError;
use crate::link::{CMD_PREFLIGHT_CALIBRATION, FlightLink, LinkEvent, LinkMonitor};
use crate::parameters::ParameterStore;
use crate::util::Vec3D;
use crate::{cal, event, info, log, warn};
use serde::Serialize;
use std::{
    str::FromStr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    sync::{Mutex, broadcast, mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// Result of committing a calibration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReport {
    pub category: CategoryId,
    /// Outcome of the read-back check. A failure never blocks the commit.
    pub verification: Verification,
    /// The firmware only applies the new values after a reboot.
    pub reboot_required: bool,
}

/// Notifications of a [`CalibrationSession`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    Started(CategoryId),
    /// The step with index `step` became the active one.
    StepAdvanced { category: CategoryId, step: usize },
    /// All steps are done; the category awaits its commit.
    CategoryCompleted(CategoryId),
    Progress { category: CategoryId, percent: u8 },
    /// The firmware asks the user to move the vehicle.
    Instruction { category: CategoryId, position: Option<AccelPosition>, text: String },
    /// The firmware reported a successful calibration.
    FirmwareReport { category: CategoryId, text: String },
    Aborted(AbortEvent),
    Committed(CommitReport),
}

struct Active {
    category: CategoryId,
    run: u64,
    started: Instant,
}

/// Firmware feedback of one run. It outlives [`Active`] until the commit.
struct Telemetry {
    category: CategoryId,
    run: u64,
    handle: JoinHandle<()>,
    c_tok: CancellationToken,
}

/// Everything guarded by the session lock.
struct SessionState {
    categories: Vec<CalibrationCategory>,
    active: Option<Active>,
    telemetry: Option<Telemetry>,
}

impl SessionState {
    fn category_mut(&mut self, id: CategoryId) -> Option<&mut CalibrationCategory> {
        self.categories.iter_mut().find(|c| c.id() == id)
    }

    fn is_active(&self, id: CategoryId) -> bool {
        self.active.as_ref().is_some_and(|a| a.category == id)
    }

    /// The running calibration, or the completed one still awaiting its commit.
    fn current_run(&self) -> Option<(CategoryId, u64)> {
        self.active
            .as_ref()
            .map(|a| (a.category, a.run))
            .or_else(|| self.telemetry.as_ref().map(|t| (t.category, t.run)))
    }
}

/// Orchestrates the calibration procedures of one vehicle.
///
/// At most one category runs at a time. While it runs, the [`AbortMonitor`] supervises
/// link and user, and a telemetry task turns firmware status texts into
/// [`SessionEvent`]s or aborts. Every abort, whether triggered by the monitor or by
/// the caller, cancels the calibration on the vehicle and marks the category as failed.
pub struct CalibrationSession {
    link: Arc<dyn FlightLink>,
    link_monitor: Arc<LinkMonitor>,
    store: Arc<ParameterStore>,
    monitor: Arc<AbortMonitor>,
    state: Mutex<SessionState>,
    snapshot: watch::Sender<Vec<CalibrationCategory>>,
    events: broadcast::Sender<SessionEvent>,
    disposed: AtomicBool,
    c_tok: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl CalibrationSession {
    const EVENT_BUFFER: usize = 64;

    /// Creates a session for `categories` and spawns its abort listener.
    pub fn new(
        link: Arc<dyn FlightLink>,
        link_monitor: Arc<LinkMonitor>,
        store: Arc<ParameterStore>,
        config: MonitorConfig,
        categories: &[CategoryId],
    ) -> Arc<Self> {
        let (monitor, abort_rx) = AbortMonitor::new(Arc::clone(&link_monitor), config);
        let mut table: Vec<CalibrationCategory> = Vec::new();
        for id in categories {
            if table.iter().all(|c| c.id() != *id) {
                table.push(CalibrationCategory::new(*id));
            }
        }
        let c_tok = CancellationToken::new();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let listener = tokio::spawn(Self::listen(weak.clone(), abort_rx, c_tok.clone()));
            Self {
                link,
                link_monitor,
                store,
                monitor,
                snapshot: watch::Sender::new(table.clone()),
                state: Mutex::new(SessionState { categories: table, active: None, telemetry: None }),
                events: broadcast::Sender::new(Self::EVENT_BUFFER),
                disposed: AtomicBool::new(false),
                c_tok,
                listener: Mutex::new(Some(listener)),
            }
        })
    }

    /// Consumes abort events until the session is disposed or dropped.
    async fn listen(
        session: Weak<Self>,
        mut abort_rx: mpsc::UnboundedReceiver<AbortEvent>,
        c_tok: CancellationToken,
    ) {
        loop {
            let abort = tokio::select! {
                biased;
                () = c_tok.cancelled() => break,
                abort = abort_rx.recv() => match abort {
                    Some(abort) => abort,
                    None => break,
                },
            };
            let Some(this) = session.upgrade() else { break };
            this.handle_abort(abort).await;
        }
    }

    async fn handle_abort(&self, abort: AbortEvent) {
        let mut state = self.state.lock().await;
        if state.current_run() != Some((abort.category(), abort.run())) {
            log!("Ignoring stale abort for {} calibration (run {}).", abort.category(), abort.run());
            return;
        }
        self.fail_active(&mut state, abort).await;
    }

    /// Tears down the running calibration and marks it as failed.
    async fn fail_active(&self, state: &mut SessionState, abort: AbortEvent) {
        let category = abort.category();
        self.monitor.stop().await;
        Self::stop_telemetry(state).await;
        if let Err(e) = self.link.send_calibration_cancel().await {
            warn!("Cancel command for {category} could not be sent: {e}");
        }
        if let Some(cat) = state.category_mut(category) {
            cat.fail();
        }
        state.active = None;
        self.publish(state);
        cal!("{category} calibration failed: {}", abort.reason().as_error());
        self.emit(SessionEvent::Aborted(abort));
    }

    /// Parses a category name and checks that it belongs to this session.
    pub fn parse_category(&self, name: &str) -> Result<CategoryId, CalibrationError> {
        CategoryId::from_str(name.trim())
            .ok()
            .filter(|id| self.contains(*id))
            .ok_or_else(|| CalibrationError::UnknownCategory(name.to_string()))
    }

    pub fn contains(&self, id: CategoryId) -> bool { self.snapshot.borrow().iter().any(|c| c.id() == id) }

    fn ensure_usable(&self, id: CategoryId) -> Result<(), CalibrationError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(CalibrationError::Cancelled);
        }
        if self.contains(id) { Ok(()) } else { Err(CalibrationError::UnknownCategory(id.to_string())) }
    }

    /// Starts the calibration of `category`.
    ///
    /// Requires a connected link and no other running calibration. All steps are reset
    /// and the first one is activated before the start command goes out.
    pub async fn start(&self, category: CategoryId) -> Result<(), CalibrationError> {
        self.ensure_usable(category)?;
        if !self.link.is_connected() {
            return Err(CalibrationError::NotConnected);
        }
        let mut state = self.state.lock().await;
        if let Some(active) = &state.active {
            return Err(CalibrationError::SessionBusy(active.category));
        }

        Self::stop_telemetry(&mut state).await;
        let run = self.monitor.start(category).await;
        let started = Instant::now();
        if category.is_multi_position() {
            self.monitor.set_current_position(AccelPosition::Level.index()).await;
        }
        state.telemetry = Some(self.spawn_telemetry(category, run, started));
        if let Some(cat) = state.category_mut(category) {
            cat.begin();
        }
        state.active = Some(Active { category, run, started });
        self.publish(&state);

        let flags = category.profile().flags;
        if let Err(e) = self.link.send_calibration_start(flags).await {
            warn!("Start command for {category} could not be sent: {e}");
            self.monitor.stop().await;
            Self::stop_telemetry(&mut state).await;
            if let Some(cat) = state.category_mut(category) {
                cat.fail();
            }
            state.active = None;
            self.publish(&state);
            return Err(e.into());
        }
        cal!("{category} calibration started.");
        self.emit(SessionEvent::Started(category));
        Ok(())
    }

    /// Confirms the current step of `category`.
    ///
    /// For the accelerometer this confirms the current position and moves to the next;
    /// single-step categories complete at once.
    pub async fn advance(&self, category: CategoryId) -> Result<(), CalibrationError> {
        self.ensure_usable(category)?;
        let mut state = self.state.lock().await;
        self.advance_locked(&mut state, category).await
    }

    /// Like [`advance`](Self::advance), but only after `sample` was validated against the
    /// position the current step expects. A rejected sample leaves the state unchanged.
    pub async fn advance_checked(
        &self,
        category: CategoryId,
        sample: &Vec3D<f32>,
    ) -> Result<(), CalibrationError> {
        self.ensure_usable(category)?;
        let mut state = self.state.lock().await;
        if !state.is_active(category) {
            return Err(CalibrationError::NotActive(category));
        }
        let position = match category {
            CategoryId::Accelerometer => state
                .category_mut(category)
                .and_then(|c| c.current_step())
                .and_then(|step| u8::try_from(step + 1).ok()),
            CategoryId::LevelHorizon => Some(AccelPosition::Level.index()),
            _ => None,
        };
        if let Some(position) = position {
            let report = validate(position, sample);
            if !report.valid {
                log!("{category} step rejected: {}", report.message);
                return Err(report
                    .as_error(position)
                    .unwrap_or(CalibrationError::InvalidPosition(position)));
            }
        }
        self.advance_locked(&mut state, category).await
    }

    async fn advance_locked(
        &self,
        state: &mut SessionState,
        category: CategoryId,
    ) -> Result<(), CalibrationError> {
        if !state.is_active(category) {
            return Err(CalibrationError::NotActive(category));
        }
        let current = state.category_mut(category).and_then(|c| c.current_step());
        let Some(current) = current else {
            return Err(CalibrationError::NotActive(category));
        };

        let done = if category.is_multi_position() {
            let position = u8::try_from(current + 1).map_err(|_| CalibrationError::InvalidPosition(u8::MAX))?;
            self.link.send_position_confirm(position).await?;
            let done = state.category_mut(category).is_some_and(|c| c.complete_step());
            if !done {
                self.monitor.set_current_position(position + 1).await;
                cal!("{category}: position {position} confirmed, next {}.", position + 1);
                self.emit(SessionEvent::StepAdvanced { category, step: current + 1 });
            }
            done
        } else {
            if let Some(cat) = state.category_mut(category) {
                cat.complete_all();
            }
            true
        };

        if done {
            self.monitor.stop().await;
            state.active = None;
            cal!("{category}: all steps complete, awaiting commit.");
        }
        self.publish(state);
        if done {
            self.emit(SessionEvent::CategoryCompleted(category));
        }
        Ok(())
    }

    /// Aborts the running calibration of `category` on request of the caller.
    pub async fn abort(&self, category: CategoryId) -> Result<(), CalibrationError> {
        self.ensure_usable(category)?;
        let mut state = self.state.lock().await;
        let Some(active) = state.active.as_ref().filter(|a| a.category == category) else {
            return Err(CalibrationError::NotActive(category));
        };
        let elapsed = Instant::now().saturating_duration_since(active.started);
        let abort = AbortEvent::new(
            AbortReason::UserCancelled,
            "Cancelled by user.".to_string(),
            category,
            active.run,
            elapsed,
        );
        self.fail_active(&mut state, abort).await;
        Ok(())
    }

    /// Finalizes `category`: the firmware results are read back and checked, then the
    /// category is marked complete whatever the check says.
    pub async fn commit(&self, category: CategoryId) -> Result<CommitReport, CalibrationError> {
        self.ensure_usable(category)?;
        let mut state = self.state.lock().await;
        if state.telemetry.as_ref().is_some_and(|t| t.category == category) {
            Self::stop_telemetry(&mut state).await;
        }
        if state.is_active(category) {
            self.monitor.stop().await;
            state.active = None;
        }

        let verification = verify(&self.store, category).await;
        if let Some(err) = verification.as_error() {
            warn!("Committing {category} despite: {err}");
        }
        if let Some(cat) = state.category_mut(category) {
            cat.complete_all();
        }
        self.publish(&state);
        drop(state);

        let report = CommitReport {
            category,
            verification,
            reboot_required: category.profile().reboot_required,
        };
        cal!(
            "{category} calibration committed{}.",
            if report.reboot_required { ", reboot required" } else { "" }
        );
        self.emit(SessionEvent::Committed(report.clone()));
        Ok(report)
    }

    /// Asks the vehicle to reboot. Returns `false` if the command could not be sent.
    pub async fn reboot_vehicle(&self) -> bool {
        if !self.link.is_connected() {
            warn!("Cannot reboot: vehicle not connected.");
            return false;
        }
        match self.link.send_reboot_command().await {
            Ok(()) => {
                info!("Reboot command sent.");
                true
            }
            Err(e) => {
                warn!("Reboot command failed: {e}");
                false
            }
        }
    }

    /// Stops monitor, telemetry and listener. No event is emitted once this returns.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.c_tok.cancel();
        self.monitor.stop().await;
        {
            let mut state = self.state.lock().await;
            Self::stop_telemetry(&mut state).await;
        }
        let listener = self.listener.lock().await.take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!("Abort listener ended abnormally: {e}");
            }
        }
        cal!("Calibration session disposed.");
    }

    /// Consistent copy of all categories and their steps.
    pub fn categories(&self) -> Vec<CalibrationCategory> { self.snapshot.borrow().clone() }

    pub fn category(&self, id: CategoryId) -> Option<CalibrationCategory> {
        self.snapshot.borrow().iter().find(|c| c.id() == id).cloned()
    }

    /// The category currently in progress, if any.
    pub fn active(&self) -> Option<CategoryId> {
        self.snapshot
            .borrow()
            .iter()
            .find(|c| c.status() == CategoryStatus::InProgress)
            .map(CalibrationCategory::id)
    }

    pub fn monitor(&self) -> Arc<AbortMonitor> { Arc::clone(&self.monitor) }

    pub fn watch_categories(&self) -> watch::Receiver<Vec<CalibrationCategory>> { self.snapshot.subscribe() }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> { self.events.subscribe() }

    fn publish(&self, state: &SessionState) { self.snapshot.send_replace(state.categories.clone()); }

    fn emit(&self, event: SessionEvent) {
        if !self.disposed.load(Ordering::Acquire) {
            let _ = self.events.send(event);
        }
    }

    async fn stop_telemetry(state: &mut SessionState) {
        if let Some(telemetry) = state.telemetry.take() {
            telemetry.c_tok.cancel();
            if let Err(e) = telemetry.handle.await {
                warn!("Telemetry task of {} ended abnormally: {e}", telemetry.category);
            }
        }
    }

    /// Routes a firmware-side failure of `run` to the abort listener.
    ///
    /// Once all steps are confirmed the monitor is disarmed, yet the firmware only
    /// reports the fit result afterwards. Such a failure is queued directly.
    async fn raise(
        monitor: &AbortMonitor,
        category: CategoryId,
        run: u64,
        started: Instant,
        reason: AbortReason,
        message: &str,
    ) {
        if !monitor.trigger_manual_abort(reason, message).await {
            let elapsed = Instant::now().saturating_duration_since(started);
            monitor.report_unsupervised(AbortEvent::new(reason, message.to_string(), category, run, elapsed));
        }
    }

    /// Spawns the task that interprets firmware feedback for one run of `category`.
    fn spawn_telemetry(&self, category: CategoryId, run: u64, started: Instant) -> Telemetry {
        let mut link_rx = self.link_monitor.subscribe();
        let monitor = Arc::clone(&self.monitor);
        let events = self.events.clone();
        let c_tok = CancellationToken::new();
        let task_tok = c_tok.clone();
        let handle = tokio::spawn(async move {
            loop {
                let link_event = tokio::select! {
                    biased;
                    () = task_tok.cancelled() => break,
                    ev = link_rx.recv() => ev,
                };
                match link_event {
                    Ok(LinkEvent::StatusText { text, .. }) => match classify(&text) {
                        StatusClass::Failure => {
                            Self::raise(&monitor, category, run, started, AbortReason::FirmwareFailure, &text)
                                .await;
                        }
                        StatusClass::Success => {
                            let _ = events.send(SessionEvent::FirmwareReport { category, text });
                        }
                        StatusClass::Progress(percent) => {
                            event!("{category} progress {percent}%");
                            let _ = events.send(SessionEvent::Progress { category, percent });
                        }
                        StatusClass::Instruction(position) => {
                            let _ = events.send(SessionEvent::Instruction { category, position, text });
                        }
                        StatusClass::Other => {}
                    },
                    Ok(LinkEvent::CommandAck(ack))
                        if ack.command == CMD_PREFLIGHT_CALIBRATION && ack.result.is_rejection() =>
                    {
                        let msg = format!("Calibration command rejected: {}.", ack.result);
                        Self::raise(&monitor, category, run, started, AbortReason::CommandRejected, &msg)
                            .await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Telemetry of {category} skipped {n} link events.");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Telemetry { category, run, handle, c_tok }
    }
}
