use super::{
    abort_event::{AbortEvent, AbortReason},
    category::CategoryId,
};
use crate::config::MonitorConfig;
use crate::link::LinkMonitor;
use crate::{cal, event, warn};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use strum_macros::Display;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Monitoring,
}

/// Everything recorded when the monitor is armed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Armed {
    pub(crate) category: CategoryId,
    pub(crate) run: u64,
    pub(crate) started: Instant,
    /// Heartbeat reference, at least the arming time.
    pub(crate) last_heartbeat: Instant,
    /// Active accelerometer position and the time it was requested.
    pub(crate) position: Option<(u8, Instant)>,
}

impl Armed {
    fn new(category: CategoryId, run: u64, now: Instant) -> Self {
        Self { category, run, started: now, last_heartbeat: now, position: None }
    }

    /// Evaluates the abort conditions in priority order and returns the first that holds.
    pub(crate) fn check(
        &self,
        cfg: &MonitorConfig,
        now: Instant,
        connected: bool,
    ) -> Option<(AbortReason, String)> {
        let hb_age = now.saturating_duration_since(self.last_heartbeat);
        if hb_age > cfg.heartbeat_timeout {
            return Some((
                AbortReason::HeartbeatLost,
                format!("No heartbeat for {:.1}s.", hb_age.as_secs_f32()),
            ));
        }
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed > cfg.session_timeout {
            return Some((
                AbortReason::Timeout,
                format!("Calibration exceeded {}s.", cfg.session_timeout.as_secs()),
            ));
        }
        if self.category.is_multi_position() {
            if let Some((pos, since)) = self.position {
                let waited = now.saturating_duration_since(since);
                if waited > cfg.position_timeout {
                    return Some((
                        AbortReason::UserNonCompliance,
                        format!("Position {pos} not confirmed within {}s.", cfg.position_timeout.as_secs()),
                    ));
                }
            }
        }
        if !connected {
            return Some((AbortReason::ConnectionLost, "Telemetry link disconnected.".to_string()));
        }
        None
    }
}

/// Real-time safety supervisor of one running calibration.
///
/// While monitoring, a periodic check and a connection watch run in a single supervisor
/// task. Triggering is one-shot: the state flips to [`MonitorState::Idle`] before the
/// [`AbortEvent`] is dispatched, so concurrent conditions fire at most once per arming.
pub struct AbortMonitor {
    link: Arc<LinkMonitor>,
    config: MonitorConfig,
    state: watch::Sender<MonitorState>,
    /// Guards arming, triggering and teardown.
    armed: Mutex<Option<Armed>>,
    abort_tx: mpsc::UnboundedSender<AbortEvent>,
    /// Number of armings so far.
    runs: AtomicU64,
    task: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl AbortMonitor {
    /// Creates the monitor and the receiving end of its abort events.
    pub fn new(
        link: Arc<LinkMonitor>,
        config: MonitorConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AbortEvent>) {
        let (abort_tx, abort_rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(Self {
            link,
            config,
            state: watch::Sender::new(MonitorState::Idle),
            armed: Mutex::new(None),
            abort_tx,
            runs: AtomicU64::new(0),
            task: Mutex::new(None),
        });
        (monitor, abort_rx)
    }

    pub fn state(&self) -> MonitorState { *self.state.borrow() }

    pub fn watch_state(&self) -> watch::Receiver<MonitorState> { self.state.subscribe() }

    /// Arms the monitor for `category`, restarting it if it was already running.
    ///
    /// # Returns
    /// The run number stamped on every [`AbortEvent`] of this arming.
    pub async fn start(self: &Arc<Self>, category: CategoryId) -> u64 {
        self.stop().await;
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut armed = self.armed.lock().await;
            *armed = Some(Armed::new(category, run, Instant::now()));
            self.state.send_replace(MonitorState::Monitoring);
        }
        let c_tok = CancellationToken::new();
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(monitor.supervise(c_tok.clone()));
        *self.task.lock().await = Some((handle, c_tok));
        cal!("Abort monitor armed for {category} (run {run}).");
        run
    }

    /// Records that the vehicle was asked to enter the 1-based accelerometer `position`.
    pub async fn set_current_position(&self, position: u8) {
        if let Some(armed) = self.armed.lock().await.as_mut() {
            armed.position = Some((position, Instant::now()));
            event!("Abort monitor tracking position {position}.");
        }
    }

    /// Forces an abort with a caller-supplied message.
    ///
    /// Returns `false` if the monitor was not armed or already triggered.
    pub async fn trigger_manual_abort(&self, reason: AbortReason, message: &str) -> bool {
        self.fire(reason, message.to_string()).await
    }

    /// Queues an abort for a run that is no longer supervised, bypassing the one-shot rule.
    pub(crate) fn report_unsupervised(&self, abort: AbortEvent) {
        warn!("{abort}");
        let _ = self.abort_tx.send(abort);
    }

    /// Disarms the monitor. Once this returns, no further [`AbortEvent`] is emitted.
    pub async fn stop(&self) {
        let was_armed = {
            let mut armed = self.armed.lock().await;
            self.state.send_replace(MonitorState::Idle);
            armed.take().is_some()
        };
        let task = self.task.lock().await.take();
        if let Some((handle, c_tok)) = task {
            c_tok.cancel();
            if let Err(e) = handle.await {
                warn!("Abort monitor task ended abnormally: {e}");
            }
        }
        if was_armed {
            cal!("Abort monitor stopped.");
        }
    }

    /// Applies the one-shot rule and dispatches the event.
    async fn fire(&self, reason: AbortReason, message: String) -> bool {
        let mut armed_slot = self.armed.lock().await;
        let Some(armed) = *armed_slot else {
            return false;
        };
        let flipped = self.state.send_if_modified(|state| {
            if *state == MonitorState::Monitoring {
                *state = MonitorState::Idle;
                true
            } else {
                false
            }
        });
        if !flipped {
            return false;
        }
        *armed_slot = None;
        let elapsed = Instant::now().saturating_duration_since(armed.started);
        let abort = AbortEvent::new(reason, message, armed.category, armed.run, elapsed);
        warn!("{abort}");
        let _ = self.abort_tx.send(abort);
        true
    }

    /// Runs the periodic checks for the current arming.
    async fn check_now(&self) -> Option<(AbortReason, String)> {
        let mut armed_slot = self.armed.lock().await;
        let armed = armed_slot.as_mut()?;
        if let Some(hb) = self.link.last_heartbeat() {
            armed.last_heartbeat = armed.last_heartbeat.max(hb);
        }
        armed.check(&self.config, Instant::now(), self.link.is_connected())
    }

    async fn supervise(self: Arc<Self>, c_tok: CancellationToken) {
        let mut tick = interval_at(Instant::now() + self.config.tick, self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connected = self.link.watch_connected();
        loop {
            tokio::select! {
                biased;
                () = c_tok.cancelled() => break,
                res = connected.changed() => {
                    if res.is_err() {
                        break;
                    }
                    if *connected.borrow_and_update() {
                        continue;
                    }
                }
                _ = tick.tick() => {}
            }
            if self.state() != MonitorState::Monitoring {
                break;
            }
            if let Some((reason, message)) = self.check_now().await {
                self.fire(reason, message).await;
                break;
            }
        }
    }
}
