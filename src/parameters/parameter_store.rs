use super::{
    parameter::{Parameter, is_valid_name, normalize_name},
    sync_session::ParameterSyncSession,
};
use crate::config::SyncConfig;
use crate::error::CalibrationError;
use crate::link::FlightLink;
use crate::{event, log, param, warn};
use itertools::Itertools;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, broadcast, oneshot, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Snapshot of how far the current synchronization got.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub received: usize,
    /// `None` until the device reported its parameter count.
    pub expected: Option<usize>,
}

/// Result of one finished synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Refresh counter value of the run that produced this outcome.
    pub generation: u64,
    /// `true` if the snapshot is usable, i.e. at least one parameter arrived.
    pub success: bool,
    /// `true` only if every expected index arrived.
    pub complete: bool,
    pub received: usize,
    pub expected: Option<usize>,
    /// Rounds in which missing indices had to be requested individually.
    pub retry_rounds: usize,
}

impl SyncOutcome {
    /// The [`CalibrationError::SyncTimeout`] describing an incomplete run, if any.
    pub fn shortfall(&self) -> Option<CalibrationError> {
        if self.complete {
            None
        } else {
            Some(CalibrationError::SyncTimeout {
                received: self.received,
                expected: self.expected.unwrap_or(0),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SyncEvent {
    Started { generation: u64 },
    Progress(SyncProgress),
    Completed(SyncOutcome),
}

/// Everything guarded by the store's single lock.
struct StoreState {
    params: HashMap<String, Parameter>,
    session: ParameterSyncSession,
    /// Incremented by every refresh. A run whose generation is outdated is superseded.
    generation: u64,
    /// Cancels the coordinator of the current generation.
    c_tok: CancellationToken,
    pending_writes: HashMap<String, oneshot::Sender<f32>>,
    pending_reads: HashMap<String, Vec<oneshot::Sender<f32>>>,
}

/// Reliable get-all-parameters engine with single-value read and write.
///
/// A [`refresh`](ParameterStore::refresh) broadcasts "request all", waits for the device
/// to settle and then re-requests missing indices individually for a bounded number of
/// rounds. Inbound values are merged at any time, including after a run has given up
/// or been superseded.
pub struct ParameterStore {
    link: Arc<dyn FlightLink>,
    config: SyncConfig,
    state: Mutex<StoreState>,
    events: broadcast::Sender<SyncEvent>,
    progress: watch::Sender<SyncProgress>,
}

impl ParameterStore {
    const EVENT_BUFFER: usize = 64;

    pub fn new(link: Arc<dyn FlightLink>, config: SyncConfig) -> Self {
        Self {
            link,
            config,
            state: Mutex::new(StoreState {
                params: HashMap::new(),
                session: ParameterSyncSession::new(),
                generation: 0,
                c_tok: CancellationToken::new(),
                pending_writes: HashMap::new(),
                pending_reads: HashMap::new(),
            }),
            events: broadcast::Sender::new(Self::EVENT_BUFFER),
            progress: watch::Sender::new(SyncProgress::default()),
        }
    }

    /// Starts a full synchronization, superseding any run still in flight.
    ///
    /// The parameter map and the sync session are cleared before this returns. The
    /// returned handle resolves to the outcome, or to `None` if the run was superseded.
    pub async fn refresh(self: &Arc<Self>) -> JoinHandle<Option<SyncOutcome>> {
        let (generation, c_tok) = {
            let mut state = self.state.lock().await;
            state.c_tok.cancel();
            state.generation += 1;
            state.c_tok = CancellationToken::new();
            state.params.clear();
            state.session = ParameterSyncSession::new();
            self.progress.send_replace(SyncProgress::default());
            let _ = self.events.send(SyncEvent::Started { generation: state.generation });
            (state.generation, state.c_tok.clone())
        };
        param!("Starting parameter sync #{generation}.");
        let store = Arc::clone(self);
        tokio::spawn(async move { store.run_sync(generation, c_tok).await })
    }

    async fn run_sync(&self, generation: u64, c_tok: CancellationToken) -> Option<SyncOutcome> {
        self.request_all().await;
        if !Self::pause(&c_tok, self.config.settle_window).await {
            log!("Parameter sync #{generation} superseded.");
            return None;
        }

        let mut retry_rounds = 0;
        for round in 1..=self.config.max_rounds {
            let (expected, missing) = self.evaluate(generation).await?;
            let Some(expected) = expected else {
                log!("Sync #{generation} round {round}: parameter count still unknown.");
                self.request_all().await;
                if !Self::pause(&c_tok, self.config.settle_window).await {
                    log!("Parameter sync #{generation} superseded.");
                    return None;
                }
                continue;
            };
            if missing.is_empty() {
                break;
            }

            retry_rounds += 1;
            param!(
                "Sync #{generation} round {round}: {} of {expected} parameters missing.",
                missing.len()
            );
            event!("Missing indices: {}", missing.iter().join(", "));
            for (i, batch) in missing.chunks(self.config.batch_size.max(1)).enumerate() {
                if i > 0 && !Self::pause(&c_tok, self.config.batch_spacing).await {
                    log!("Parameter sync #{generation} superseded.");
                    return None;
                }
                for idx in batch {
                    if let Err(e) = self.link.send_request_parameter_by_index(*idx).await {
                        warn!("Requesting parameter #{idx} failed: {e}");
                    }
                }
            }
            if !Self::pause(&c_tok, self.config.retry_wait).await {
                log!("Parameter sync #{generation} superseded.");
                return None;
            }
        }
        self.finish(generation, retry_rounds).await
    }

    /// Computes `(expected, missing)` for the current run and publishes progress.
    ///
    /// Returns `None` if `generation` is no longer the current run.
    async fn evaluate(&self, generation: u64) -> Option<(Option<usize>, Vec<u16>)> {
        let state = self.state.lock().await;
        if state.generation != generation {
            return None;
        }
        let progress = SyncProgress {
            received: state.session.received_count(),
            expected: state.session.expected(),
        };
        let _ = self.events.send(SyncEvent::Progress(progress));
        Some((state.session.expected(), state.session.missing()))
    }

    async fn finish(&self, generation: u64, retry_rounds: usize) -> Option<SyncOutcome> {
        let state = self.state.lock().await;
        if state.generation != generation {
            return None;
        }
        let received = state.session.received_count();
        let complete = state.session.is_complete();
        let outcome = SyncOutcome {
            generation,
            success: complete || received > 0,
            complete,
            received,
            expected: state.session.expected(),
            retry_rounds,
        };
        match outcome.shortfall() {
            None => param!("Parameter sync #{generation} complete: {received} parameters."),
            Some(err) if outcome.success => warn!("Using partial parameter set: {err}"),
            Some(err) => warn!("Parameter sync #{generation} failed: {err}"),
        }
        let _ = self.events.send(SyncEvent::Completed(outcome));
        Some(outcome)
    }

    async fn request_all(&self) {
        if let Err(e) = self.link.send_request_all_parameters().await {
            warn!("Requesting all parameters failed: {e}");
        }
    }

    /// Sleeps for `dt`, returning `false` early if the run gets cancelled.
    async fn pause(c_tok: &CancellationToken, dt: Duration) -> bool {
        tokio::select! {
            () = c_tok.cancelled() => false,
            () = sleep(dt) => true,
        }
    }

    /// Merges one value update reported by the device.
    pub async fn handle_param_value(&self, name: &str, value: f32, index: u16, total: u16) {
        let name = normalize_name(name);
        let mut state = self.state.lock().await;
        // Write echoes may carry an unknown index; keep the ordinal we already know.
        let index = match state.params.get(&name) {
            Some(known) if index == u16::MAX => known.index(),
            _ => index,
        };
        state.params.insert(name.clone(), Parameter::new(&name, value, index));
        if index != u16::MAX {
            state.session.record(index, total);
        }
        if let Some(waiter) = state.pending_writes.remove(&name) {
            let _ = waiter.send(value);
        }
        if let Some(waiters) = state.pending_reads.remove(&name) {
            for waiter in waiters {
                let _ = waiter.send(value);
            }
        }
        self.progress.send_replace(SyncProgress {
            received: state.session.received_count(),
            expected: state.session.expected(),
        });
        drop(state);
        event!("PARAM_VALUE {name} = {value} [{index}/{total}]");
    }

    /// Writes one parameter and waits for the device to echo it.
    ///
    /// There is exactly one attempt: the result is `true` only if a value update for
    /// `name` arrives within the write timeout.
    pub async fn set(&self, name: &str, value: f32) -> bool {
        if !is_valid_name(name) {
            warn!("Refusing to write invalid parameter id '{name}'.");
            return false;
        }
        if !self.link.is_connected() {
            warn!("Cannot write {name}: vehicle not connected.");
            return false;
        }
        let name = normalize_name(name);
        let (tx, rx) = oneshot::channel();
        if self.state.lock().await.pending_writes.insert(name.clone(), tx).is_some() {
            log!("Superseding pending write of {name}.");
        }
        if let Err(e) = self.link.send_set_parameter(&name, value).await {
            warn!("Sending write of {name} failed: {e}");
            self.drop_stale_write(&name).await;
            return false;
        }
        match timeout(self.config.write_timeout, rx).await {
            Ok(Ok(echoed)) => {
                param!("Write {name} = {value} confirmed (device reports {echoed}).");
                true
            }
            Ok(Err(_)) => {
                log!("Write {name} = {value} superseded by a newer write.");
                false
            }
            Err(_) => {
                warn!("Write {name} = {value} not confirmed within {:?}.", self.config.write_timeout);
                self.drop_stale_write(&name).await;
                false
            }
        }
    }

    /// Removes the pending write for `name` if its waiter is gone.
    async fn drop_stale_write(&self, name: &str) {
        let mut state = self.state.lock().await;
        if state.pending_writes.get(name).is_some_and(oneshot::Sender::is_closed) {
            state.pending_writes.remove(name);
        }
    }

    /// Reads one parameter directly from the device.
    ///
    /// Only parameters already present in the snapshot can be fetched, since the request
    /// is addressed by device index.
    pub async fn fetch(&self, name: &str) -> Option<f32> {
        if !self.link.is_connected() {
            return None;
        }
        let name = normalize_name(name);
        let (tx, rx) = oneshot::channel();
        let index = {
            let mut state = self.state.lock().await;
            let index = state.params.get(&name)?.index();
            if index == u16::MAX {
                return None;
            }
            state.pending_reads.entry(name.clone()).or_default().push(tx);
            index
        };
        let answer = match self.link.send_request_parameter_by_index(index).await {
            Ok(()) => timeout(self.config.read_timeout, rx).await.ok().and_then(Result::ok),
            Err(e) => {
                warn!("Reading {name} failed: {e}");
                drop(rx);
                None
            }
        };
        if answer.is_some() {
            return answer;
        }
        warn!("No answer for {name} within {:?}.", self.config.read_timeout);
        let mut state = self.state.lock().await;
        if let Some(waiters) = state.pending_reads.get_mut(&name) {
            waiters.retain(|w| !w.is_closed());
            if waiters.is_empty() {
                state.pending_reads.remove(&name);
            }
        }
        None
    }

    /// Case-insensitive lookup in the latest (possibly partial) snapshot.
    pub async fn get(&self, name: &str) -> Option<Parameter> {
        self.state.lock().await.params.get(&normalize_name(name)).cloned()
    }

    pub async fn value(&self, name: &str) -> Option<f32> { self.get(name).await.map(|p| p.value()) }

    /// A consistent copy of all parameters known right now.
    pub async fn snapshot(&self) -> HashMap<String, Parameter> {
        self.state.lock().await.params.clone()
    }

    pub async fn count(&self) -> usize { self.state.lock().await.params.len() }

    pub fn progress(&self) -> SyncProgress { *self.progress.borrow() }

    pub fn watch_progress(&self) -> watch::Receiver<SyncProgress> { self.progress.subscribe() }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> { self.events.subscribe() }
}
