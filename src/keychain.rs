use crate::calibration::{CalibrationSession, CategoryId};
use crate::config::{MonitorConfig, SyncConfig};
use crate::link::{FlightLink, InboundMessage, LinkMonitor, LinkRouter};
use crate::parameters::ParameterStore;
use crate::warn;
use std::sync::Arc;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

/// Struct holding the key components of one vehicle connection, providing access
/// to the link monitor, the parameter store and the calibration session.
///
/// # Fields
/// - `link`: The send side of the telemetry transport.
/// - `link_mon`: The link monitor tracking heartbeats and connection state.
/// - `store`: The parameter store synchronizing the vehicle configuration.
/// - `session`: The calibration session sequencing sensor calibrations.
/// - `router`: The task feeding inbound messages to `link_mon` and `store`.
pub struct Keychain {
    /// The telemetry link used for all outgoing commands.
    link: Arc<dyn FlightLink>,
    /// The link monitor fed by the router.
    link_mon: Arc<LinkMonitor>,
    /// The parameter store fed by the router.
    store: Arc<ParameterStore>,
    /// The calibration session for the vehicle's sensor set.
    session: Arc<CalibrationSession>,
    /// The inbound dispatch task.
    router: JoinHandle<()>,
}

impl Keychain {
    /// Wires all components around one telemetry link.
    ///
    /// # Arguments
    /// - `link`: The send side of the transport.
    /// - `inbound`: The decoded messages delivered by the transport.
    /// - `sync_cfg`: Timing of the parameter synchronization.
    /// - `mon_cfg`: Thresholds of the abort supervisor.
    /// - `categories`: The calibration categories the vehicle supports.
    ///
    /// # Returns
    /// A new `Keychain` with its router task already running.
    pub fn new(
        link: Arc<dyn FlightLink>,
        inbound: UnboundedReceiver<InboundMessage>,
        sync_cfg: SyncConfig,
        mon_cfg: MonitorConfig,
        categories: &[CategoryId],
    ) -> Self {
        let link_mon = Arc::new(LinkMonitor::new(link.is_connected()));
        let store = Arc::new(ParameterStore::new(Arc::clone(&link), sync_cfg));
        let router = LinkRouter::start(inbound, Arc::clone(&link_mon), Arc::clone(&store));
        let session = CalibrationSession::new(
            Arc::clone(&link),
            Arc::clone(&link_mon),
            Arc::clone(&store),
            mon_cfg,
            categories,
        );
        Self { link, link_mon, store, session, router }
    }

    /// Provides a cloned reference to the telemetry link.
    pub fn link(&self) -> Arc<dyn FlightLink> { Arc::clone(&self.link) }

    /// Provides a cloned reference to the link monitor.
    pub fn link_mon(&self) -> Arc<LinkMonitor> { Arc::clone(&self.link_mon) }

    /// Provides a cloned reference to the parameter store.
    pub fn store(&self) -> Arc<ParameterStore> { Arc::clone(&self.store) }

    /// Provides a cloned reference to the calibration session.
    pub fn session(&self) -> Arc<CalibrationSession> { Arc::clone(&self.session) }

    /// Disposes the calibration session and stops routing inbound messages.
    pub async fn shutdown(self) {
        self.session.dispose().await;
        self.router.abort();
        if let Err(e) = self.router.await {
            if !e.is_cancelled() {
                warn!("Router task ended abnormally: {e}");
            }
        }
    }
}
