use super::{link_common::InboundMessage, link_monitor::LinkMonitor};
use crate::info;
use crate::parameters::ParameterStore;
use std::sync::Arc;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

/// Single entry point for everything the transport layer decodes.
///
/// Messages are applied strictly in arrival order: parameter values go to the
/// [`ParameterStore`], everything else to the [`LinkMonitor`].
pub struct LinkRouter;

impl LinkRouter {
    /// Spawns the dispatch task. It ends once every sender of `inbound` is dropped.
    pub fn start(
        mut inbound: UnboundedReceiver<InboundMessage>,
        monitor: Arc<LinkMonitor>,
        store: Arc<ParameterStore>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                match msg {
                    InboundMessage::ParamValue { name, value, index, total } => {
                        store.handle_param_value(&name, value, index, total).await;
                    }
                    other => monitor.handle(other),
                }
            }
            info!("Inbound telemetry channel closed. Router stopped.");
        })
    }
}
