use super::link_common::{CommandAck, InboundMessage, Severity};
use crate::{event, info, warn};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// Link-level notifications re-broadcast to interested components.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Heartbeat,
    ConnectionChanged(bool),
    StatusText { severity: Severity, text: String },
    CommandAck(CommandAck),
}

/// Tracks liveness and connectivity of the telemetry link.
///
/// [`LinkMonitor::handle`] is the only place the monitor state is changed. It is fed
/// by the [`LinkRouter`](super::LinkRouter) task, so updates are serialized.
pub struct LinkMonitor {
    /// Latest known connection state.
    connected: watch::Sender<bool>,
    /// Arrival time of the latest heartbeat.
    last_heartbeat: watch::Sender<Option<Instant>>,
    /// Fan-out of all link notifications.
    events: broadcast::Sender<LinkEvent>,
}

impl LinkMonitor {
    const EVENT_BUFFER: usize = 64;

    pub fn new(initially_connected: bool) -> Self {
        Self {
            connected: watch::Sender::new(initially_connected),
            last_heartbeat: watch::Sender::new(None),
            events: broadcast::Sender::new(Self::EVENT_BUFFER),
        }
    }

    /// Applies one inbound, non-parameter message.
    pub fn handle(&self, msg: InboundMessage) {
        match msg {
            InboundMessage::Heartbeat => {
                self.last_heartbeat.send_replace(Some(Instant::now()));
                let _ = self.events.send(LinkEvent::Heartbeat);
            }
            InboundMessage::ConnectionState(state) => self.set_connected(state),
            InboundMessage::StatusText { severity, text } => {
                event!("STATUSTEXT [{severity}] {text}");
                let _ = self.events.send(LinkEvent::StatusText { severity, text });
            }
            InboundMessage::CommandAck(ack) => {
                event!("COMMAND_ACK {} -> {}", ack.command, ack.result);
                let _ = self.events.send(LinkEvent::CommandAck(ack));
            }
            InboundMessage::ParamValue { name, .. } => {
                warn!("Parameter value {name} routed to the link monitor. Ignoring.");
            }
        }
    }

    fn set_connected(&self, state: bool) {
        let changed = self.connected.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            if state {
                info!("Telemetry link connected.");
            } else {
                warn!("Telemetry link disconnected!");
            }
            let _ = self.events.send(LinkEvent::ConnectionChanged(state));
        }
    }

    pub fn is_connected(&self) -> bool { *self.connected.borrow() }

    pub fn last_heartbeat(&self) -> Option<Instant> { *self.last_heartbeat.borrow() }

    /// Time since the latest heartbeat, `None` if none was ever received.
    pub fn heartbeat_age(&self) -> Option<Duration> {
        self.last_heartbeat().map(|t| Instant::now().saturating_duration_since(t))
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> { self.connected.subscribe() }

    pub fn watch_heartbeat(&self) -> watch::Receiver<Option<Instant>> {
        self.last_heartbeat.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> { self.events.subscribe() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_updates_age() {
        let monitor = LinkMonitor::new(true);
        assert!(monitor.heartbeat_age().is_none());
        monitor.handle(InboundMessage::Heartbeat);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(monitor.heartbeat_age(), Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn test_connection_changes_broadcast_once() {
        let monitor = LinkMonitor::new(true);
        let mut rx = monitor.subscribe();
        monitor.handle(InboundMessage::ConnectionState(true));
        monitor.handle(InboundMessage::ConnectionState(false));
        monitor.handle(InboundMessage::ConnectionState(false));
        assert_eq!(rx.recv().await.unwrap(), LinkEvent::ConnectionChanged(false));
        assert!(rx.try_recv().is_err());
        assert!(!monitor.is_connected());
    }
}
