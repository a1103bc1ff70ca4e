//! Inbound message dispatch.
//!
//! Drains host events strictly in receipt order: pub/sub payloads are
//! classified and routed to the chat or system sink, connection events are
//! forwarded to the notifier. The loop exits when the event channel closes
//! or the process-wide cancellation token fires.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::messages::{self, InboundEnvelope};
use crate::p2p::network::{HostEvent, MeshHost};
use crate::p2p::notifier::{ConnectionNotifier, OutputSink};

/// Routes classified envelopes to sinks. Sink selection is a pure function
/// of the envelope's tag.
pub struct MessageDispatcher {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl MessageDispatcher {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn dispatch(&self, envelope: InboundEnvelope) {
        match envelope {
            InboundEnvelope::Chat(chat) => {
                let line = format!("message from {}: {}", chat.sender, chat.text);
                for sink in &self.sinks {
                    sink.chat_line(&line);
                }
            }
            InboundEnvelope::Notification(notification) => {
                let line = format!("[{}] {}", notification.kind, notification.message);
                for sink in &self.sinks {
                    sink.system_line(&line);
                }
            }
            InboundEnvelope::Raw { source, data } => {
                let line = format!(
                    "message from {source} (unparsed): {}",
                    String::from_utf8_lossy(&data)
                );
                for sink in &self.sinks {
                    sink.chat_line(&line);
                }
            }
        }
    }
}

/// The node's event loop: one task, single-threaded consumption of the host
/// event channel, no reordering within a sender's stream.
pub async fn run(
    host: Arc<MeshHost>,
    dispatcher: MessageDispatcher,
    notifier: ConnectionNotifier,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = host.next_event() => event,
        };
        let Some(event) = event else {
            // Host task gone; subscription is closed for good.
            break;
        };
        match event {
            HostEvent::Message { source, data } => {
                dispatcher.dispatch(messages::classify(&data, &source.to_string()));
            }
            HostEvent::PeerConnected { peer, addr } => notifier.on_connected(&peer, &addr),
            HostEvent::PeerDisconnected { peer, addr } => notifier.on_disconnected(&peer, &addr),
        }
    }
    debug!("dispatch loop stopped");
}
