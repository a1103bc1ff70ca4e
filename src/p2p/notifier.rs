//! Connection event notification.
//!
//! A passive adapter between the transport's connect/disconnect events and
//! whatever sinks are active. Holds no state between calls; each callback
//! formats one line and fans it out, so it must stay cheap enough not to
//! stall the event loop.

use std::sync::Arc;

use libp2p::{Multiaddr, PeerId};

/// Where user-visible output lands. The chat pane and the system log are
/// distinct destinations; a console implementation is provided and a TUI can
/// plug in its own.
pub trait OutputSink: Send + Sync {
    fn chat_line(&self, line: &str);
    fn system_line(&self, line: &str);
}

/// Writes chat to stdout and system events through the log.
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn chat_line(&self, line: &str) {
        println!("{line}");
    }

    fn system_line(&self, line: &str) {
        println!("[system] {line}");
    }
}

/// Fans connection events out to any number of registered sinks.
#[derive(Default)]
pub struct ConnectionNotifier {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl ConnectionNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, sink: Arc<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn on_connected(&self, peer: &PeerId, addr: &Multiaddr) {
        let line = format!("new connection from peer {peer} via {addr}");
        for sink in &self.sinks {
            sink.system_line(&line);
        }
    }

    pub fn on_disconnected(&self, peer: &PeerId, addr: &Multiaddr) {
        let line = format!("disconnected from peer {peer} via {addr}");
        for sink in &self.sinks {
            sink.system_line(&line);
        }
    }
}
