//! Node runtime: wires identity, registry, host, discovery, and dispatch
//! into the two node roles (mesh client and bootstrap entry point) and
//! carries the process-wide cancellation signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config;
use crate::error::MeshError;
use crate::identity::{self, NodeIdentity};
use crate::messages::ChatMessage;
use crate::p2p::{
    discovery, dispatch, ConnectionNotifier, ConsoleSink, DiscoveryConfig, HostConfig,
    MeshHost, MessageDispatcher, OutputSink,
};
use crate::registry::BootstrapRegistry;

pub const ROOM_PREFIX: &str = "--meshtalk-";
pub const DEFAULT_ROOM: &str = "--meshtalk-public-default";
pub const DEFAULT_USERNAME: &str = "Guest";
pub const DEFAULT_PORT: u16 = 42069;

/// Applies the required room-name prefix, so user-chosen rooms can never
/// collide with arbitrary gossipsub topics.
pub fn normalize_room(room: &str) -> String {
    if room.is_empty() {
        DEFAULT_ROOM.to_string()
    } else if room.starts_with(ROOM_PREFIX) {
        room.to_string()
    } else {
        format!("{ROOM_PREFIX}{room}")
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub username: String,
    pub room: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub port: u16,
}

/// Runs a mesh client node until `/quit` or Ctrl-C.
///
/// Clients run with a fresh identity each start; only bootstrap nodes
/// persist their keypair.
pub async fn run_client(opts: ClientOptions) -> Result<(), MeshError> {
    let identity = NodeIdentity::generate();
    info!("starting client node, peer id {}", identity.peer_id());

    let host = Arc::new(
        MeshHost::spawn(
            HostConfig {
                listen_port: opts.port,
                chat_topic: Some(opts.room.clone()),
                kad_server: false,
            },
            &identity,
        )
        .await?,
    );

    let cancel = CancellationToken::new();
    let sink: Arc<dyn OutputSink> = Arc::new(ConsoleSink);

    start_background_tasks(
        host.clone(),
        sink.clone(),
        DiscoveryConfig::client(),
        cancel.clone(),
    )
    .await;

    info!("joined room {}; type /quit to exit", opts.room);
    input_loop(&host, &opts.username, &cancel).await;

    cancel.cancel();
    host.shutdown().await;
    Ok(())
}

/// Runs a bootstrap entry-point node until Ctrl-C. The identity is durable:
/// loaded from the storage file when present, minted and saved otherwise.
pub async fn run_bootstrap(opts: BootstrapOptions) -> Result<(), MeshError> {
    let storage = config::bootstrap_file_path()?;
    // Corrupt key material is fatal here; a missing key is not.
    let identity = match identity::load(&storage)? {
        Some(saved) => {
            info!("using saved identity");
            saved
        }
        None => {
            info!("creating new identity");
            NodeIdentity::generate()
        }
    };
    info!("starting bootstrap node, peer id {}", identity.peer_id());

    let host = Arc::new(
        MeshHost::spawn(
            HostConfig {
                listen_port: opts.port,
                chat_topic: None,
                kad_server: true,
            },
            &identity,
        )
        .await?,
    );

    let cancel = CancellationToken::new();
    let sink: Arc<dyn OutputSink> = Arc::new(ConsoleSink);

    start_background_tasks(
        host.clone(),
        sink.clone(),
        DiscoveryConfig::bootstrap(),
        cancel.clone(),
    )
    .await;

    save_self_advertisement(&storage, &identity, &host).await;

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("signal handler error: {e}");
            }
        }
    }

    cancel.cancel();
    host.shutdown().await;
    Ok(())
}

/// Static bootstrap pass, then the discovery loop and the event loop, all
/// tied to the shared cancellation token.
async fn start_background_tasks(
    host: Arc<MeshHost>,
    sink: Arc<dyn OutputSink>,
    discovery_config: DiscoveryConfig,
    cancel: CancellationToken,
) {
    let bootstrap_addresses = match BootstrapRegistry::open_default().and_then(|r| r.list()) {
        Ok(addresses) => addresses,
        Err(e) => {
            warn!("failed to load bootstrap addresses: {e}");
            Vec::new()
        }
    };
    discovery::connect_static_bootstraps(&host, &bootstrap_addresses).await;

    tokio::spawn(discovery::run(host.clone(), discovery_config, cancel.clone()));

    let mut notifier = ConnectionNotifier::new();
    notifier.subscribe(sink.clone());
    let dispatcher = MessageDispatcher::new(vec![sink]);
    tokio::spawn(dispatch::run(host, dispatcher, notifier, cancel));
}

/// Persists the node's current self-advertisement (full addresses including
/// the peer id) together with its identity. Failure is a warning; a node can
/// run with an ephemeral identity if disk I/O fails.
async fn save_self_advertisement(
    storage: &std::path::Path,
    identity: &NodeIdentity,
    host: &MeshHost,
) {
    let addrs = await_listen_addrs(host, Duration::from_secs(2)).await;
    if addrs.is_empty() {
        warn!("no listen addresses observed yet; skipping bootstrap info save");
        return;
    }
    let full: Vec<String> = addrs
        .iter()
        .map(|addr| format!("{addr}/p2p/{}", identity.peer_id()))
        .collect();
    match identity::save(storage, identity, &full) {
        Ok(()) => info!(
            "bootstrap info saved to {}; share the addresses to let peers join",
            storage.display()
        ),
        Err(e) => warn!("failed to save bootstrap info: {e}"),
    }
}

async fn await_listen_addrs(host: &MeshHost, timeout: Duration) -> Vec<libp2p::Multiaddr> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let addrs = host.listen_addrs().await;
        if !addrs.is_empty() || tokio::time::Instant::now() >= deadline {
            return addrs;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Foreground input loop: publishes chat lines, exits on `/quit`, Ctrl-C, or
/// end of input.
async fn input_loop(host: &MeshHost, username: &str, cancel: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("signal handler error: {e}");
                }
                return;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if text == "/quit" {
                    info!("shutting down");
                    return;
                }
                let message = ChatMessage {
                    sender: username.to_string(),
                    text: text.to_string(),
                };
                match serde_json::to_vec(&message) {
                    Ok(data) => {
                        if let Err(e) = host.publish(data).await {
                            warn!("failed to publish message: {e}");
                        }
                    }
                    Err(e) => warn!("failed to encode message: {e}"),
                }
            }
            // Stdin closed or unreadable; treat like a quit.
            Ok(None) => return,
            Err(e) => {
                warn!("input error: {e}");
                return;
            }
        }
    }
}
