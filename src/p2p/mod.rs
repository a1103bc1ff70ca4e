//! Peer-to-peer layer: libp2p host wiring, mesh discovery, connection
//! notification, and inbound dispatch.
//!
//! The host (`network`) is the only module that touches libp2p internals;
//! everything above it speaks in `PeerId`s, `Multiaddr`s, and raw payload
//! bytes.

pub mod discovery;
pub mod dispatch;
pub mod network;
pub mod notifier;

pub use discovery::{DeadPeerList, DiscoveryConfig, MESH_NAMESPACE};
pub use dispatch::MessageDispatcher;
pub use network::{HostConfig, HostEvent, MeshHost, PeerCandidate};
pub use notifier::{ConnectionNotifier, ConsoleSink, OutputSink};
