//! Meshtalk
//!
//! A peer-to-peer mesh chat node. Transport, DHT routing, and gossip
//! broadcast are delegated to libp2p; this crate authors what sits on top:
//!
//! - **Identity**: a durable signing keypair and derived peer id, persisted
//!   so a bootstrap node keeps a stable identity across restarts.
//! - **Bootstrap registry**: a small file-backed address book of known mesh
//!   entry points, with add/remove/list and deduplication.
//! - **Discovery**: a recurring advertise/scan/dial loop over a shared DHT
//!   rendezvous namespace, with a cooldown for peers that recently failed
//!   to connect.
//! - **Dispatch**: classification of inbound pub/sub payloads into chat
//!   messages, system notifications, or a raw fallback, routed to the
//!   appropriate output sink.
//!
//! The `meshtalk` binary exposes the node roles (client and bootstrap) and
//! the registry maintenance commands.

pub mod config;
pub mod error;
pub mod identity;
pub mod messages;
pub mod node;
pub mod p2p;
pub mod registry;

pub use error::MeshError;
pub use identity::NodeIdentity;
pub use messages::{classify, ChatMessage, InboundEnvelope, SystemNotification};
pub use registry::BootstrapRegistry;
