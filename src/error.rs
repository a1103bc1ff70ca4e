//! Error types for the meshtalk node.

use thiserror::Error;

/// Errors surfaced by the node, its storage layer and the network glue.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid address: {0}")]
    Address(String),

    #[error("network error: {0}")]
    Network(String),

    /// The DHT routing table has no entries yet. Expected during startup and
    /// suppressed by the discovery loop.
    #[error("no peers in routing table yet")]
    EmptyRoutingTable,

    #[error("bootstrap address already exists: {0}")]
    AlreadyExists(String),

    #[error("bootstrap address not found: {0}")]
    NotFound(String),
}
