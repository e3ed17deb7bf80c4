use copresence_common::protocol::presence::WireError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors surfaced by the public engine API.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The engine was closed (explicitly, by dropping it, or after a transport failure).
    #[error("presence engine is closed")]
    Closed,
    /// The engine was started outside a Tokio runtime.
    #[error("presence engine requires a running tokio runtime")]
    NoRuntime,
    /// The local payload cannot be expressed on the wire.
    #[error("failed to encode presence payload: {0}")]
    Encode(#[from] WireError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
