// Transport abstraction: a lossy, unordered broadcast channel between engines.
//
// The engine only needs "send to everyone", "send while tearing down" and a
// stream of inbound messages. Delivery may drop, duplicate or reorder
// messages; the protocol tolerates all three.

pub mod memory;
pub mod udp;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryHub, MemoryTransport};
pub use udp::UdpMulticastTransport;

/// Capacity of the channel between a transport's reader and the engine.
pub const INBOUND_CHANNEL_CAPACITY: usize = 512;

/// Inbound messages from any peer. Dropping the receiver ends the subscription.
///
/// An `Err` item or the end of the stream is a terminal transport failure.
pub type Inbound = mpsc::Receiver<Result<Value, TransportError>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport closed: {0}")]
    Closed(String),
}

/// Broadcast channel shared with, but not owned by, the engine.
///
/// `send` and `send_beacon` must not block; they hand the message off and
/// return. `listen` must be called from within a Tokio runtime.
pub trait Transport: Send + Sync + 'static {
    /// Best-effort broadcast to every other connected peer.
    fn send(&self, message: &Value) -> Result<(), TransportError>;

    /// Like `send`, but usable while the process is shutting down.
    fn send_beacon(&self, message: &Value) -> Result<(), TransportError> {
        self.send(message)
    }

    /// Subscribe to inbound messages from any peer.
    fn listen(&self) -> Result<Inbound, TransportError>;
}
