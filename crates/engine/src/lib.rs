// copresence-engine: leaderless presence synchronization over a lossy broadcast transport.

pub mod config;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod scheduler;
pub mod snapshot;
pub mod state_table;
pub mod transport;

pub use config::{EngineConfig, PresenceConfig};
pub use engine::{EngineStatus, PresenceEngine};
pub use error::PresenceError;
pub use notifier::Subscription;
pub use snapshot::{Payload, PresenceState, Snapshot};
pub use transport::{Inbound, Transport, TransportError};
