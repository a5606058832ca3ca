//! Connection tracking and the per-connection protocol state machine.

pub mod manager;
pub mod session;

pub use manager::{ConnectionInfo, ConnectionManager, ConnectionPhase};
pub use session::{Hello, Inbound, ProtocolSession};

/// Identifies one accepted socket for its lifetime. Also sent to the client
/// as the session id.
pub type ConnectionId = u64;
