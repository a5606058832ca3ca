//! Error types for the network front end.

use realm_protocol::{DenyReason, ProtocolError};

/// Failures of the server as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or accepting failed
    #[error("Network error: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a single connection ends abnormally. None of these affect other
/// sessions or any zone.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("handshake not completed within {0}ms")]
    HandshakeTimeout(u64),

    #[error("peer closed the connection during the handshake")]
    ClosedDuringHandshake,

    #[error("hello refused: {0}")]
    Denied(DenyReason),
}
