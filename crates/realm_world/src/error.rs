//! Error types for the world crate.

use realm_protocol::{Guid, RejectReason};

use crate::types::{CharacterId, ZoneId, ZoneKey};

/// Outcome of a zone operation that did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneError {
    /// Validation failure reported back to the sender; the session stays open
    #[error("command rejected: {0:?}")]
    Rejected(RejectReason),

    /// The instance is at its player cap
    #[error("zone {0} is full")]
    Full(ZoneKey),

    /// The instance has stopped or is stopping
    #[error("zone {0} is not accepting entities")]
    NotAccepting(ZoneKey),

    /// The guid is already owned by some zone
    #[error("entity {0} is already present in a zone")]
    AlreadyPresent(Guid),

    #[error("unknown zone {0}")]
    UnknownZone(ZoneId),

    /// The zone actor is gone or dropped the reply
    #[error("zone {0} is unavailable")]
    Unavailable(ZoneKey),

    #[error("zone supervisor is unavailable")]
    SupervisorUnavailable,
}

impl ZoneError {
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            Self::Rejected(reason) => *reason,
            _ => RejectReason::Internal,
        }
    }
}

/// Failures of the character persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("character {0} not found")]
    NotFound(CharacterId),

    #[error("character {character} does not belong to account {account}")]
    AccountMismatch { character: CharacterId, account: u64 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Problems loading static content.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("failed to read content file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse content: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("spawn {spawn_id} references unknown creature template {creature_id}")]
    UnknownTemplate { spawn_id: u64, creature_id: u32 },

    #[error("duplicate {kind} id {id}")]
    Duplicate { kind: &'static str, id: u64 },

    #[error("invalid creature template {id}: {reason}")]
    InvalidTemplate { id: u32, reason: String },
}
