//! # Realm wire protocol
//!
//! Everything needed to speak to a Realm zone server over TCP:
//!
//! - [`frame`] - `[length:u32][opcode:u16][payload]` stream framing
//! - [`codec`] - strict little-endian readers and writers
//! - [`packet`] - typed [`ClientPacket`] / [`ServerPacket`] enums
//! - [`crypto`] - XTEA envelope cipher and key derivation
//! - [`token`] - HMAC signed session tokens
//! - [`client`] - a transport agnostic client handshake driver
//!
//! The crate has no async runtime dependency; sessions on both sides are
//! plain state machines driven by whoever owns the socket.

pub mod client;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod opcode;
pub mod packet;
pub mod token;
pub mod types;

pub use client::{ClientEvent, ClientSession};
pub use codec::{PacketReader, PacketWriter};
pub use crypto::{derive_session_key, key_check, SessionCipher};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{encode_frame, Frame, FrameDecoder, DEFAULT_MAX_FRAME};
pub use packet::{
    ClientPacket, DenyReason, DisconnectReason, RejectReason, ServerPacket, WhisperOutcome,
};
pub use token::{SessionGrant, SessionToken, TokenAuthority, TokenError, SESSION_SECRET_BYTES};
pub use types::{EntityKind, Guid, Vec3};

/// Version announced in the greeting. A hello carrying any other value is
/// denied with [`DenyReason::VersionMismatch`].
pub const PROTOCOL_VERSION: u16 = 4;
