//! Error types for wire decoding, framing and the envelope cipher.
//!
//! Every variant here is fatal to the connection that produced it. Callers
//! never try to resynchronise a stream after a `ProtocolError`.

/// Failures raised while turning bytes into frames and packets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A field needed more bytes than the buffer had left
    #[error("truncated field: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string declared a length larger than the rest of the payload
    #[error("string length {declared} exceeds remaining {remaining} bytes")]
    StringOverrun { declared: usize, remaining: usize },

    /// A string was longer than the configured limit
    #[error("string length {length} exceeds limit {limit}")]
    StringTooLong { length: usize, limit: usize },

    /// String bytes were not valid UTF-8
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// Frame length prefix was smaller than the opcode field
    #[error("frame length {0} is shorter than the opcode field")]
    FrameTooShort(u32),

    /// Frame length prefix exceeded the configured maximum
    #[error("frame length {length} exceeds maximum {max}")]
    FrameTooLarge { length: u32, max: u32 },

    /// Payload had bytes left over after the packet was decoded
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),

    /// An enum discriminant on the wire had no matching variant
    #[error("invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: u64 },

    /// A float field carried NaN or infinity
    #[error("non-finite float in {0}")]
    NonFinite(&'static str),

    /// Envelope could not be decrypted or its plaintext was malformed
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Envelope sequence number did not match the expected value
    #[error("envelope sequence {got} does not match expected {expected}")]
    Sequence { expected: u32, got: u32 },

    /// A packet arrived that is not legal in the current handshake phase
    #[error("unexpected opcode {opcode:#06x} during {phase}")]
    UnexpectedOpcode { opcode: u16, phase: &'static str },
}

/// Convenience alias used throughout the crate.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
