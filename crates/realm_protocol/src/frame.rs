//! Stream framing: `[length:u32][opcode:u16][payload]`, little-endian.
//!
//! `length` counts the opcode and payload bytes, so the smallest legal frame
//! has `length == 2`.

use crate::error::{ProtocolError, ProtocolResult};

pub const LENGTH_FIELD: usize = 4;
pub const OPCODE_FIELD: usize = 2;
pub const DEFAULT_MAX_FRAME: u32 = 64 * 1024;

/// One opcode-tagged frame lifted off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: u16, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// Serializes the frame including its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.opcode, &self.payload)
    }
}

pub fn encode_frame(opcode: u16, payload: &[u8]) -> Vec<u8> {
    let length = (OPCODE_FIELD + payload.len()) as u32;
    let mut out = Vec::with_capacity(LENGTH_FIELD + length as usize);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&opcode.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parses exactly one complete frame from `bytes`, returning it together with
/// the number of bytes consumed, or `None` when more bytes are needed.
pub fn parse_frame(bytes: &[u8], max_frame: u32) -> ProtocolResult<Option<(Frame, usize)>> {
    if bytes.len() < LENGTH_FIELD {
        return Ok(None);
    }
    let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if (length as usize) < OPCODE_FIELD {
        return Err(ProtocolError::FrameTooShort(length));
    }
    if length > max_frame {
        return Err(ProtocolError::FrameTooLarge {
            length,
            max: max_frame,
        });
    }
    let total = LENGTH_FIELD + length as usize;
    if bytes.len() < total {
        return Ok(None);
    }
    let opcode = u16::from_le_bytes([bytes[LENGTH_FIELD], bytes[LENGTH_FIELD + 1]]);
    let payload = bytes[LENGTH_FIELD + OPCODE_FIELD..total].to_vec();
    Ok(Some((Frame { opcode, payload }, total)))
}

/// Incremental decoder for a TCP byte stream.
///
/// Bytes are appended with [`FrameDecoder::push`] as they arrive and complete
/// frames are drained with [`FrameDecoder::next_frame`]. A length prefix
/// that is too short or too large poisons the stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame: u32,
}

impl FrameDecoder {
    pub fn new(max_frame: u32) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_frame,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> ProtocolResult<Option<Frame>> {
        match parse_frame(&self.buffer, self.max_frame)? {
            Some((frame, consumed)) => {
                self.buffer.drain(..consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}
