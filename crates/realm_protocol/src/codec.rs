//! Little-endian cursor reader and growable writer for packet bodies.
//!
//! The reader is strict: every read checks the remaining length and a
//! string whose declared length runs past the end of the buffer is an error,
//! never a silent truncation.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Guid, Vec3};

#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..start + len])
    }

    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_le(&mut self) -> ProtocolResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&mut self) -> ProtocolResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> ProtocolResult<u64> {
        let low = self.read_u32_le()? as u64;
        let high = self.read_u32_le()? as u64;
        Ok(low | (high << 32))
    }

    pub fn read_f32_le(&mut self, field: &'static str) -> ProtocolResult<f32> {
        let value = f32::from_bits(self.read_u32_le()?);
        if !value.is_finite() {
            return Err(ProtocolError::NonFinite(field));
        }
        Ok(value)
    }

    pub fn read_guid(&mut self) -> ProtocolResult<Guid> {
        Ok(Guid(self.read_u64_le()?))
    }

    pub fn read_vec3(&mut self, field: &'static str) -> ProtocolResult<Vec3> {
        Ok(Vec3 {
            x: self.read_f32_le(field)?,
            y: self.read_f32_le(field)?,
            z: self.read_f32_le(field)?,
        })
    }

    pub fn read_bytes(&mut self, len: usize) -> ProtocolResult<&'a [u8]> {
        self.take(len)
    }

    pub fn read_array<const N: usize>(&mut self) -> ProtocolResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a `u16`-length-prefixed UTF-8 string of at most `max_len` bytes.
    pub fn read_string(&mut self, max_len: usize) -> ProtocolResult<String> {
        let declared = self.read_u16_le()? as usize;
        if declared > self.remaining() {
            return Err(ProtocolError::StringOverrun {
                declared,
                remaining: self.remaining(),
            });
        }
        if declared > max_len {
            return Err(ProtocolError::StringTooLong {
                length: declared,
                limit: max_len,
            });
        }
        let bytes = self.take(declared)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Fails if any unread bytes remain.
    pub fn finish(&self) -> ProtocolResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.write_u32_le((value & 0xffff_ffff) as u32);
        self.write_u32_le((value >> 32) as u32);
    }

    pub fn write_f32_le(&mut self, value: f32) {
        self.write_u32_le(value.to_bits());
    }

    pub fn write_guid(&mut self, guid: Guid) {
        self.write_u64_le(guid.0);
    }

    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32_le(value.x);
        self.write_f32_le(value.y);
        self.write_f32_le(value.z);
    }

    /// Writes a `u16`-length-prefixed string. Strings longer than `u16::MAX`
    /// bytes are cut at the last char boundary that fits.
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_u16_le(end as u16);
        self.write_bytes(&value.as_bytes()[..end]);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_overrun_is_an_error_not_a_truncation() {
        let mut writer = PacketWriter::new();
        writer.write_u16_le(10);
        writer.write_bytes(b"abc");
        let mut reader = PacketReader::new(writer.as_slice());
        assert_eq!(
            reader.read_string(64),
            Err(ProtocolError::StringOverrun {
                declared: 10,
                remaining: 3
            })
        );
    }

    #[test]
    fn string_over_limit_is_rejected() {
        let mut writer = PacketWriter::new();
        writer.write_string("abcdefghij");
        let mut reader = PacketReader::new(writer.as_slice());
        assert!(matches!(
            reader.read_string(4),
            Err(ProtocolError::StringTooLong { length: 10, limit: 4 })
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut writer = PacketWriter::new();
        writer.write_u16_le(2);
        writer.write_bytes(&[0xff, 0xfe]);
        let mut reader = PacketReader::new(writer.as_slice());
        assert_eq!(reader.read_string(16), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        let mut writer = PacketWriter::new();
        writer.write_f32_le(f32::NAN);
        let mut reader = PacketReader::new(writer.as_slice());
        assert_eq!(
            reader.read_f32_le("x"),
            Err(ProtocolError::NonFinite("x"))
        );
    }

    #[test]
    fn truncated_integer_reports_sizes() {
        let mut reader = PacketReader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u32_le(),
            Err(ProtocolError::Truncated {
                needed: 4,
                remaining: 3
            })
        );
    }

    #[test]
    fn finish_detects_trailing_bytes() {
        let mut reader = PacketReader::new(&[1, 2, 3]);
        reader.read_u8().unwrap();
        assert_eq!(reader.finish(), Err(ProtocolError::TrailingBytes(2)));
    }
}
