//! XTEA envelope cipher and per-session key derivation.
//!
//! After the handshake every frame travels inside an [`opcode::ENVELOPE`]
//! frame whose payload is the XTEA encryption of
//! `[sequence:u32][inner frame][pad 0x33 ...]`. Each direction keeps its own
//! sequence counter; a gap or replay is a protocol error.

use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{parse_frame, Frame};
use crate::opcode;

pub const KEY_BYTES: usize = 16;
pub const BLOCK_BYTES: usize = 8;
const DELTA: u32 = 0x9e37_79b9;
const ROUNDS: u32 = 32;
const PAD_BYTE: u8 = 0x33;
const KEY_LABEL: &[u8] = b"realm-envelope";
const CHECK_LABEL: &[u8] = b"realm-key-check";

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct XteaKey {
    words: [u32; 4],
}

impl std::fmt::Debug for XteaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("XteaKey(<redacted>)")
    }
}

impl XteaKey {
    pub fn from_bytes(bytes: [u8; KEY_BYTES]) -> Self {
        let mut words = [0u32; 4];
        for (idx, chunk) in bytes.chunks_exact(4).enumerate() {
            words[idx] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self { words }
    }

    pub fn encrypt_in_place(&self, data: &mut [u8]) -> ProtocolResult<()> {
        if data.len() % BLOCK_BYTES != 0 {
            return Err(ProtocolError::Decrypt(format!(
                "encrypt length {} is not a multiple of {BLOCK_BYTES}",
                data.len()
            )));
        }
        let k = &self.words;
        for block in data.chunks_exact_mut(BLOCK_BYTES) {
            let (mut v0, mut v1) = split_block(block);
            let mut sum = 0u32;
            for _ in 0..ROUNDS {
                v0 = v0.wrapping_add(
                    ((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1) ^ sum.wrapping_add(k[(sum & 3) as usize]),
                );
                sum = sum.wrapping_add(DELTA);
                v1 = v1.wrapping_add(
                    ((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0)
                        ^ sum.wrapping_add(k[((sum >> 11) & 3) as usize]),
                );
            }
            join_block(block, v0, v1);
        }
        Ok(())
    }

    pub fn decrypt_in_place(&self, data: &mut [u8]) -> ProtocolResult<()> {
        if data.len() % BLOCK_BYTES != 0 {
            return Err(ProtocolError::Decrypt(format!(
                "ciphertext length {} is not a multiple of {BLOCK_BYTES}",
                data.len()
            )));
        }
        let k = &self.words;
        for block in data.chunks_exact_mut(BLOCK_BYTES) {
            let (mut v0, mut v1) = split_block(block);
            let mut sum = DELTA.wrapping_mul(ROUNDS);
            for _ in 0..ROUNDS {
                v1 = v1.wrapping_sub(
                    ((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0)
                        ^ sum.wrapping_add(k[((sum >> 11) & 3) as usize]),
                );
                sum = sum.wrapping_sub(DELTA);
                v0 = v0.wrapping_sub(
                    ((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1) ^ sum.wrapping_add(k[(sum & 3) as usize]),
                );
            }
            join_block(block, v0, v1);
        }
        Ok(())
    }
}

fn split_block(block: &[u8]) -> (u32, u32) {
    (
        u32::from_le_bytes([block[0], block[1], block[2], block[3]]),
        u32::from_le_bytes([block[4], block[5], block[6], block[7]]),
    )
}

fn join_block(block: &mut [u8], v0: u32, v1: u32) {
    block[..4].copy_from_slice(&v0.to_le_bytes());
    block[4..].copy_from_slice(&v1.to_le_bytes());
}

/// Derives the 128-bit envelope key from the session secret and both nonces.
///
/// The nonces travel in the clear, so the secret must not.
pub fn derive_session_key(session_secret: &[u8], server_nonce: u64, client_nonce: u64) -> [u8; KEY_BYTES] {
    let mut hasher = Sha256::new();
    hasher.update(KEY_LABEL);
    hasher.update(session_secret);
    hasher.update(server_nonce.to_le_bytes());
    hasher.update(client_nonce.to_le_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; KEY_BYTES];
    key.copy_from_slice(&digest[..KEY_BYTES]);
    key
}

/// Short confirmation value sent in the accept packet so the client can
/// verify both sides derived the same key without the key crossing the wire.
pub fn key_check(key: &[u8; KEY_BYTES]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(CHECK_LABEL);
    hasher.update(key);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(out)
}

/// Encrypting side of one established session.
#[derive(Debug)]
pub struct SessionCipher {
    key: XteaKey,
    send_sequence: u32,
    recv_sequence: u32,
    max_frame: u32,
}

impl SessionCipher {
    pub fn new(key: [u8; KEY_BYTES], max_frame: u32) -> Self {
        Self {
            key: XteaKey::from_bytes(key),
            send_sequence: 0,
            recv_sequence: 0,
            max_frame,
        }
    }

    pub fn send_sequence(&self) -> u32 {
        self.send_sequence
    }

    /// Wraps `inner` into an encrypted envelope frame.
    pub fn seal(&mut self, inner: &Frame) -> ProtocolResult<Frame> {
        let body = inner.encode();
        let mut plain = Vec::with_capacity(4 + body.len() + BLOCK_BYTES);
        plain.extend_from_slice(&self.send_sequence.to_le_bytes());
        plain.extend_from_slice(&body);
        let padding = (BLOCK_BYTES - plain.len() % BLOCK_BYTES) % BLOCK_BYTES;
        plain.resize(plain.len() + padding, PAD_BYTE);
        self.key.encrypt_in_place(&mut plain)?;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        Ok(Frame::new(opcode::ENVELOPE, plain))
    }

    /// Decrypts an envelope and returns the inner frame.
    ///
    /// Anything short of a well-formed plaintext with the expected sequence
    /// number is an error; there is no partial processing.
    pub fn open(&mut self, envelope: &Frame) -> ProtocolResult<Frame> {
        if envelope.opcode != opcode::ENVELOPE {
            return Err(ProtocolError::UnexpectedOpcode {
                opcode: envelope.opcode,
                phase: "encrypted session",
            });
        }
        let mut plain = envelope.payload.clone();
        self.key.decrypt_in_place(&mut plain)?;
        if plain.len() < 4 {
            return Err(ProtocolError::Decrypt("envelope shorter than sequence".into()));
        }
        let sequence = u32::from_le_bytes([plain[0], plain[1], plain[2], plain[3]]);
        if sequence != self.recv_sequence {
            return Err(ProtocolError::Sequence {
                expected: self.recv_sequence,
                got: sequence,
            });
        }
        let (inner, used) = parse_frame(&plain[4..], self.max_frame)
            .map_err(|e| ProtocolError::Decrypt(format!("inner frame: {e}")))?
            .ok_or_else(|| ProtocolError::Decrypt("inner frame incomplete".into()))?;
        let padding = &plain[4 + used..];
        if padding.len() >= BLOCK_BYTES || padding.iter().any(|b| *b != PAD_BYTE) {
            return Err(ProtocolError::Decrypt("malformed envelope padding".into()));
        }
        self.recv_sequence = self.recv_sequence.wrapping_add(1);
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (SessionCipher, SessionCipher) {
        let key = derive_session_key(&[7u8; 32], 1, 2);
        (SessionCipher::new(key, 4096), SessionCipher::new(key, 4096))
    }

    #[test]
    fn xtea_block_round_trip() {
        let key = XteaKey::from_bytes([0x11; KEY_BYTES]);
        let mut data = *b"12345678abcdefgh";
        key.encrypt_in_place(&mut data).unwrap();
        assert_ne!(&data, b"12345678abcdefgh");
        key.decrypt_in_place(&mut data).unwrap();
        assert_eq!(&data, b"12345678abcdefgh");
    }

    #[test]
    fn unaligned_ciphertext_is_rejected() {
        let key = XteaKey::from_bytes([0x22; KEY_BYTES]);
        assert!(key.decrypt_in_place(&mut [0u8; 7]).is_err());
    }

    #[test]
    fn envelope_round_trips_in_order() {
        let (mut server, mut client) = pair();
        for n in 0..3u8 {
            let inner = Frame::new(0x0201, vec![n; n as usize * 3]);
            let sealed = server.seal(&inner).unwrap();
            assert_eq!(sealed.payload.len() % BLOCK_BYTES, 0);
            assert_eq!(client.open(&sealed).unwrap(), inner);
        }
    }

    #[test]
    fn replayed_envelope_is_rejected() {
        let (mut server, mut client) = pair();
        let sealed = server.seal(&Frame::new(0x0105, vec![1])).unwrap();
        client.open(&sealed).unwrap();
        assert_eq!(
            client.open(&sealed),
            Err(ProtocolError::Sequence { expected: 1, got: 0 })
        );
    }

    #[test]
    fn wrong_key_cannot_open() {
        let mut server = SessionCipher::new(derive_session_key(&[1; 32], 1, 1), 4096);
        let mut client = SessionCipher::new(derive_session_key(&[2; 32], 1, 1), 4096);
        let sealed = server.seal(&Frame::new(0x0105, vec![0; 8])).unwrap();
        assert!(client.open(&sealed).is_err());
    }

    #[test]
    fn nonces_change_the_key() {
        let a = derive_session_key(&[0; 32], 1, 2);
        let b = derive_session_key(&[0; 32], 2, 1);
        assert_ne!(a, b);
        assert_ne!(key_check(&a), key_check(&b));
    }
}
