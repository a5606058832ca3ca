//! Client side of the handshake and envelope, used by the load bot and by
//! server integration tests.
//!
//! The type is transport agnostic: feed it received bytes with
//! [`ClientSession::push`], drain events with [`ClientSession::poll`] and
//! write whatever [`ClientSession::take_outbound`] returns to the socket.

use crate::crypto::{derive_session_key, key_check, SessionCipher};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::FrameDecoder;
use crate::packet::{ClientPacket, DenyReason, ServerPacket};
use crate::token::SessionGrant;
use crate::PROTOCOL_VERSION;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake finished, the stream is now encrypted.
    Established { session_id: u64 },
    Denied(DenyReason),
    Packet(ServerPacket),
}

#[derive(Debug)]
enum Phase {
    AwaitGreeting,
    AwaitAccept { key: [u8; 16] },
    Established(SessionCipher),
    Closed,
}

#[derive(Debug)]
pub struct ClientSession {
    grant: SessionGrant,
    client_nonce: u64,
    capabilities: u32,
    protocol_version: u16,
    max_frame: u32,
    decoder: FrameDecoder,
    phase: Phase,
    outbound: Vec<u8>,
}

impl ClientSession {
    pub fn new(grant: SessionGrant, client_nonce: u64, max_frame: u32) -> Self {
        Self {
            grant,
            client_nonce,
            capabilities: 0,
            protocol_version: PROTOCOL_VERSION,
            max_frame,
            decoder: FrameDecoder::new(max_frame),
            phase: Phase::AwaitGreeting,
            outbound: Vec::new(),
        }
    }

    /// Overrides the advertised protocol version. Test hook for version
    /// mismatch handling.
    pub fn with_protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_capabilities(mut self, capabilities: u32) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn is_established(&self) -> bool {
        matches!(self.phase, Phase::Established(_))
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.decoder.push(bytes);
    }

    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    /// Encrypts and queues a game command.
    pub fn send(&mut self, packet: &ClientPacket) -> ProtocolResult<()> {
        match &mut self.phase {
            Phase::Established(cipher) => {
                let sealed = cipher.seal(&packet.to_frame())?;
                self.outbound.extend(sealed.encode());
                Ok(())
            }
            _ => Err(ProtocolError::UnexpectedOpcode {
                opcode: packet.opcode(),
                phase: "client handshake",
            }),
        }
    }

    /// Queues raw bytes, bypassing the cipher. Test hook for malformed input.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    pub fn poll(&mut self) -> ProtocolResult<Option<ClientEvent>> {
        loop {
            let Some(frame) = self.decoder.next_frame()? else {
                return Ok(None);
            };
            match std::mem::replace(&mut self.phase, Phase::Closed) {
                Phase::AwaitGreeting => {
                    let ServerPacket::Greeting {
                        protocol_version: _,
                        server_nonce,
                    } = ServerPacket::from_frame(&frame)?
                    else {
                        return Err(ProtocolError::UnexpectedOpcode {
                            opcode: frame.opcode,
                            phase: "await greeting",
                        });
                    };
                    let hello = ClientPacket::Hello {
                        protocol_version: self.protocol_version,
                        token: self.grant.token.clone(),
                        client_nonce: self.client_nonce,
                        capabilities: self.capabilities,
                    };
                    self.outbound.extend(hello.to_frame().encode());
                    let key = derive_session_key(&self.grant.secret, server_nonce, self.client_nonce);
                    self.phase = Phase::AwaitAccept { key };
                }
                Phase::AwaitAccept { key } => match ServerPacket::from_frame(&frame)? {
                    ServerPacket::Accept {
                        session_id,
                        key_check: check,
                    } => {
                        if check != key_check(&key) {
                            return Err(ProtocolError::Decrypt(
                                "server key confirmation mismatch".into(),
                            ));
                        }
                        self.phase = Phase::Established(SessionCipher::new(key, self.max_frame));
                        return Ok(Some(ClientEvent::Established { session_id }));
                    }
                    ServerPacket::Deny { reason } => {
                        return Ok(Some(ClientEvent::Denied(reason)));
                    }
                    _ => {
                        return Err(ProtocolError::UnexpectedOpcode {
                            opcode: frame.opcode,
                            phase: "await accept",
                        })
                    }
                },
                Phase::Established(mut cipher) => {
                    let inner = cipher.open(&frame)?;
                    self.phase = Phase::Established(cipher);
                    return Ok(Some(ClientEvent::Packet(ServerPacket::from_frame(&inner)?)));
                }
                Phase::Closed => {
                    return Err(ProtocolError::UnexpectedOpcode {
                        opcode: frame.opcode,
                        phase: "closed",
                    })
                }
            }
        }
    }
}
