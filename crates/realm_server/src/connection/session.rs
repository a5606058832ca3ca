//! Server side of the wire protocol as a plain state machine.
//!
//! The session owns the frame decoder and, once established, the envelope
//! cipher. It turns raw bytes into packets and packets into bytes; it never
//! touches world state and knows nothing about sockets.

use realm_protocol::{
    derive_session_key, key_check, opcode, ClientPacket, DenyReason, FrameDecoder,
    ProtocolError, ProtocolResult, ServerPacket, SessionCipher, SessionToken, PROTOCOL_VERSION,
    SESSION_SECRET_BYTES,
};

/// The client's hello, decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub protocol_version: u16,
    pub token: SessionToken,
    pub client_nonce: u64,
    pub capabilities: u32,
}

/// What one inbound frame turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Hello(Hello),
    Packet(ClientPacket),
}

#[derive(Debug)]
enum Phase {
    AwaitHello,
    /// Hello decoded; waiting for the server to accept or deny.
    Deciding,
    Established(SessionCipher),
    Closed,
}

#[derive(Debug)]
pub struct ProtocolSession {
    server_nonce: u64,
    max_frame: u32,
    decoder: FrameDecoder,
    phase: Phase,
}

impl ProtocolSession {
    pub fn new(server_nonce: u64, max_frame: u32) -> Self {
        Self {
            server_nonce,
            max_frame,
            decoder: FrameDecoder::new(max_frame),
            phase: Phase::AwaitHello,
        }
    }

    pub fn server_nonce(&self) -> u64 {
        self.server_nonce
    }

    pub fn is_established(&self) -> bool {
        matches!(self.phase, Phase::Established(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    /// The clear-text greeting that opens every connection.
    pub fn greeting(&self) -> Vec<u8> {
        ServerPacket::Greeting {
            protocol_version: PROTOCOL_VERSION,
            server_nonce: self.server_nonce,
        }
        .to_frame()
        .encode()
    }

    /// Feeds raw socket bytes and returns every complete packet they finish.
    ///
    /// Any error leaves the session closed; the caller drops the connection.
    pub fn on_bytes(&mut self, raw: &[u8]) -> ProtocolResult<Vec<Inbound>> {
        self.decoder.push(raw);
        let mut out = Vec::new();
        loop {
            match self.next_inbound() {
                Ok(Some(inbound)) => out.push(inbound),
                Ok(None) => return Ok(out),
                Err(e) => {
                    self.phase = Phase::Closed;
                    return Err(e);
                }
            }
        }
    }

    fn next_inbound(&mut self) -> ProtocolResult<Option<Inbound>> {
        let Some(frame) = self.decoder.next_frame()? else {
            return Ok(None);
        };
        match &mut self.phase {
            Phase::AwaitHello => {
                if frame.opcode != opcode::HELLO {
                    return Err(ProtocolError::UnexpectedOpcode {
                        opcode: frame.opcode,
                        phase: "await hello",
                    });
                }
                let ClientPacket::Hello {
                    protocol_version,
                    token,
                    client_nonce,
                    capabilities,
                } = ClientPacket::from_frame(&frame)?
                else {
                    return Err(ProtocolError::UnexpectedOpcode {
                        opcode: frame.opcode,
                        phase: "await hello",
                    });
                };
                self.phase = Phase::Deciding;
                Ok(Some(Inbound::Hello(Hello {
                    protocol_version,
                    token,
                    client_nonce,
                    capabilities,
                })))
            }
            Phase::Established(cipher) => {
                let inner = cipher.open(&frame)?;
                match ClientPacket::from_frame(&inner)? {
                    ClientPacket::Hello { .. } => Err(ProtocolError::UnexpectedOpcode {
                        opcode: inner.opcode,
                        phase: "encrypted session",
                    }),
                    packet => Ok(Some(Inbound::Packet(packet))),
                }
            }
            Phase::Deciding => Err(ProtocolError::UnexpectedOpcode {
                opcode: frame.opcode,
                phase: "awaiting accept",
            }),
            Phase::Closed => Err(ProtocolError::UnexpectedOpcode {
                opcode: frame.opcode,
                phase: "closed",
            }),
        }
    }

    /// Derives the envelope key from the token's session secret and both
    /// nonces, switches to encrypted mode and returns the accept frame to
    /// send in the clear.
    pub fn accept(
        &mut self,
        hello: &Hello,
        session_id: u64,
        secret: &[u8; SESSION_SECRET_BYTES],
    ) -> ProtocolResult<Vec<u8>> {
        if !matches!(self.phase, Phase::Deciding) {
            return Err(ProtocolError::UnexpectedOpcode {
                opcode: opcode::ACCEPT,
                phase: "accept without hello",
            });
        }
        let key = derive_session_key(secret, self.server_nonce, hello.client_nonce);
        let bytes = ServerPacket::Accept {
            session_id,
            key_check: key_check(&key),
        }
        .to_frame()
        .encode();
        self.phase = Phase::Established(SessionCipher::new(key, self.max_frame));
        Ok(bytes)
    }

    /// Closes the session and returns the deny frame.
    pub fn deny(&mut self, reason: DenyReason) -> Vec<u8> {
        self.phase = Phase::Closed;
        ServerPacket::Deny { reason }.to_frame().encode()
    }

    /// Encrypts one packet for the wire.
    pub fn seal(&mut self, packet: &ServerPacket) -> ProtocolResult<Vec<u8>> {
        match &mut self.phase {
            Phase::Established(cipher) => Ok(cipher.seal(&packet.to_frame())?.encode()),
            _ => Err(ProtocolError::UnexpectedOpcode {
                opcode: packet.opcode(),
                phase: "send before accept",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_protocol::{encode_frame, ClientEvent, ClientSession, TokenAuthority, Vec3};

    const MAX_FRAME: u32 = 4096;

    fn authority() -> TokenAuthority {
        TokenAuthority::new("secret")
    }

    fn client() -> ClientSession {
        let grant = authority().grant(1, 2, 1_000, 60_000).unwrap();
        ClientSession::new(grant, 0xC11E, MAX_FRAME)
    }

    /// Runs greeting, hello and accept between the two state machines.
    fn establish() -> (ProtocolSession, ClientSession) {
        let (server, client, _) = establish_with_hello();
        (server, client)
    }

    fn establish_with_hello() -> (ProtocolSession, ClientSession, Hello) {
        let mut server = ProtocolSession::new(0x5EED, MAX_FRAME);
        let mut client = client();

        client.push(&server.greeting());
        assert_eq!(client.poll().unwrap(), None);
        let inbound = server.on_bytes(&client.take_outbound()).unwrap();
        let [Inbound::Hello(hello)] = inbound.as_slice() else {
            panic!("expected a hello, got {inbound:?}");
        };
        assert_eq!(hello.protocol_version, PROTOCOL_VERSION);

        let secret = authority().session_secret(&hello.token).unwrap();
        let accept = server.accept(hello, 42, &secret).unwrap();
        client.push(&accept);
        assert_eq!(
            client.poll().unwrap(),
            Some(ClientEvent::Established { session_id: 42 })
        );
        assert!(server.is_established());
        let hello = hello.clone();
        (server, client, hello)
    }

    #[test]
    fn key_cannot_be_rebuilt_from_values_seen_on_the_wire() {
        let (mut server, _client, hello) = establish_with_hello();
        let sealed = server
            .seal(&ServerPacket::Pong {
                client_time: 1,
                server_time: 2,
            })
            .unwrap();
        let mut decoder = FrameDecoder::new(MAX_FRAME);
        decoder.push(&sealed);
        let envelope = decoder.next_frame().unwrap().unwrap();

        let observed = [
            derive_session_key(&hello.token.signature, server.server_nonce(), hello.client_nonce),
            derive_session_key(&[], server.server_nonce(), hello.client_nonce),
        ];
        for key in observed {
            let mut eavesdropper = SessionCipher::new(key, MAX_FRAME);
            assert!(eavesdropper.open(&envelope).is_err());
        }
    }

    #[test]
    fn client_with_wrong_secret_rejects_accept() {
        let mut server = ProtocolSession::new(0x5EED, MAX_FRAME);
        let token = authority().issue(1, 2, 1_000, 60_000).unwrap();
        let stolen = realm_protocol::SessionGrant {
            token,
            secret: [0u8; SESSION_SECRET_BYTES],
        };
        let mut client = ClientSession::new(stolen, 0xC11E, MAX_FRAME);
        client.push(&server.greeting());
        client.poll().unwrap();
        let inbound = server.on_bytes(&client.take_outbound()).unwrap();
        let [Inbound::Hello(hello)] = inbound.as_slice() else {
            panic!("expected a hello, got {inbound:?}");
        };
        let secret = authority().session_secret(&hello.token).unwrap();
        client.push(&server.accept(hello, 1, &secret).unwrap());
        assert!(matches!(client.poll(), Err(ProtocolError::Decrypt(_))));
    }

    #[test]
    fn handshake_then_encrypted_traffic_both_ways() {
        let (mut server, mut client) = establish();

        client
            .send(&ClientPacket::Move {
                position: Vec3::new(1.0, 0.0, 2.0),
                rotation: 0.5,
            })
            .unwrap();
        client.send(&ClientPacket::Ping { client_time: 9 }).unwrap();
        let inbound = server.on_bytes(&client.take_outbound()).unwrap();
        assert_eq!(inbound.len(), 2);
        assert_eq!(
            inbound[1],
            Inbound::Packet(ClientPacket::Ping { client_time: 9 })
        );

        let pong = ServerPacket::Pong {
            client_time: 9,
            server_time: 10,
        };
        client.push(&server.seal(&pong).unwrap());
        assert_eq!(client.poll().unwrap(), Some(ClientEvent::Packet(pong)));
    }

    #[test]
    fn game_packet_before_hello_is_fatal() {
        let mut server = ProtocolSession::new(1, MAX_FRAME);
        let frame = ClientPacket::Logout.to_frame().encode();
        assert!(matches!(
            server.on_bytes(&frame),
            Err(ProtocolError::UnexpectedOpcode { .. })
        ));
        assert!(server.is_closed());
    }

    #[test]
    fn clear_text_after_establishment_is_fatal() {
        let (mut server, _client) = establish();
        let frame = ClientPacket::Logout.to_frame().encode();
        assert!(server.on_bytes(&frame).is_err());
        assert!(server.is_closed());
    }

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let mut server = ProtocolSession::new(1, MAX_FRAME);
        let mut client = client();
        client.push(&server.greeting());
        client.poll().unwrap();
        let hello = client.take_outbound();

        let (head, tail) = hello.split_at(5);
        assert!(server.on_bytes(head).unwrap().is_empty());
        assert_eq!(server.on_bytes(tail).unwrap().len(), 1);
    }

    #[test]
    fn oversized_length_is_fatal() {
        let mut server = ProtocolSession::new(1, 64);
        let frame = encode_frame(opcode::HELLO, &[0u8; 200]);
        assert!(matches!(
            server.on_bytes(&frame),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn deny_closes_and_is_readable_by_client() {
        let mut server = ProtocolSession::new(1, MAX_FRAME);
        let mut client = client();
        client.push(&server.greeting());
        client.poll().unwrap();
        server.on_bytes(&client.take_outbound()).unwrap();

        client.push(&server.deny(DenyReason::TokenExpired));
        assert_eq!(
            client.poll().unwrap(),
            Some(ClientEvent::Denied(DenyReason::TokenExpired))
        );
        assert!(server.is_closed());
        assert!(server.seal(&ServerPacket::Pong { client_time: 0, server_time: 0 }).is_err());
    }
}
