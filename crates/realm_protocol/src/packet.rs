//! Typed packets for both directions.
//!
//! Decoding is exhaustive: every known opcode maps to a variant and anything
//! else in a client stream becomes [`ClientPacket::Unrecognized`] so the
//! session can log and drop it. Server packets are only ever decoded by
//! clients, which treat an unknown opcode as a protocol error.

use crate::codec::{PacketReader, PacketWriter};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::Frame;
use crate::opcode;
use crate::token::SessionToken;
use crate::types::{Guid, Vec3};

/// Largest chat message accepted on the wire. Servers may enforce less.
pub const MAX_MESSAGE_BYTES: usize = 1024;
pub const MAX_NAME_BYTES: usize = 64;
pub const MAX_WAYPOINTS: usize = 64;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_u8(value: u8) -> ProtocolResult<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(ProtocolError::InvalidValue {
                        field: $field,
                        value: other as u64,
                    }),
                }
            }
        }
    };
}

wire_enum!(
    /// Why a hello was refused.
    DenyReason, "deny_reason" {
        VersionMismatch = 1,
        InvalidToken = 2,
        TokenExpired = 3,
        AccountSuspended = 4,
        NoCapacity = 5,
        Unavailable = 6,
        AlreadyOnline = 7,
    }
);

wire_enum!(
    /// Why a game command had no effect. The session stays open.
    RejectReason, "reject_reason" {
        UnknownTarget = 1,
        TargetOutOfRange = 2,
        ActorDead = 3,
        TargetDead = 4,
        InvalidTarget = 5,
        MoveTooFar = 6,
        OutOfBounds = 7,
        InvalidMessage = 8,
        RateLimited = 9,
        CooldownActive = 10,
        NotInZone = 11,
        Internal = 12,
    }
);

wire_enum!(
    WhisperOutcome, "whisper_outcome" {
        Delivered = 1,
        NotFound = 2,
        Timeout = 3,
    }
);

wire_enum!(
    /// Why the server is closing an established session.
    DisconnectReason, "disconnect_reason" {
        TokenExpired = 1,
        ServerShutdown = 2,
        RateLimited = 3,
        Logout = 4,
        ZoneUnavailable = 5,
    }
);

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::VersionMismatch => "version-mismatch",
            Self::InvalidToken => "invalid-token",
            Self::TokenExpired => "token-expired",
            Self::AccountSuspended => "account-suspended",
            Self::NoCapacity => "no-capacity",
            Self::Unavailable => "unavailable",
            Self::AlreadyOnline => "already-online",
        };
        f.write_str(text)
    }
}

/// Packets a client sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    Hello {
        protocol_version: u16,
        token: SessionToken,
        client_nonce: u64,
        capabilities: u32,
    },
    Move {
        position: Vec3,
        rotation: f32,
    },
    Attack {
        target: Guid,
    },
    Say {
        message: String,
    },
    Whisper {
        target_character: u64,
        message: String,
    },
    Ping {
        client_time: u64,
    },
    Logout,
    /// An opcode this server does not know. Logged and dropped.
    Unrecognized {
        opcode: u16,
        payload_len: usize,
    },
}

impl ClientPacket {
    pub fn opcode(&self) -> u16 {
        match self {
            Self::Hello { .. } => opcode::HELLO,
            Self::Move { .. } => opcode::MOVE,
            Self::Attack { .. } => opcode::ATTACK,
            Self::Say { .. } => opcode::SAY,
            Self::Whisper { .. } => opcode::WHISPER,
            Self::Ping { .. } => opcode::PING,
            Self::Logout => opcode::LOGOUT,
            Self::Unrecognized { opcode, .. } => *opcode,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let mut w = PacketWriter::with_capacity(32);
        match self {
            Self::Hello {
                protocol_version,
                token,
                client_nonce,
                capabilities,
            } => {
                w.write_u16_le(*protocol_version);
                token.write(&mut w);
                w.write_u64_le(*client_nonce);
                w.write_u32_le(*capabilities);
            }
            Self::Move { position, rotation } => {
                w.write_vec3(*position);
                w.write_f32_le(*rotation);
            }
            Self::Attack { target } => w.write_guid(*target),
            Self::Say { message } => w.write_string(message),
            Self::Whisper {
                target_character,
                message,
            } => {
                w.write_u64_le(*target_character);
                w.write_string(message);
            }
            Self::Ping { client_time } => w.write_u64_le(*client_time),
            Self::Logout => {}
            Self::Unrecognized { payload_len, .. } => w.write_bytes(&vec![0u8; *payload_len]),
        }
        Frame::new(self.opcode(), w.into_vec())
    }

    pub fn from_frame(frame: &Frame) -> ProtocolResult<Self> {
        let mut r = PacketReader::new(&frame.payload);
        let packet = match frame.opcode {
            opcode::HELLO => Self::Hello {
                protocol_version: r.read_u16_le()?,
                token: SessionToken::read(&mut r)?,
                client_nonce: r.read_u64_le()?,
                capabilities: r.read_u32_le()?,
            },
            opcode::MOVE => Self::Move {
                position: r.read_vec3("move.position")?,
                rotation: r.read_f32_le("move.rotation")?,
            },
            opcode::ATTACK => Self::Attack {
                target: r.read_guid()?,
            },
            opcode::SAY => Self::Say {
                message: r.read_string(MAX_MESSAGE_BYTES)?,
            },
            opcode::WHISPER => Self::Whisper {
                target_character: r.read_u64_le()?,
                message: r.read_string(MAX_MESSAGE_BYTES)?,
            },
            opcode::PING => Self::Ping {
                client_time: r.read_u64_le()?,
            },
            opcode::LOGOUT => Self::Logout,
            other => {
                return Ok(Self::Unrecognized {
                    opcode: other,
                    payload_len: frame.payload.len(),
                })
            }
        };
        r.finish()?;
        Ok(packet)
    }
}

/// Packets the server sends to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Greeting {
        protocol_version: u16,
        server_nonce: u64,
    },
    Accept {
        session_id: u64,
        key_check: u64,
    },
    Deny {
        reason: DenyReason,
    },
    EnterZone {
        zone_id: u32,
        instance_id: u32,
        guid: Guid,
        position: Vec3,
    },
    EntitySpawned {
        guid: Guid,
        template_id: u32,
        name: String,
        position: Vec3,
        rotation: f32,
        health: u32,
        max_health: u32,
    },
    EntityDespawned {
        guid: Guid,
    },
    EntityMoved {
        guid: Guid,
        position: Vec3,
        rotation: f32,
    },
    ChaseStarted {
        guid: Guid,
        waypoints: Vec<Vec3>,
        duration_ms: u32,
    },
    HealthChanged {
        guid: Guid,
        health: u32,
        max_health: u32,
    },
    AttackPerformed {
        attacker: Guid,
        target: Guid,
        damage: u32,
    },
    EntityDied {
        guid: Guid,
        killer: Guid,
    },
    ChatMessage {
        speaker: Guid,
        speaker_name: String,
        message: String,
    },
    WhisperReceived {
        from_character: u64,
        from_name: String,
        message: String,
    },
    CommandRejected {
        command_opcode: u16,
        reason: RejectReason,
    },
    WhisperResult {
        target_character: u64,
        outcome: WhisperOutcome,
    },
    Pong {
        client_time: u64,
        server_time: u64,
    },
    Disconnect {
        reason: DisconnectReason,
    },
}

impl ServerPacket {
    pub fn opcode(&self) -> u16 {
        match self {
            Self::Greeting { .. } => opcode::GREETING,
            Self::Accept { .. } => opcode::ACCEPT,
            Self::Deny { .. } => opcode::DENY,
            Self::EnterZone { .. } => opcode::ENTER_ZONE,
            Self::EntitySpawned { .. } => opcode::ENTITY_SPAWNED,
            Self::EntityDespawned { .. } => opcode::ENTITY_DESPAWNED,
            Self::EntityMoved { .. } => opcode::ENTITY_MOVED,
            Self::ChaseStarted { .. } => opcode::CHASE_STARTED,
            Self::HealthChanged { .. } => opcode::HEALTH_CHANGED,
            Self::AttackPerformed { .. } => opcode::ATTACK_PERFORMED,
            Self::EntityDied { .. } => opcode::ENTITY_DIED,
            Self::ChatMessage { .. } => opcode::CHAT_MESSAGE,
            Self::WhisperReceived { .. } => opcode::WHISPER_RECEIVED,
            Self::CommandRejected { .. } => opcode::COMMAND_REJECTED,
            Self::WhisperResult { .. } => opcode::WHISPER_RESULT,
            Self::Pong { .. } => opcode::PONG,
            Self::Disconnect { .. } => opcode::DISCONNECT,
        }
    }

    /// True for the handshake packets that travel outside the envelope.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::Greeting { .. } | Self::Accept { .. } | Self::Deny { .. }
        )
    }

    pub fn to_frame(&self) -> Frame {
        let mut w = PacketWriter::with_capacity(32);
        match self {
            Self::Greeting {
                protocol_version,
                server_nonce,
            } => {
                w.write_u16_le(*protocol_version);
                w.write_u64_le(*server_nonce);
            }
            Self::Accept {
                session_id,
                key_check,
            } => {
                w.write_u64_le(*session_id);
                w.write_u64_le(*key_check);
            }
            Self::Deny { reason } => w.write_u8(*reason as u8),
            Self::EnterZone {
                zone_id,
                instance_id,
                guid,
                position,
            } => {
                w.write_u32_le(*zone_id);
                w.write_u32_le(*instance_id);
                w.write_guid(*guid);
                w.write_vec3(*position);
            }
            Self::EntitySpawned {
                guid,
                template_id,
                name,
                position,
                rotation,
                health,
                max_health,
            } => {
                w.write_guid(*guid);
                w.write_u32_le(*template_id);
                w.write_string(name);
                w.write_vec3(*position);
                w.write_f32_le(*rotation);
                w.write_u32_le(*health);
                w.write_u32_le(*max_health);
            }
            Self::EntityDespawned { guid } => w.write_guid(*guid),
            Self::EntityMoved {
                guid,
                position,
                rotation,
            } => {
                w.write_guid(*guid);
                w.write_vec3(*position);
                w.write_f32_le(*rotation);
            }
            Self::ChaseStarted {
                guid,
                waypoints,
                duration_ms,
            } => {
                w.write_guid(*guid);
                let count = waypoints.len().min(MAX_WAYPOINTS);
                w.write_u16_le(count as u16);
                for point in &waypoints[..count] {
                    w.write_vec3(*point);
                }
                w.write_u32_le(*duration_ms);
            }
            Self::HealthChanged {
                guid,
                health,
                max_health,
            } => {
                w.write_guid(*guid);
                w.write_u32_le(*health);
                w.write_u32_le(*max_health);
            }
            Self::AttackPerformed {
                attacker,
                target,
                damage,
            } => {
                w.write_guid(*attacker);
                w.write_guid(*target);
                w.write_u32_le(*damage);
            }
            Self::EntityDied { guid, killer } => {
                w.write_guid(*guid);
                w.write_guid(*killer);
            }
            Self::ChatMessage {
                speaker,
                speaker_name,
                message,
            } => {
                w.write_guid(*speaker);
                w.write_string(speaker_name);
                w.write_string(message);
            }
            Self::WhisperReceived {
                from_character,
                from_name,
                message,
            } => {
                w.write_u64_le(*from_character);
                w.write_string(from_name);
                w.write_string(message);
            }
            Self::CommandRejected {
                command_opcode,
                reason,
            } => {
                w.write_u16_le(*command_opcode);
                w.write_u8(*reason as u8);
            }
            Self::WhisperResult {
                target_character,
                outcome,
            } => {
                w.write_u64_le(*target_character);
                w.write_u8(*outcome as u8);
            }
            Self::Pong {
                client_time,
                server_time,
            } => {
                w.write_u64_le(*client_time);
                w.write_u64_le(*server_time);
            }
            Self::Disconnect { reason } => w.write_u8(*reason as u8),
        }
        Frame::new(self.opcode(), w.into_vec())
    }

    pub fn from_frame(frame: &Frame) -> ProtocolResult<Self> {
        let mut r = PacketReader::new(&frame.payload);
        let packet = match frame.opcode {
            opcode::GREETING => Self::Greeting {
                protocol_version: r.read_u16_le()?,
                server_nonce: r.read_u64_le()?,
            },
            opcode::ACCEPT => Self::Accept {
                session_id: r.read_u64_le()?,
                key_check: r.read_u64_le()?,
            },
            opcode::DENY => Self::Deny {
                reason: DenyReason::from_u8(r.read_u8()?)?,
            },
            opcode::ENTER_ZONE => Self::EnterZone {
                zone_id: r.read_u32_le()?,
                instance_id: r.read_u32_le()?,
                guid: r.read_guid()?,
                position: r.read_vec3("enter_zone.position")?,
            },
            opcode::ENTITY_SPAWNED => Self::EntitySpawned {
                guid: r.read_guid()?,
                template_id: r.read_u32_le()?,
                name: r.read_string(MAX_NAME_BYTES)?,
                position: r.read_vec3("entity_spawned.position")?,
                rotation: r.read_f32_le("entity_spawned.rotation")?,
                health: r.read_u32_le()?,
                max_health: r.read_u32_le()?,
            },
            opcode::ENTITY_DESPAWNED => Self::EntityDespawned {
                guid: r.read_guid()?,
            },
            opcode::ENTITY_MOVED => Self::EntityMoved {
                guid: r.read_guid()?,
                position: r.read_vec3("entity_moved.position")?,
                rotation: r.read_f32_le("entity_moved.rotation")?,
            },
            opcode::CHASE_STARTED => {
                let guid = r.read_guid()?;
                let count = r.read_u16_le()? as usize;
                if count > MAX_WAYPOINTS {
                    return Err(ProtocolError::InvalidValue {
                        field: "chase_started.waypoints",
                        value: count as u64,
                    });
                }
                let mut waypoints = Vec::with_capacity(count);
                for _ in 0..count {
                    waypoints.push(r.read_vec3("chase_started.waypoint")?);
                }
                Self::ChaseStarted {
                    guid,
                    waypoints,
                    duration_ms: r.read_u32_le()?,
                }
            }
            opcode::HEALTH_CHANGED => Self::HealthChanged {
                guid: r.read_guid()?,
                health: r.read_u32_le()?,
                max_health: r.read_u32_le()?,
            },
            opcode::ATTACK_PERFORMED => Self::AttackPerformed {
                attacker: r.read_guid()?,
                target: r.read_guid()?,
                damage: r.read_u32_le()?,
            },
            opcode::ENTITY_DIED => Self::EntityDied {
                guid: r.read_guid()?,
                killer: r.read_guid()?,
            },
            opcode::CHAT_MESSAGE => Self::ChatMessage {
                speaker: r.read_guid()?,
                speaker_name: r.read_string(MAX_NAME_BYTES)?,
                message: r.read_string(MAX_MESSAGE_BYTES)?,
            },
            opcode::WHISPER_RECEIVED => Self::WhisperReceived {
                from_character: r.read_u64_le()?,
                from_name: r.read_string(MAX_NAME_BYTES)?,
                message: r.read_string(MAX_MESSAGE_BYTES)?,
            },
            opcode::COMMAND_REJECTED => Self::CommandRejected {
                command_opcode: r.read_u16_le()?,
                reason: RejectReason::from_u8(r.read_u8()?)?,
            },
            opcode::WHISPER_RESULT => Self::WhisperResult {
                target_character: r.read_u64_le()?,
                outcome: WhisperOutcome::from_u8(r.read_u8()?)?,
            },
            opcode::PONG => Self::Pong {
                client_time: r.read_u64_le()?,
                server_time: r.read_u64_le()?,
            },
            opcode::DISCONNECT => Self::Disconnect {
                reason: DisconnectReason::from_u8(r.read_u8()?)?,
            },
            other => {
                return Err(ProtocolError::UnexpectedOpcode {
                    opcode: other,
                    phase: "server stream",
                })
            }
        };
        r.finish()?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenAuthority;

    fn client_round_trip(packet: ClientPacket) {
        let frame = packet.to_frame();
        let bytes = frame.encode();
        let (parsed, used) = crate::frame::parse_frame(&bytes, u32::MAX).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(ClientPacket::from_frame(&parsed).unwrap(), packet);
    }

    fn server_round_trip(packet: ServerPacket) {
        let frame = packet.to_frame();
        let bytes = frame.encode();
        let (parsed, _) = crate::frame::parse_frame(&bytes, u32::MAX).unwrap().unwrap();
        assert_eq!(ServerPacket::from_frame(&parsed).unwrap(), packet);
    }

    #[test]
    fn every_client_packet_round_trips() {
        let token = TokenAuthority::new("k").issue(1, 2, 3, 4).unwrap();
        let packets = vec![
            ClientPacket::Hello {
                protocol_version: 3,
                token,
                client_nonce: 0xdead_beef_0000_0001,
                capabilities: 0b101,
            },
            ClientPacket::Move {
                position: Vec3::new(1.5, -2.0, 300.25),
                rotation: 3.1,
            },
            ClientPacket::Attack {
                target: Guid(0x0200_0000_0000_0009),
            },
            ClientPacket::Say {
                message: "hello, zone ☀".to_string(),
            },
            ClientPacket::Whisper {
                target_character: 77,
                message: String::new(),
            },
            ClientPacket::Ping { client_time: 12345 },
            ClientPacket::Logout,
            ClientPacket::Unrecognized {
                opcode: 0x01ff,
                payload_len: 5,
            },
        ];
        for packet in packets {
            client_round_trip(packet);
        }
    }

    #[test]
    fn every_server_packet_round_trips() {
        let guid = Guid(0x0100_0000_0000_0001);
        let other = Guid(0x0200_0000_0000_0002);
        let packets = vec![
            ServerPacket::Greeting {
                protocol_version: 3,
                server_nonce: u64::MAX,
            },
            ServerPacket::Accept {
                session_id: 5,
                key_check: 0x0102_0304_0506_0708,
            },
            ServerPacket::Deny {
                reason: DenyReason::AccountSuspended,
            },
            ServerPacket::EnterZone {
                zone_id: 1,
                instance_id: 2,
                guid,
                position: Vec3::new(0.0, 0.0, 0.0),
            },
            ServerPacket::EntitySpawned {
                guid: other,
                template_id: 100,
                name: "Forest Wolf".to_string(),
                position: Vec3::new(20.0, 0.0, 0.0),
                rotation: 0.5,
                health: 80,
                max_health: 100,
            },
            ServerPacket::EntityDespawned { guid: other },
            ServerPacket::EntityMoved {
                guid,
                position: Vec3::new(1.0, 2.0, 3.0),
                rotation: -1.0,
            },
            ServerPacket::ChaseStarted {
                guid: other,
                waypoints: vec![Vec3::new(20.0, 0.0, 0.0), Vec3::new(15.0, 0.0, 0.0)],
                duration_ms: 3000,
            },
            ServerPacket::HealthChanged {
                guid: other,
                health: 0,
                max_health: 100,
            },
            ServerPacket::AttackPerformed {
                attacker: guid,
                target: other,
                damage: 12,
            },
            ServerPacket::EntityDied { guid: other, killer: guid },
            ServerPacket::ChatMessage {
                speaker: guid,
                speaker_name: "Ayla".to_string(),
                message: "hi".to_string(),
            },
            ServerPacket::WhisperReceived {
                from_character: 3,
                from_name: "Bren".to_string(),
                message: "psst".to_string(),
            },
            ServerPacket::CommandRejected {
                command_opcode: opcode::ATTACK,
                reason: RejectReason::TargetOutOfRange,
            },
            ServerPacket::WhisperResult {
                target_character: 9,
                outcome: WhisperOutcome::Timeout,
            },
            ServerPacket::Pong {
                client_time: 1,
                server_time: 2,
            },
            ServerPacket::Disconnect {
                reason: DisconnectReason::TokenExpired,
            },
        ];
        for packet in packets {
            server_round_trip(packet);
        }
    }

    #[test]
    fn unknown_client_opcode_is_not_an_error() {
        let frame = Frame::new(0x7777, vec![1, 2, 3]);
        assert_eq!(
            ClientPacket::from_frame(&frame).unwrap(),
            ClientPacket::Unrecognized {
                opcode: 0x7777,
                payload_len: 3
            }
        );
    }

    #[test]
    fn overlong_say_length_terminates_decode() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&200u16.to_le_bytes());
        payload.extend_from_slice(b"short");
        let err = ClientPacket::from_frame(&Frame::new(opcode::SAY, payload)).unwrap_err();
        assert!(matches!(err, ProtocolError::StringOverrun { declared: 200, .. }));
    }

    #[test]
    fn trailing_bytes_after_command_are_rejected() {
        let mut frame = ClientPacket::Ping { client_time: 1 }.to_frame();
        frame.payload.push(0);
        assert_eq!(
            ClientPacket::from_frame(&frame),
            Err(ProtocolError::TrailingBytes(1))
        );
    }

    #[test]
    fn bad_enum_discriminant_is_rejected() {
        let frame = Frame::new(opcode::DENY, vec![99]);
        assert!(matches!(
            ServerPacket::from_frame(&frame),
            Err(ProtocolError::InvalidValue { field: "deny_reason", value: 99 })
        ));
    }
}
