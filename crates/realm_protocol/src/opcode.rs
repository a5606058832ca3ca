//! Opcode table.
//!
//! `0x00xx` handshake and transport, `0x01xx` client game commands,
//! `0x02xx` server game packets.

// Handshake, sent in the clear.
pub const GREETING: u16 = 0x0001;
pub const HELLO: u16 = 0x0002;
pub const ACCEPT: u16 = 0x0003;
pub const DENY: u16 = 0x0004;

/// Encrypted envelope wrapping one inner frame.
pub const ENVELOPE: u16 = 0x00EE;

// Client -> server.
pub const MOVE: u16 = 0x0101;
pub const ATTACK: u16 = 0x0102;
pub const SAY: u16 = 0x0103;
pub const WHISPER: u16 = 0x0104;
pub const PING: u16 = 0x0105;
pub const LOGOUT: u16 = 0x0106;

// Server -> client.
pub const ENTER_ZONE: u16 = 0x0201;
pub const ENTITY_SPAWNED: u16 = 0x0202;
pub const ENTITY_DESPAWNED: u16 = 0x0203;
pub const ENTITY_MOVED: u16 = 0x0204;
pub const CHASE_STARTED: u16 = 0x0205;
pub const HEALTH_CHANGED: u16 = 0x0206;
pub const ATTACK_PERFORMED: u16 = 0x0207;
pub const ENTITY_DIED: u16 = 0x0208;
pub const CHAT_MESSAGE: u16 = 0x0209;
pub const WHISPER_RECEIVED: u16 = 0x020A;
pub const COMMAND_REJECTED: u16 = 0x020B;
pub const WHISPER_RESULT: u16 = 0x020C;
pub const PONG: u16 = 0x020D;
pub const DISCONNECT: u16 = 0x020E;

/// Human readable opcode name for logs.
pub fn name(opcode: u16) -> &'static str {
    match opcode {
        GREETING => "greeting",
        HELLO => "hello",
        ACCEPT => "accept",
        DENY => "deny",
        ENVELOPE => "envelope",
        MOVE => "move",
        ATTACK => "attack",
        SAY => "say",
        WHISPER => "whisper",
        PING => "ping",
        LOGOUT => "logout",
        ENTER_ZONE => "enter_zone",
        ENTITY_SPAWNED => "entity_spawned",
        ENTITY_DESPAWNED => "entity_despawned",
        ENTITY_MOVED => "entity_moved",
        CHASE_STARTED => "chase_started",
        HEALTH_CHANGED => "health_changed",
        ATTACK_PERFORMED => "attack_performed",
        ENTITY_DIED => "entity_died",
        CHAT_MESSAGE => "chat_message",
        WHISPER_RECEIVED => "whisper_received",
        COMMAND_REJECTED => "command_rejected",
        WHISPER_RESULT => "whisper_result",
        PONG => "pong",
        DISCONNECT => "disconnect",
        _ => "unknown",
    }
}
