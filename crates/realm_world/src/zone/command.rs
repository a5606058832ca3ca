use realm_protocol::{opcode, Guid, Vec3};

/// A validated-on-apply game command from one player.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneCommand {
    Move { position: Vec3, rotation: f32 },
    Attack { target: Guid },
    Say { message: String },
}

impl ZoneCommand {
    /// Opcode of the client packet this command came from, echoed in
    /// rejections.
    pub fn opcode(&self) -> u16 {
        match self {
            Self::Move { .. } => opcode::MOVE,
            Self::Attack { .. } => opcode::ATTACK,
            Self::Say { .. } => opcode::SAY,
        }
    }
}
