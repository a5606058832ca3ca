//! Simulated entities.

use realm_protocol::{Guid, ServerPacket, Vec3};
use serde::{Deserialize, Serialize};

use crate::content::{CreatureTemplate, SpawnDefinition};
use crate::persistence::CharacterRecord;
use crate::types::{CharacterId, ZoneKey};

/// A positioned object owned by exactly one zone instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub guid: Guid,
    pub name: String,
    pub template_id: u32,
    pub position: Vec3,
    pub rotation: f32,
    pub health: u32,
    pub max_health: u32,
    pub attack_power: u32,
    pub attack_range: f32,
    pub zone: ZoneKey,
    /// Set for players.
    pub character_id: Option<CharacterId>,
    /// Set for creatures materialized from a spawn definition.
    pub spawn_id: Option<u64>,
    /// First player to damage this entity; credited with the kill.
    pub tagged_by: Option<Guid>,
    pub last_attack_ms: Option<u64>,
}

impl Entity {
    pub fn player(guid: Guid, record: &CharacterRecord, zone: ZoneKey, position: Vec3) -> Self {
        Self {
            guid,
            name: record.name.clone(),
            template_id: 0,
            position,
            rotation: record.rotation,
            health: record.health.min(record.max_health),
            max_health: record.max_health,
            attack_power: record.attack_power,
            attack_range: record.attack_range,
            zone,
            character_id: Some(CharacterId(record.character_id)),
            spawn_id: None,
            tagged_by: None,
            last_attack_ms: None,
        }
    }

    pub fn creature(
        guid: Guid,
        template: &CreatureTemplate,
        spawn: &SpawnDefinition,
        zone: ZoneKey,
    ) -> Self {
        Self {
            guid,
            name: template.name.clone(),
            template_id: template.id,
            position: spawn.position,
            rotation: spawn.rotation,
            health: template.max_health,
            max_health: template.max_health,
            attack_power: template.attack_damage,
            attack_range: template.attack_range,
            zone,
            character_id: None,
            spawn_id: Some(spawn.id),
            tagged_by: None,
            last_attack_ms: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn is_player(&self) -> bool {
        self.guid.is_player()
    }

    /// Subtracts `amount`, returning the damage actually dealt.
    pub fn take_damage(&mut self, amount: u32) -> u32 {
        let dealt = amount.min(self.health);
        self.health -= dealt;
        dealt
    }

    pub fn spawn_packet(&self) -> ServerPacket {
        ServerPacket::EntitySpawned {
            guid: self.guid,
            template_id: self.template_id,
            name: self.name.clone(),
            position: self.position,
            rotation: self.rotation,
            health: self.health,
            max_health: self.max_health,
        }
    }

    pub fn health_packet(&self) -> ServerPacket {
        ServerPacket::HealthChanged {
            guid: self.guid,
            health: self.health,
            max_health: self.max_health,
        }
    }

    pub fn moved_packet(&self) -> ServerPacket {
        ServerPacket::EntityMoved {
            guid: self.guid,
            position: self.position,
            rotation: self.rotation,
        }
    }
}
