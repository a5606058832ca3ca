//! Read-only static content: creature templates, spawn definitions and zone
//! entry points.
//!
//! Zones consume content through [`ContentLookup`] so tests and tools can
//! supply their own tables. [`StaticContent`] is the JSON-backed
//! implementation loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use realm_protocol::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ContentError;
use crate::types::ZoneId;

fn default_respawn_time_ms() -> u64 {
    300_000
}
fn default_move_speed() -> f32 {
    5.0
}
fn default_attack_cooldown_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureTemplate {
    pub id: u32,
    pub name: String,
    pub max_health: u32,
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    /// Melee reach, or the far edge of the band for ranged creatures.
    pub attack_range: f32,
    /// Non-zero makes the creature ranged; it keeps at least this distance.
    #[serde(default)]
    pub min_range: f32,
    pub attack_damage: u32,
    #[serde(default = "default_attack_cooldown_ms")]
    pub attack_cooldown_ms: u64,
    /// Players inside this radius build up threat. Zero means passive.
    #[serde(default)]
    pub aggro_radius: f32,
}

impl CreatureTemplate {
    pub fn is_ranged(&self) -> bool {
        self.min_range > 0.0
    }

    fn validate(&self) -> Result<(), ContentError> {
        let invalid = |reason: &str| ContentError::InvalidTemplate {
            id: self.id,
            reason: reason.to_string(),
        };
        if self.max_health == 0 {
            return Err(invalid("max_health must be positive"));
        }
        if !(self.attack_range.is_finite() && self.attack_range > 0.0) {
            return Err(invalid("attack_range must be positive"));
        }
        if !(self.move_speed.is_finite() && self.move_speed >= 0.0) {
            return Err(invalid("move_speed must be non-negative"));
        }
        if !self.min_range.is_finite() || self.min_range < 0.0 {
            return Err(invalid("min_range must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnDefinition {
    pub id: u64,
    pub creature_id: u32,
    pub zone_id: ZoneId,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default = "default_respawn_time_ms")]
    pub respawn_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub id: ZoneId,
    pub name: String,
    /// Where entering and revived players appear.
    pub entry_point: Vec3,
}

/// Lookup interface consumed by zones.
pub trait ContentLookup: Send + Sync {
    fn creature_template(&self, id: u32) -> Option<&CreatureTemplate>;
    fn spawn_definitions(&self, zone_id: ZoneId) -> &[SpawnDefinition];
    fn zone(&self, zone_id: ZoneId) -> Option<&ZoneDefinition>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContentFile {
    #[serde(default)]
    zones: Vec<ZoneDefinition>,
    #[serde(default)]
    creatures: Vec<CreatureTemplate>,
    #[serde(default)]
    spawns: Vec<SpawnDefinition>,
}

#[derive(Debug, Default, Clone)]
pub struct StaticContent {
    zones: HashMap<ZoneId, ZoneDefinition>,
    templates: HashMap<u32, CreatureTemplate>,
    spawns: HashMap<ZoneId, Vec<SpawnDefinition>>,
}

impl StaticContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ContentError> {
        let file: ContentFile = serde_json::from_str(text)?;
        let mut content = Self::new();
        for zone in file.zones {
            if content.zones.contains_key(&zone.id) {
                return Err(ContentError::Duplicate {
                    kind: "zone",
                    id: zone.id as u64,
                });
            }
            content.zones.insert(zone.id, zone);
        }
        for template in file.creatures {
            template.validate()?;
            if content.templates.contains_key(&template.id) {
                return Err(ContentError::Duplicate {
                    kind: "creature",
                    id: template.id as u64,
                });
            }
            content.templates.insert(template.id, template);
        }
        let mut seen = std::collections::HashSet::new();
        for spawn in file.spawns {
            if !content.templates.contains_key(&spawn.creature_id) {
                return Err(ContentError::UnknownTemplate {
                    spawn_id: spawn.id,
                    creature_id: spawn.creature_id,
                });
            }
            if !seen.insert(spawn.id) {
                return Err(ContentError::Duplicate {
                    kind: "spawn",
                    id: spawn.id,
                });
            }
            content.spawns.entry(spawn.zone_id).or_default().push(spawn);
        }
        Ok(content)
    }

    pub fn with_zone(mut self, zone: ZoneDefinition) -> Self {
        self.zones.insert(zone.id, zone);
        self
    }

    pub fn with_template(mut self, template: CreatureTemplate) -> Self {
        self.templates.insert(template.id, template);
        self
    }

    pub fn with_spawn(mut self, spawn: SpawnDefinition) -> Self {
        self.spawns.entry(spawn.zone_id).or_default().push(spawn);
        self
    }

    pub fn zone_ids(&self) -> Vec<ZoneId> {
        let mut ids: Vec<_> = self.zones.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.values().map(Vec::len).sum()
    }

    /// A small built-in world used when no content file is configured.
    pub fn starter() -> Self {
        Self::new()
            .with_zone(ZoneDefinition {
                id: 1,
                name: "Greenhollow".into(),
                entry_point: Vec3::new(0.0, 0.0, 0.0),
            })
            .with_zone(ZoneDefinition {
                id: 2,
                name: "Ashen Reach".into(),
                entry_point: Vec3::new(100.0, 0.0, 100.0),
            })
            .with_template(CreatureTemplate {
                id: 100,
                name: "Forest Wolf".into(),
                max_health: 60,
                move_speed: 5.0,
                attack_range: 2.5,
                min_range: 0.0,
                attack_damage: 6,
                attack_cooldown_ms: 1_500,
                aggro_radius: 15.0,
            })
            .with_template(CreatureTemplate {
                id: 101,
                name: "Bramble Archer".into(),
                max_health: 45,
                move_speed: 4.0,
                attack_range: 20.0,
                min_range: 8.0,
                attack_damage: 4,
                attack_cooldown_ms: 2_000,
                aggro_radius: 25.0,
            })
            .with_spawn(SpawnDefinition {
                id: 1,
                creature_id: 100,
                zone_id: 1,
                position: Vec3::new(30.0, 0.0, 10.0),
                rotation: 0.0,
                respawn_time_ms: 30_000,
            })
            .with_spawn(SpawnDefinition {
                id: 2,
                creature_id: 100,
                zone_id: 1,
                position: Vec3::new(-25.0, 0.0, 40.0),
                rotation: 1.5,
                respawn_time_ms: 30_000,
            })
            .with_spawn(SpawnDefinition {
                id: 3,
                creature_id: 101,
                zone_id: 2,
                position: Vec3::new(140.0, 0.0, 120.0),
                rotation: 0.0,
                respawn_time_ms: 45_000,
            })
    }
}

impl ContentLookup for StaticContent {
    fn creature_template(&self, id: u32) -> Option<&CreatureTemplate> {
        self.templates.get(&id)
    }

    fn spawn_definitions(&self, zone_id: ZoneId) -> &[SpawnDefinition] {
        self.spawns.get(&zone_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn zone(&self, zone_id: ZoneId) -> Option<&ZoneDefinition> {
        self.zones.get(&zone_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "zones": [{ "id": 7, "name": "Vale", "entry_point": { "x": 1.0, "y": 0.0, "z": 2.0 } }],
        "creatures": [{ "id": 9, "name": "Boar", "max_health": 30, "attack_range": 2.0, "attack_damage": 3 }],
        "spawns": [{ "id": 1, "creature_id": 9, "zone_id": 7, "position": { "x": 5.0, "y": 0.0, "z": 5.0 } }]
    }"#;

    #[test]
    fn spawn_defaults_are_applied() {
        let content = StaticContent::from_json_str(SAMPLE).unwrap();
        let spawns = content.spawn_definitions(7);
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].respawn_time_ms, 300_000);
        let template = content.creature_template(9).unwrap();
        assert_eq!(template.move_speed, 5.0);
        assert!(!template.is_ranged());
        assert!(content.spawn_definitions(8).is_empty());
    }

    #[test]
    fn spawn_with_unknown_template_is_rejected() {
        let text = SAMPLE.replace("\"creature_id\": 9", "\"creature_id\": 10");
        assert!(matches!(
            StaticContent::from_json_str(&text),
            Err(ContentError::UnknownTemplate { spawn_id: 1, creature_id: 10 })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let content = StaticContent::load(file.path()).unwrap();
        assert_eq!(content.zone_ids(), vec![7]);
        assert_eq!(content.spawn_count(), 1);
    }

    #[test]
    fn starter_content_is_self_consistent() {
        let content = StaticContent::starter();
        for zone in content.zone_ids() {
            for spawn in content.spawn_definitions(zone) {
                assert!(content.creature_template(spawn.creature_id).is_some());
            }
        }
    }
}
