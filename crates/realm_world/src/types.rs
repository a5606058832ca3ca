//! # World identifiers
//!
//! Wrapper types that keep zone, character and account ids from being mixed
//! up, plus the axis-aligned region bounds a zone accepts positions within.

use realm_protocol::Vec3;
use serde::{Deserialize, Serialize};

/// Static zone template id, as used by content files.
pub type ZoneId = u32;

/// Per-zone instance number. Instances of one zone count up from 1.
pub type InstanceId = u32;

/// Persistent character id issued by the login service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterId(pub u64);

/// Account id issued by the login service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub u64);

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "character:{}", self.0)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "account:{}", self.0)
    }
}

/// Address of one running shard of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneKey {
    pub zone_id: ZoneId,
    pub instance_id: InstanceId,
}

impl ZoneKey {
    pub fn new(zone_id: ZoneId, instance_id: InstanceId) -> Self {
        Self {
            zone_id,
            instance_id,
        }
    }
}

impl std::fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.zone_id, self.instance_id)
    }
}

/// Inclusive axis-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl RegionBounds {
    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// True when every `min` component is strictly below its `max`.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.min.x < self.max.x
            && self.min.y < self.max.y
            && self.min.z < self.max.z
    }
}

impl Default for RegionBounds {
    fn default() -> Self {
        Self {
            min: Vec3::new(-10_000.0, -1_000.0, -10_000.0),
            max: Vec3::new(10_000.0, 1_000.0, 10_000.0),
        }
    }
}
