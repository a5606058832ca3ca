//! # Core wire-level value types
//!
//! Types shared by the protocol and the world simulation:
//!
//! - [`Guid`] - type-tagged 64-bit entity identifier
//! - [`EntityKind`] - the tag carried in the top byte of a guid
//! - [`Vec3`] - single precision position / direction vector

use serde::{Deserialize, Serialize};

const KIND_SHIFT: u32 = 56;
const SERIAL_MASK: u64 = (1 << KIND_SHIFT) - 1;

/// The kind of simulated object a [`Guid`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player = 1,
    Creature = 2,
    Object = 3,
}

impl EntityKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Player),
            2 => Some(Self::Creature),
            3 => Some(Self::Object),
            _ => None,
        }
    }
}

/// Unique identifier of an entity.
///
/// The top 8 bits hold the [`EntityKind`], the low 56 bits a serial number.
/// A guid with no valid kind tag is still representable (it may arrive from
/// a client) but [`Guid::kind`] returns `None` for it.
///
/// ```rust
/// use realm_protocol::{EntityKind, Guid};
///
/// let guid = Guid::new(EntityKind::Creature, 42);
/// assert_eq!(guid.kind(), Some(EntityKind::Creature));
/// assert_eq!(guid.serial(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid(pub u64);

impl Guid {
    pub const NONE: Guid = Guid(0);

    pub fn new(kind: EntityKind, serial: u64) -> Self {
        Self(((kind as u64) << KIND_SHIFT) | (serial & SERIAL_MASK))
    }

    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::from_u8((self.0 >> KIND_SHIFT) as u8)
    }

    pub fn serial(&self) -> u64 {
        self.0 & SERIAL_MASK
    }

    pub fn is_player(&self) -> bool {
        self.kind() == Some(EntityKind::Player)
    }

    pub fn is_creature(&self) -> bool {
        self.kind() == Some(EntityKind::Creature)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Some(EntityKind::Player) => write!(f, "player:{}", self.serial()),
            Some(EntityKind::Creature) => write!(f, "creature:{}", self.serial()),
            Some(EntityKind::Object) => write!(f, "object:{}", self.serial()),
            None => write!(f, "guid:{:#x}", self.0),
        }
    }
}

/// A 3D vector with single-precision components.
///
/// `y` is the vertical axis; horizontal partitioning uses `x` and `z`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: Vec3) -> f32 {
        (*self - other).length()
    }

    pub fn distance_squared(&self, other: Vec3) -> f32 {
        let d = *self - other;
        d.x * d.x + d.y * d.y + d.z * d.z
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(&self) -> Option<Vec3> {
        let len = self.length();
        if len <= f32::EPSILON || !len.is_finite() {
            return None;
        }
        Some(Vec3::new(self.x / len, self.y / len, self.z / len))
    }

    pub fn scale(&self, factor: f32) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn lerp(&self, other: Vec3, t: f32) -> Vec3 {
        *self + (other - *self).scale(t)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_tag_survives_large_serials() {
        let guid = Guid::new(EntityKind::Player, u64::MAX);
        assert_eq!(guid.kind(), Some(EntityKind::Player));
        assert_eq!(guid.serial(), SERIAL_MASK);
    }

    #[test]
    fn untagged_guid_has_no_kind() {
        assert_eq!(Guid(5).kind(), None);
        assert!(Guid::NONE.is_none());
    }

    #[test]
    fn normalized_rejects_zero_vector() {
        assert!(Vec3::ZERO.normalized().is_none());
        let unit = Vec3::new(3.0, 0.0, 4.0).normalized().unwrap();
        assert!((unit.length() - 1.0).abs() < 1e-6);
    }
}
