//! Chase paths and the reposition planner.
//!
//! Paths are straight segments: a creature that needs to close or open
//! distance walks directly along the line to its target.

use realm_protocol::Vec3;
use serde::{Deserialize, Serialize};

/// Distances within this tolerance count as "at" a range boundary.
pub const RANGE_EPSILON: f32 = 1.0e-3;

/// How a creature positions itself relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CombatStyle {
    Melee { range: f32 },
    /// Keeps the target between `min_range` and `max_range`.
    Ranged { min_range: f32, max_range: f32 },
}

impl CombatStyle {
    /// The distance at which an attack can be made.
    pub fn attack_range(&self) -> f32 {
        match self {
            Self::Melee { range } => *range,
            Self::Ranged { max_range, .. } => *max_range,
        }
    }
}

/// A precomputed movement with a fixed start time and duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChasePath {
    waypoints: Vec<Vec3>,
    start_ms: u64,
    duration_ms: u64,
}

impl ChasePath {
    /// A straight path from `from` to `to` at `speed` units per second.
    ///
    /// Returns `None` for a non-positive speed or a path too short to matter.
    pub fn straight(from: Vec3, to: Vec3, speed: f32, start_ms: u64) -> Option<Self> {
        let length = from.distance(to);
        if !(speed.is_finite() && speed > 0.0) || !length.is_finite() || length < RANGE_EPSILON {
            return None;
        }
        let duration_ms = ((length / speed) * 1000.0).round().max(1.0) as u64;
        Some(Self {
            waypoints: vec![from, to],
            start_ms,
            duration_ms,
        })
    }

    pub fn waypoints(&self) -> &[Vec3] {
        &self.waypoints
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn end_ms(&self) -> u64 {
        self.start_ms.saturating_add(self.duration_ms)
    }

    pub fn destination(&self) -> Vec3 {
        self.waypoints.last().copied().unwrap_or(Vec3::ZERO)
    }

    pub fn length(&self) -> f32 {
        self.waypoints.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    pub fn is_complete(&self, now_ms: u64) -> bool {
        now_ms >= self.end_ms()
    }

    /// Position along the path at `now_ms`, clamped to its endpoints.
    pub fn position_at(&self, now_ms: u64) -> Vec3 {
        if self.is_complete(now_ms) {
            return self.destination();
        }
        let Some(first) = self.waypoints.first().copied() else {
            return Vec3::ZERO;
        };
        let elapsed = now_ms.saturating_sub(self.start_ms) as f32;
        let mut remaining = self.length() * (elapsed / self.duration_ms as f32);
        let mut current = first;
        for segment in self.waypoints.windows(2) {
            let span = segment[0].distance(segment[1]);
            if remaining <= span {
                return if span > 0.0 {
                    segment[0].lerp(segment[1], remaining / span)
                } else {
                    segment[1]
                };
            }
            remaining -= span;
            current = segment[1];
        }
        current
    }

    /// Facing (radians about the vertical axis) along the first segment.
    pub fn heading(&self) -> Option<f32> {
        let [from, to, ..] = self.waypoints.as_slice() else {
            return None;
        };
        let dir = *to - *from;
        Some(dir.x.atan2(dir.z))
    }
}

/// Where a creature at `from` should move to engage a target at `target`,
/// or `None` if it should stay put.
///
/// Melee creatures stop exactly at attack range. Ranged creatures approach
/// to `max_range` when too far and back away to `min_range` when too close.
/// A ranged band with `min_range >= max_range`, or a creature standing on its
/// target's position, never repositions.
pub fn plan_reposition(style: CombatStyle, from: Vec3, target: Vec3) -> Option<Vec3> {
    let offset = from - target;
    let distance = offset.length();
    match style {
        CombatStyle::Melee { range } => {
            if distance <= range + RANGE_EPSILON {
                return None;
            }
            let dir = offset.normalized()?;
            Some(target + dir.scale(range))
        }
        CombatStyle::Ranged {
            min_range,
            max_range,
        } => {
            if !(min_range.is_finite() && max_range.is_finite()) || min_range >= max_range {
                return None;
            }
            let dir = offset.normalized()?;
            if distance > max_range + RANGE_EPSILON {
                Some(target + dir.scale(max_range))
            } else if distance < min_range - RANGE_EPSILON {
                Some(target + dir.scale(min_range))
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn melee_path_ends_exactly_at_attack_range() {
        let target = Vec3::new(0.0, 0.0, 0.0);
        let end = plan_reposition(CombatStyle::Melee { range: 5.0 }, Vec3::new(20.0, 0.0, 0.0), target)
            .unwrap();
        assert_eq!(end, Vec3::new(5.0, 0.0, 0.0));
        let path = ChasePath::straight(Vec3::new(20.0, 0.0, 0.0), end, 5.0, 1_000).unwrap();
        assert_eq!(path.duration_ms(), 3_000);
        assert_eq!(path.end_ms(), 4_000);
    }

    #[test]
    fn melee_paths_from_many_angles_stop_at_range() {
        let target = Vec3::new(3.0, 1.0, -2.0);
        for i in 0..36 {
            let angle = i as f32 * 10f32.to_radians();
            let from = target + Vec3::new(angle.cos() * 40.0, 2.0, angle.sin() * 40.0);
            let end = plan_reposition(CombatStyle::Melee { range: 2.5 }, from, target).unwrap();
            assert!((end.distance(target) - 2.5).abs() < 1e-3);
        }
    }

    #[test]
    fn ranged_never_ends_inside_min_range() {
        let style = CombatStyle::Ranged {
            min_range: 8.0,
            max_range: 20.0,
        };
        let target = Vec3::ZERO;
        for d in [0.5f32, 3.0, 7.9, 25.0, 100.0] {
            let from = Vec3::new(d, 0.0, d * 0.5);
            if let Some(end) = plan_reposition(style, from, target) {
                let dist = end.distance(target);
                assert!(dist >= 8.0 - 1e-3, "ended at {dist} from {d}");
                assert!(dist <= 20.0 + 1e-3);
            }
        }
        // Inside the band nothing happens.
        assert_eq!(plan_reposition(style, Vec3::new(12.0, 0.0, 0.0), target), None);
    }

    #[test]
    fn degenerate_ranged_band_is_a_no_op() {
        let inverted = CombatStyle::Ranged {
            min_range: 30.0,
            max_range: 10.0,
        };
        assert_eq!(plan_reposition(inverted, Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO), None);
        assert_eq!(plan_reposition(inverted, Vec3::new(50.0, 0.0, 0.0), Vec3::ZERO), None);
        let band = CombatStyle::Ranged {
            min_range: 5.0,
            max_range: 10.0,
        };
        // Standing on the target gives no direction to back away in.
        assert_eq!(plan_reposition(band, Vec3::ZERO, Vec3::ZERO), None);
    }

    #[test]
    fn interpolation_is_linear_and_clamped() {
        let path = ChasePath::straight(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 10.0, 0).unwrap();
        assert_eq!(path.position_at(0), Vec3::ZERO);
        assert_eq!(path.position_at(500), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(path.position_at(5_000), Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn zero_speed_cannot_chase() {
        assert!(ChasePath::straight(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 0.0, 0).is_none());
    }
}
