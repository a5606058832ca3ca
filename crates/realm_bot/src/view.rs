//! What one bot knows about the world, built purely from server packets.

use std::collections::HashMap;

use rand::Rng;
use realm_protocol::{Guid, ServerPacket, Vec3};

#[derive(Debug, Default)]
pub struct WorldView {
    pub guid: Option<Guid>,
    pub position: Vec3,
    /// Where the bot entered the zone; wandering stays near it.
    pub anchor: Vec3,
    pub zone: Option<(u32, u32)>,
    creatures: HashMap<Guid, Vec3>,
    pub dead: bool,
}

/// Something worth counting in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notable {
    EnteredZone,
    Rejected,
    CreatureKilled,
    Died,
    Chat,
    Whisper,
}

impl WorldView {
    pub fn in_world(&self) -> bool {
        self.guid.is_some()
    }

    pub fn creature_count(&self) -> usize {
        self.creatures.len()
    }

    pub fn apply(&mut self, packet: &ServerPacket) -> Option<Notable> {
        match packet {
            ServerPacket::EnterZone {
                zone_id,
                instance_id,
                guid,
                position,
            } => {
                self.guid = Some(*guid);
                self.position = *position;
                self.anchor = *position;
                self.zone = Some((*zone_id, *instance_id));
                self.creatures.clear();
                self.dead = false;
                Some(Notable::EnteredZone)
            }
            ServerPacket::EntitySpawned { guid, position, health, .. } => {
                if guid.is_creature() && *health > 0 {
                    self.creatures.insert(*guid, *position);
                }
                None
            }
            ServerPacket::EntityMoved { guid, position, .. } => {
                if Some(*guid) == self.guid {
                    self.position = *position;
                } else if let Some(known) = self.creatures.get_mut(guid) {
                    *known = *position;
                }
                None
            }
            ServerPacket::ChaseStarted { guid, waypoints, .. } => {
                // Good enough for target picking: assume the chase completes.
                if let (Some(known), Some(last)) = (self.creatures.get_mut(guid), waypoints.last()) {
                    *known = *last;
                }
                None
            }
            ServerPacket::EntityDespawned { guid } => {
                self.creatures.remove(guid);
                None
            }
            ServerPacket::EntityDied { guid, killer } => {
                if Some(*guid) == self.guid {
                    self.dead = true;
                    return Some(Notable::Died);
                }
                self.creatures.remove(guid);
                (Some(*killer) == self.guid).then_some(Notable::CreatureKilled)
            }
            ServerPacket::HealthChanged { guid, health, .. } => {
                if Some(*guid) == self.guid && *health > 0 {
                    self.dead = false;
                }
                None
            }
            ServerPacket::CommandRejected { .. } => Some(Notable::Rejected),
            ServerPacket::ChatMessage { .. } => Some(Notable::Chat),
            ServerPacket::WhisperReceived { .. } => Some(Notable::Whisper),
            _ => None,
        }
    }

    pub fn nearest_creature(&self) -> Option<(Guid, Vec3)> {
        self.creatures
            .iter()
            .map(|(guid, pos)| (*guid, *pos))
            .min_by(|a, b| {
                self.position
                    .distance_squared(a.1)
                    .total_cmp(&self.position.distance_squared(b.1))
            })
    }

    /// Next position when heading for `target`, at most `step` away.
    pub fn step_towards(&self, target: Vec3, step: f32) -> Vec3 {
        let delta = target - self.position;
        match delta.normalized() {
            Some(dir) if delta.length() > step => self.position + dir.scale(step),
            _ => target,
        }
    }

    /// A random step that keeps the bot within `radius` of its anchor.
    pub fn wander<R: Rng>(&self, rng: &mut R, step: f32, radius: f32) -> Vec3 {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let candidate = self.position + Vec3::new(angle.cos(), 0.0, angle.sin()).scale(step);
        if candidate.distance(self.anchor) <= radius {
            candidate
        } else {
            self.step_towards(self.anchor, step)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use realm_protocol::EntityKind;

    fn creature(serial: u64) -> Guid {
        Guid::new(EntityKind::Creature, serial)
    }

    fn entered() -> WorldView {
        let mut view = WorldView::default();
        view.apply(&ServerPacket::EnterZone {
            zone_id: 1,
            instance_id: 1,
            guid: Guid::new(EntityKind::Player, 5),
            position: Vec3::ZERO,
        });
        view
    }

    fn spawn(guid: Guid, position: Vec3) -> ServerPacket {
        ServerPacket::EntitySpawned {
            guid,
            template_id: 1,
            name: "Wolf".into(),
            position,
            rotation: 0.0,
            health: 50,
            max_health: 50,
        }
    }

    #[test]
    fn tracks_nearest_living_creature() {
        let mut view = entered();
        view.apply(&spawn(creature(1), Vec3::new(30.0, 0.0, 0.0)));
        view.apply(&spawn(creature(2), Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(view.nearest_creature().map(|c| c.0), Some(creature(2)));

        let kill = view.apply(&ServerPacket::EntityDied {
            guid: creature(2),
            killer: Guid::new(EntityKind::Player, 5),
        });
        assert_eq!(kill, Some(Notable::CreatureKilled));
        assert_eq!(view.nearest_creature().map(|c| c.0), Some(creature(1)));

        view.apply(&ServerPacket::EntityDespawned { guid: creature(1) });
        assert!(view.nearest_creature().is_none());
    }

    #[test]
    fn own_death_is_noticed() {
        let mut view = entered();
        let died = view.apply(&ServerPacket::EntityDied {
            guid: Guid::new(EntityKind::Player, 5),
            killer: creature(1),
        });
        assert_eq!(died, Some(Notable::Died));
        assert!(view.dead);
    }

    #[test]
    fn steps_are_bounded() {
        let view = entered();
        let next = view.step_towards(Vec3::new(100.0, 0.0, 0.0), 2.5);
        assert!((next.x - 2.5).abs() < 1e-4);
        assert_eq!(view.step_towards(Vec3::new(1.0, 0.0, 0.0), 2.5), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn wandering_stays_near_anchor() {
        let mut view = entered();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            view.position = view.wander(&mut rng, 3.0, 20.0);
            assert!(view.position.distance(view.anchor) <= 20.0 + 1e-3);
        }
    }
}
