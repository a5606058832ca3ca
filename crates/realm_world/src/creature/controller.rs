//! Per-creature behavioral state machine.
//!
//! ```text
//! idle --(damage | threat >= threshold)--> combat
//! combat --(in range, cooldown ready)--> attack --(next tick)--> combat
//! combat --(out of range / outside band)--> chase --(path done)--> combat
//! any --(health zero)--> dead
//! combat | chase | attack --(target lost)--> idle
//! ```
//!
//! The controller is pure: it reads a snapshot of its target and returns the
//! actions the owning zone must apply. It never touches other entities.

use realm_protocol::{Guid, Vec3};
use serde::{Deserialize, Serialize};

use super::chase::{plan_reposition, ChasePath, CombatStyle, RANGE_EPSILON};
use super::threat::ThreatTable;
use crate::content::CreatureTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    Idle,
    Combat,
    Chase,
    Attack,
    Dead,
}

/// Movement and combat parameters, fixed for the creature's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureProfile {
    pub style: CombatStyle,
    pub move_speed: f32,
    pub attack_damage: u32,
    pub attack_cooldown_ms: u64,
    pub aggro_radius: f32,
}

impl CreatureProfile {
    pub fn from_template(template: &CreatureTemplate) -> Self {
        let style = if template.is_ranged() {
            CombatStyle::Ranged {
                min_range: template.min_range,
                max_range: template.attack_range,
            }
        } else {
            CombatStyle::Melee {
                range: template.attack_range,
            }
        };
        Self {
            style,
            move_speed: template.move_speed,
            attack_damage: template.attack_damage,
            attack_cooldown_ms: template.attack_cooldown_ms,
            aggro_radius: template.aggro_radius,
        }
    }
}

/// What the controller needs to know about its current target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetView {
    pub position: Vec3,
    pub alive: bool,
}

/// Side effects requested by one controller step.
#[derive(Debug, Clone, PartialEq)]
pub enum AiAction {
    /// New position. `arrived` is set when a chase finished or was abandoned.
    Moved { position: Vec3, arrived: bool },
    ChaseStarted { path: ChasePath },
    Attack { target: Guid, damage: u32 },
    TargetLost { target: Guid },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureAiState {
    pub state: AiState,
    pub target: Option<Guid>,
    pub chase: Option<ChasePath>,
    pub last_attack_ms: Option<u64>,
    pub threat: ThreatTable,
}

impl Default for CreatureAiState {
    fn default() -> Self {
        Self {
            state: AiState::Idle,
            target: None,
            chase: None,
            last_attack_ms: None,
            threat: ThreatTable::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatureController {
    pub profile: CreatureProfile,
    pub ai: CreatureAiState,
    /// Set when the creature died, drives despawn after the corpse grace.
    pub died_at_ms: Option<u64>,
}

impl CreatureController {
    pub fn new(profile: CreatureProfile) -> Self {
        Self {
            profile,
            ai: CreatureAiState::default(),
            died_at_ms: None,
        }
    }

    pub fn state(&self) -> AiState {
        self.ai.state
    }

    pub fn is_dead(&self) -> bool {
        self.ai.state == AiState::Dead
    }

    pub fn cooldown_ready(&self, now_ms: u64) -> bool {
        match self.ai.last_attack_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.profile.attack_cooldown_ms,
        }
    }

    /// Adds proximity threat. An idle creature engages once its top threat
    /// reaches `threshold`. Returns true if this call started combat.
    pub fn add_threat(&mut self, source: Guid, amount: f32, threshold: f32) -> bool {
        if self.is_dead() {
            return false;
        }
        self.ai.threat.add(source, amount);
        if self.ai.state != AiState::Idle {
            return false;
        }
        match self.ai.threat.top() {
            Some((top, value)) if value >= threshold => {
                self.ai.state = AiState::Combat;
                self.ai.target = Some(top);
                true
            }
            _ => false,
        }
    }

    /// Damage always engages, regardless of threshold.
    pub fn on_damaged(&mut self, source: Guid, amount: u32) {
        if self.is_dead() {
            return;
        }
        self.ai.threat.add(source, amount.max(1) as f32);
        if self.ai.state == AiState::Idle {
            self.ai.state = AiState::Combat;
            self.ai.target = self.ai.threat.top().map(|(g, _)| g);
        }
    }

    pub fn decay_threat(&mut self, amount: f32) {
        self.ai.threat.decay(amount);
    }

    pub fn forget(&mut self, source: Guid) {
        self.ai.threat.remove(source);
    }

    pub fn on_death(&mut self, now_ms: u64) {
        self.ai = CreatureAiState {
            state: AiState::Dead,
            ..CreatureAiState::default()
        };
        self.died_at_ms = Some(now_ms);
    }

    /// Advances the state machine by one tick.
    ///
    /// `position` is the creature's current position and `lookup` resolves a
    /// guid to its target view, `None` if the entity left the zone.
    pub fn step(
        &mut self,
        position: Vec3,
        now_ms: u64,
        lookup: impl Fn(Guid) -> Option<TargetView>,
    ) -> Vec<AiAction> {
        let mut actions = Vec::new();
        let mut position = position;
        match self.ai.state {
            AiState::Dead | AiState::Idle => return actions,
            AiState::Attack => self.ai.state = AiState::Combat,
            AiState::Chase => {
                let Some(path) = self.ai.chase.clone() else {
                    self.ai.state = AiState::Combat;
                    return self.evaluate(position, now_ms, &lookup, actions);
                };
                if self.resolve_target(&lookup, &mut actions).is_none() {
                    // Stop where we are.
                    let here = path.position_at(now_ms);
                    self.ai.chase = None;
                    actions.insert(0, AiAction::Moved {
                        position: here,
                        arrived: true,
                    });
                    return actions;
                }
                if !path.is_complete(now_ms) {
                    actions.push(AiAction::Moved {
                        position: path.position_at(now_ms),
                        arrived: false,
                    });
                    return actions;
                }
                position = path.destination();
                actions.push(AiAction::Moved {
                    position,
                    arrived: true,
                });
                self.ai.chase = None;
                self.ai.state = AiState::Combat;
            }
            AiState::Combat => {}
        }
        self.evaluate(position, now_ms, &lookup, actions)
    }

    /// Picks the highest-threat living target still in the zone. Sources that
    /// left or died are forgotten. Drops to idle when nothing is left.
    fn resolve_target(
        &mut self,
        lookup: &impl Fn(Guid) -> Option<TargetView>,
        actions: &mut Vec<AiAction>,
    ) -> Option<(Guid, TargetView)> {
        loop {
            let Some((guid, _)) = self.ai.threat.top() else {
                if let Some(previous) = self.ai.target.take() {
                    actions.push(AiAction::TargetLost { target: previous });
                }
                self.ai.state = AiState::Idle;
                self.ai.chase = None;
                return None;
            };
            match lookup(guid) {
                Some(view) if view.alive => {
                    if self.ai.target != Some(guid) {
                        if let Some(previous) = self.ai.target {
                            actions.push(AiAction::TargetLost { target: previous });
                        }
                        self.ai.target = Some(guid);
                    }
                    return Some((guid, view));
                }
                _ => {
                    self.ai.threat.remove(guid);
                }
            }
        }
    }

    /// Combat decision: attack if in range with cooldown ready, else plan a
    /// reposition, else hold.
    fn evaluate(
        &mut self,
        position: Vec3,
        now_ms: u64,
        lookup: &impl Fn(Guid) -> Option<TargetView>,
        mut actions: Vec<AiAction>,
    ) -> Vec<AiAction> {
        let Some((target, view)) = self.resolve_target(lookup, &mut actions) else {
            return actions;
        };
        let distance = position.distance(view.position);
        if distance <= self.profile.style.attack_range() + RANGE_EPSILON && self.cooldown_ready(now_ms) {
            self.ai.state = AiState::Attack;
            self.ai.chase = None;
            self.ai.last_attack_ms = Some(now_ms);
            actions.push(AiAction::Attack {
                target,
                damage: self.profile.attack_damage,
            });
            return actions;
        }
        let path = plan_reposition(self.profile.style, position, view.position)
            .and_then(|end| ChasePath::straight(position, end, self.profile.move_speed, now_ms));
        match path {
            Some(path) => {
                self.ai.state = AiState::Chase;
                self.ai.chase = Some(path.clone());
                actions.push(AiAction::ChaseStarted { path });
            }
            None => self.ai.state = AiState::Combat,
        }
        actions
    }
}
