//! Zone simulation settings.
//!
//! One `ZoneConfig` is shared (behind an `Arc`) by every zone instance, the
//! tick scheduler and the zone supervisor.

use serde::{Deserialize, Serialize};

use crate::types::{RegionBounds, ZoneId};

fn default_tick_interval_ms() -> u64 {
    100
}
fn default_idle_timeout_ms() -> u64 {
    30_000
}
fn default_max_players_per_instance() -> usize {
    100
}
fn default_cell_size() -> f32 {
    32.0
}
fn default_aggro_threshold() -> f32 {
    10.0
}
fn default_proximity_threat_per_sec() -> f32 {
    20.0
}
fn default_threat_decay_per_sec() -> f32 {
    2.0
}
fn default_corpse_duration_ms() -> u64 {
    5_000
}
fn default_player_revive_ms() -> u64 {
    10_000
}
fn default_player_attack_cooldown_ms() -> u64 {
    1_000
}
fn default_checkpoint_interval_ticks() -> u64 {
    50
}
fn default_max_move_distance() -> f32 {
    25.0
}
fn default_chat_radius() -> f32 {
    60.0
}
fn default_inbox_depth() -> usize {
    1024
}
fn default_max_contained_panics() -> u32 {
    5
}
fn default_max_restarts() -> u32 {
    3
}

/// Simulation parameters for zone instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Interval between scheduler ticks
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long a zone with no players lingers before stopping
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Occupancy at which a new overflow instance is started
    #[serde(default = "default_max_players_per_instance")]
    pub max_players_per_instance: usize,
    /// Edge length of a spatial grid cell, roughly the largest common query radius
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,
    /// Threat an idle creature must accumulate before it engages
    #[serde(default = "default_aggro_threshold")]
    pub aggro_threshold: f32,
    /// Threat per second a player standing inside a creature's aggro radius generates
    #[serde(default = "default_proximity_threat_per_sec")]
    pub proximity_threat_per_sec: f32,
    #[serde(default = "default_threat_decay_per_sec")]
    pub threat_decay_per_sec: f32,
    /// Grace period a dead creature stays visible before it despawns
    #[serde(default = "default_corpse_duration_ms")]
    pub corpse_duration_ms: u64,
    #[serde(default = "default_player_revive_ms")]
    pub player_revive_ms: u64,
    #[serde(default = "default_player_attack_cooldown_ms")]
    pub player_attack_cooldown_ms: u64,
    /// Ticks between last-known-good checkpoints (0 disables)
    #[serde(default = "default_checkpoint_interval_ticks")]
    pub checkpoint_interval_ticks: u64,
    /// Largest distance a single move command may cover
    #[serde(default = "default_max_move_distance")]
    pub max_move_distance: f32,
    #[serde(default = "default_chat_radius")]
    pub chat_radius: f32,
    #[serde(default)]
    pub region: RegionBounds,
    /// Zones that are created at startup and never idle-stop
    #[serde(default)]
    pub persistent_zones: Vec<ZoneId>,
    /// Capacity of each zone's message queue
    #[serde(default = "default_inbox_depth")]
    pub inbox_depth: usize,
    /// Panics a zone may contain before it gives up and exits for a restart
    #[serde(default = "default_max_contained_panics")]
    pub max_contained_panics: u32,
    /// Restarts the supervisor grants one zone instance
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_players_per_instance: default_max_players_per_instance(),
            cell_size: default_cell_size(),
            aggro_threshold: default_aggro_threshold(),
            proximity_threat_per_sec: default_proximity_threat_per_sec(),
            threat_decay_per_sec: default_threat_decay_per_sec(),
            corpse_duration_ms: default_corpse_duration_ms(),
            player_revive_ms: default_player_revive_ms(),
            player_attack_cooldown_ms: default_player_attack_cooldown_ms(),
            checkpoint_interval_ticks: default_checkpoint_interval_ticks(),
            max_move_distance: default_max_move_distance(),
            chat_radius: default_chat_radius(),
            region: RegionBounds::default(),
            persistent_zones: Vec::new(),
            inbox_depth: default_inbox_depth(),
            max_contained_panics: default_max_contained_panics(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl ZoneConfig {
    /// Checks values that would make the simulation misbehave.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than zero".into());
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(format!("cell_size must be positive, got {}", self.cell_size));
        }
        if !self.region.is_valid() {
            return Err("region bounds must have min < max on every axis".into());
        }
        if self.max_players_per_instance == 0 {
            return Err("max_players_per_instance must be at least 1".into());
        }
        if self.inbox_depth == 0 {
            return Err("inbox_depth must be at least 1".into());
        }
        if self.max_move_distance <= 0.0 {
            return Err("max_move_distance must be positive".into());
        }
        Ok(())
    }
}
