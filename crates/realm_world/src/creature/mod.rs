//! Creature behavior: threat tracking, chase planning and the combat state
//! machine evaluated once per zone tick.

pub mod chase;
pub mod controller;
pub mod threat;

pub use chase::{plan_reposition, ChasePath, CombatStyle, RANGE_EPSILON};
pub use controller::{
    AiAction, AiState, CreatureAiState, CreatureController, CreatureProfile, TargetView,
};
pub use threat::ThreatTable;
