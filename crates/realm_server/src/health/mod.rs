//! Health assessment for the periodic status log.

use realm_world::TickSnapshot;
use serde::{Deserialize, Serialize};

use crate::server::ServerStats;

pub mod metrics;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub warnings: Vec<String>,
}

/// Ticks skipped above this share of offered ticks mark the server degraded.
const SKIPPED_TICK_RATIO: f64 = 0.10;
/// Connection usage above this share of the cap marks the server degraded.
const CONNECTION_PRESSURE: f64 = 0.90;

pub fn assess(stats: &ServerStats, ticks: TickSnapshot, max_connections: usize) -> HealthReport {
    let mut warnings = Vec::new();

    let offered = ticks.delivered + ticks.skipped;
    if offered > 0 {
        let ratio = ticks.skipped as f64 / offered as f64;
        if ratio > SKIPPED_TICK_RATIO {
            warnings.push(format!("{:.0}% of zone ticks skipped", ratio * 100.0));
        }
    }
    if max_connections > 0
        && stats.sessions_in_world as f64 >= max_connections as f64 * CONNECTION_PRESSURE
    {
        warnings.push(format!(
            "{} of {} session slots in use",
            stats.sessions_in_world, max_connections
        ));
    }

    let status = if ticks.ticks > 0 && ticks.delivered == 0 && stats.zones > 0 {
        warnings.push("no zone accepted a tick".to_string());
        HealthStatus::Unhealthy
    } else if warnings.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    HealthReport { status, warnings }
}
