//! Metrics collection for the network front end.
//!
//! Counters are keyed by name; the well-known names live in [`names`] so
//! sessions and the health report agree on them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

use realm_protocol::DenyReason;

pub mod names {
    pub const CONNECTIONS_ACCEPTED: &str = "connections_accepted_total";
    pub const CONNECTIONS_REFUSED: &str = "connections_refused_total";
    pub const SESSIONS_ESTABLISHED: &str = "sessions_established_total";
    pub const HANDSHAKE_TIMEOUTS: &str = "handshake_timeouts_total";
    pub const PROTOCOL_ERRORS: &str = "protocol_errors_total";
    pub const COMMANDS: &str = "commands_total";
    pub const COMMANDS_RATE_LIMITED: &str = "commands_rate_limited_total";
    pub const CHAT_REJECTED: &str = "chat_rejected_total";
    pub const UNKNOWN_OPCODES: &str = "unknown_opcodes_total";
    pub const WHISPERS: &str = "whispers_total";
    pub const ZONE_REENTRIES: &str = "zone_reentries_total";
    pub const HANDSHAKE_SECONDS: &str = "handshake_seconds";
    pub const ACTIVE_SESSIONS: &str = "active_sessions";
}

/// Counter name for a refused hello.
pub fn denial_counter(reason: DenyReason) -> String {
    format!("handshake_denied_{}_total", reason.to_string().replace('-', "_"))
}

/// Counters, gauges and histograms for the zone server
#[derive(Debug)]
pub struct MetricsCollector {
    /// Monotonic totals such as sessions established
    counters: Arc<RwLock<HashMap<String, u64>>>,
    /// Point-in-time values such as active sessions
    gauges: Arc<RwLock<HashMap<String, f64>>>,
    /// Latency distributions, in seconds
    histograms: Arc<RwLock<HashMap<String, Histogram>>>,
    /// Reference point for uptime
    start_time: Instant,
}

/// Distribution of recorded values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    /// Number of samples
    pub count: u64,
    /// Sum of all samples
    pub sum: f64,
    /// Smallest sample seen
    pub min: f64,
    /// Largest sample seen
    pub max: f64,
    /// Cumulative buckets for percentile estimates
    pub buckets: Vec<HistogramBucket>,
}

/// One cumulative histogram bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Inclusive upper bound
    pub upper_bound: f64,
    /// Samples at or below the bound
    pub count: u64,
}

impl MetricsCollector {
    /// Creates an empty collector
    pub fn new() -> Self {
        Self {
            counters: Arc::new(RwLock::new(HashMap::new())),
            gauges: Arc::new(RwLock::new(HashMap::new())),
            histograms: Arc::new(RwLock::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    /// Adds `value` to a counter
    pub async fn increment_counter(&self, name: &str, value: u64) {
        let mut counters = self.counters.write().await;
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Sets a gauge to `value`
    pub async fn set_gauge(&self, name: &str, value: f64) {
        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), value);
    }

    /// Records one sample in a histogram
    pub async fn record_histogram(&self, name: &str, value: f64) {
        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(Histogram::new)
            .record(value);
    }

    /// Current value of a counter, zero if never incremented
    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().await.get(name).copied().unwrap_or(0)
    }

    /// Current value of a gauge, if ever set
    pub async fn get_gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().await.get(name).copied()
    }

    /// Seconds since the collector was created
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot of every metric
    pub async fn get_all_metrics(&self) -> MetricsSnapshot {
        let counters = self.counters.read().await.clone();
        let gauges = self.gauges.read().await.clone();
        let histograms = self.histograms.read().await.clone();

        MetricsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            uptime_seconds: self.uptime_seconds(),
            counters,
            gauges,
            histograms,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// All metrics at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, Histogram>,
}

impl MetricsSnapshot {
    /// Value of a counter in this snapshot
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Sum of every `handshake_denied_*` counter.
    pub fn total_denials(&self) -> u64 {
        self.counters
            .iter()
            .filter(|(name, _)| name.starts_with("handshake_denied_"))
            .map(|(_, value)| *value)
            .sum()
    }
}

impl Histogram {
    /// Creates a histogram with latency buckets from 1 ms to 10 s
    pub fn new() -> Self {
        let buckets = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
            .into_iter()
            .map(|upper_bound| HistogramBucket {
                upper_bound,
                count: 0,
            })
            .collect();

        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            buckets,
        }
    }

    /// Records one sample
    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        for bucket in &mut self.buckets {
            if value <= bucket.upper_bound {
                bucket.count += 1;
            }
        }
    }

    /// Mean of all samples, zero when empty
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Upper bound of the first bucket covering `p` percent of samples.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let target = ((self.count as f64 * p / 100.0).ceil() as u64).max(1);
        self.buckets
            .iter()
            .find(|bucket| bucket.count >= target)
            .map(|bucket| bucket.upper_bound)
            .unwrap_or(self.max)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_accumulate() {
        let collector = MetricsCollector::new();
        collector.increment_counter(names::COMMANDS, 5).await;
        collector.increment_counter(names::COMMANDS, 3).await;

        assert_eq!(collector.get_counter(names::COMMANDS).await, 8);
        assert_eq!(collector.get_counter("nonexistent").await, 0);
    }

    #[tokio::test]
    async fn gauges_overwrite() {
        let collector = MetricsCollector::new();
        collector.set_gauge(names::ACTIVE_SESSIONS, 4.0).await;
        collector.set_gauge(names::ACTIVE_SESSIONS, 2.0).await;
        assert_eq!(collector.get_gauge(names::ACTIVE_SESSIONS).await, Some(2.0));
        assert_eq!(collector.get_gauge("nonexistent").await, None);
    }

    #[tokio::test]
    async fn denials_are_counted_per_reason() {
        let collector = MetricsCollector::new();
        collector
            .increment_counter(&denial_counter(DenyReason::InvalidToken), 1)
            .await;
        collector
            .increment_counter(&denial_counter(DenyReason::TokenExpired), 2)
            .await;

        let snapshot = collector.get_all_metrics().await;
        assert_eq!(snapshot.counter("handshake_denied_invalid_token_total"), 1);
        assert_eq!(snapshot.total_denials(), 3);
    }

    #[test]
    fn histogram_percentiles_are_monotonic() {
        let mut histogram = Histogram::new();
        for i in 1..=1000 {
            histogram.record(i as f64 / 1000.0);
        }
        let p50 = histogram.percentile(50.0);
        let p99 = histogram.percentile(99.0);
        assert!(p50 > 0.0);
        assert!(p99 >= p50);
        assert!((histogram.average() - 0.5005).abs() < 1e-9);
    }
}
