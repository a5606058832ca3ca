//! Fixed-rate tick delivery.
//!
//! Ticks are handed to every registered zone with `try_send`. A zone that is
//! still busy with earlier work has a full inbox and simply misses the tick,
//! so one slow zone never delays the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::directory::Directory;
use crate::shutdown::ShutdownState;
use crate::utils::current_timestamp_ms;

#[derive(Debug, Default)]
pub struct TickStats {
    ticks: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickSnapshot {
    pub ticks: u64,
    pub delivered: u64,
    pub skipped: u64,
}

impl TickStats {
    pub fn snapshot(&self) -> TickSnapshot {
        TickSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

pub struct TickScheduler {
    directory: Directory,
    tick_interval_ms: u64,
    stats: Arc<TickStats>,
}

impl TickScheduler {
    pub fn new(directory: Directory, tick_interval_ms: u64) -> Self {
        Self {
            directory,
            tick_interval_ms,
            stats: Arc::new(TickStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<TickStats> {
        Arc::clone(&self.stats)
    }

    /// Offers one tick to every zone. Returns how many accepted it.
    pub fn tick_once(&self, sequence: u64, now_ms: u64) -> usize {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;
        for zone in self.directory.all_zones() {
            match zone.try_tick(now_ms, sequence) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(zone = %zone.key(), sequence, "zone busy, tick skipped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(zone = %zone.key(), "zone inbox closed");
                }
            }
        }
        self.stats
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Ticks until shutdown is initiated. An interval of zero disables
    /// ticking.
    pub async fn run(self, shutdown: ShutdownState) {
        if self.tick_interval_ms == 0 {
            info!("⏸️ Zone ticking disabled (interval: 0ms)");
            return;
        }
        info!("🕒 Zone tick started with interval: {}ms", self.tick_interval_ms);

        let mut ticker = interval(Duration::from_millis(self.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sequence: u64 = 0;
        loop {
            ticker.tick().await;
            if shutdown.is_shutdown_initiated() {
                info!("🕒 Zone tick stopping - shutdown initiated");
                break;
            }
            sequence += 1;
            self.tick_once(sequence, current_timestamp_ms());
        }
        info!("✅ Zone tick loop completed gracefully");
    }

    pub fn spawn(self, shutdown: ShutdownState) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::content::StaticContent;
    use crate::events::NullEventSink;
    use crate::types::ZoneKey;
    use crate::utils::GuidAllocator;
    use crate::zone::{ZoneActor, ZoneInstance};

    fn instance(directory: &Directory, zone_id: u32) -> ZoneInstance {
        let mut zone = ZoneInstance::new(
            ZoneKey::new(zone_id, 1),
            Arc::new(ZoneConfig {
                persistent_zones: vec![zone_id],
                ..ZoneConfig::default()
            }),
            Arc::new(StaticContent::starter()),
            Arc::new(NullEventSink),
            directory.clone(),
            GuidAllocator::starting_at(u64::from(zone_id) << 32),
        );
        zone.load(current_timestamp_ms());
        zone
    }

    #[tokio::test]
    async fn stuck_zone_does_not_hold_back_live_zone() {
        let directory = Directory::new();

        // Never run: its single-slot inbox fills with the first tick.
        let (stuck_actor, stuck) = ZoneActor::new(instance(&directory, 1), 1, 5);
        let _stuck_registration = directory.register_zone(stuck.clone()).unwrap();

        let (mut live_actor, live) = ZoneActor::new(instance(&directory, 2), 64, 5);
        live_actor.attach_registration(directory.register_zone(live.clone()).unwrap());
        let _live_task = tokio::spawn(live_actor.run());

        let scheduler = TickScheduler::new(directory.clone(), 10);
        let stats = scheduler.stats();
        let shutdown = ShutdownState::new();
        let task = scheduler.spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.initiate_shutdown();
        task.await.unwrap();

        let snapshot = stats.snapshot();
        assert!(snapshot.ticks >= 3, "{snapshot:?}");
        assert!(snapshot.skipped >= snapshot.ticks - 1, "{snapshot:?}");
        assert!(live.stats().await.unwrap().tick_sequence >= 2);
        drop(stuck_actor);
    }

    #[tokio::test]
    async fn zero_interval_disables_ticking() {
        let scheduler = TickScheduler::new(Directory::new(), 0);
        let stats = scheduler.stats();
        scheduler.run(ShutdownState::new()).await;
        assert_eq!(stats.snapshot().ticks, 0);
    }

    #[test]
    fn tick_once_counts_each_zone() {
        let directory = Directory::new();
        let (_actor, handle) = ZoneActor::new(instance(&directory, 1), 4, 5);
        let _registration = directory.register_zone(handle).unwrap();
        let scheduler = TickScheduler::new(directory, 100);
        assert_eq!(scheduler.tick_once(1, 0), 1);
        assert_eq!(scheduler.stats().snapshot().delivered, 1);
    }
}
