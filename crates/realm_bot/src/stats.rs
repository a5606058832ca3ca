//! Counters shared by every bot task, summarised when the run ends.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::view::Notable;

#[derive(Debug, Default)]
pub struct RunStats {
    pub connected: AtomicU64,
    pub denied: AtomicU64,
    pub failed: AtomicU64,
    pub entered: AtomicU64,
    pub commands_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub rejected: AtomicU64,
    pub kills: AtomicU64,
    pub deaths: AtomicU64,
    pub chat_heard: AtomicU64,
    pub whispers: AtomicU64,
    pub pongs: AtomicU64,
    pub rtt_total_ms: AtomicU64,
    pub disconnects: AtomicU64,
}

impl RunStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, notable: Notable) {
        let counter = match notable {
            Notable::EnteredZone => &self.entered,
            Notable::Rejected => &self.rejected,
            Notable::CreatureKilled => &self.kills,
            Notable::Died => &self.deaths,
            Notable::Chat => &self.chat_heard,
            Notable::Whisper => &self.whispers,
        };
        Self::bump(counter);
    }

    pub fn record_rtt(&self, rtt_ms: u64) {
        self.pongs.fetch_add(1, Ordering::Relaxed);
        self.rtt_total_ms.fetch_add(rtt_ms, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn average_rtt_ms(&self) -> Option<f64> {
        let pongs = Self::get(&self.pongs);
        (pongs > 0).then(|| Self::get(&self.rtt_total_ms) as f64 / pongs as f64)
    }
}
