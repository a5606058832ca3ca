//! Rate limiting implementation using token bucket algorithm.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Per-IP token buckets. Each bucket holds up to `max_tokens` and regains one
/// token every `refill_interval`.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<IpAddr, TokenBucket>>>,
    max_tokens: u32,
    refill_interval: Duration,
    blocked_count: AtomicU64,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            max_tokens: max_tokens.max(1),
            refill_interval: refill_interval.max(Duration::from_millis(1)),
            blocked_count: AtomicU64::new(0),
        }
    }

    /// `per_second` commands per second with a burst of the same size.
    pub fn per_second(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self::new(per_second, Duration::from_secs(1) / per_second)
    }

    /// Takes one token for `ip`. Returns false when the bucket is empty.
    pub async fn check_rate_limit(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.write().await;
        let now = Instant::now();

        let bucket = buckets.entry(ip).or_insert(TokenBucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        let intervals = (elapsed.as_nanos() / self.refill_interval.as_nanos()) as u64;
        if intervals > 0 {
            let added = intervals.min(u64::from(self.max_tokens)) as u32;
            bucket.tokens = bucket.tokens.saturating_add(added).min(self.max_tokens);
            if bucket.tokens == self.max_tokens {
                bucket.last_refill = now;
            } else {
                // Carry the partial interval so a steady sender is not starved.
                bucket.last_refill += self.refill_interval * added;
            }
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            self.blocked_count.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked_count.load(Ordering::Relaxed)
    }

    /// Forgets buckets that have been full and idle for an hour.
    pub async fn cleanup_old_entries(&self) {
        let mut buckets = self.buckets.write().await;
        let cutoff = Instant::now() - Duration::from_secs(3600);
        buckets.retain(|_, bucket| bucket.last_refill > cutoff);
    }

    pub async fn tracked(&self) -> usize {
        self.buckets.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn allows_burst_then_blocks() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

        for _ in 0..5 {
            assert!(limiter.check_rate_limit(ip).await);
        }
        assert!(!limiter.check_rate_limit(ip).await);
        assert_eq!(limiter.blocked_count(), 1);
    }

    #[tokio::test]
    async fn buckets_are_per_ip() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check_rate_limit(a).await);
        assert!(!limiter.check_rate_limit(a).await);
        assert!(limiter.check_rate_limit(b).await);
        assert_eq!(limiter.tracked().await, 2);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

        assert!(limiter.check_rate_limit(ip).await);
        assert!(limiter.check_rate_limit(ip).await);
        assert!(!limiter.check_rate_limit(ip).await);

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(limiter.check_rate_limit(ip).await);
    }
}
