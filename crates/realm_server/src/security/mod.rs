//! Connection admission checks, command rate limiting and chat validation.

use crate::config::SecurityConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub mod input_validation;
pub mod rate_limiter;

pub use input_validation::validate_chat_message;
pub use rate_limiter::RateLimiter;

/// Central security manager for the zone server
#[derive(Debug)]
pub struct SecurityManager {
    config: SecurityConfig,
    rate_limiter: RateLimiter,
    connection_tracker: Arc<RwLock<HashMap<IpAddr, ConnectionInfo>>>,
}

#[derive(Debug, Clone)]
struct ConnectionInfo {
    count: u32,
    last_seen: Instant,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig) -> Self {
        let rate_limiter = RateLimiter::per_second(config.max_commands_per_second);
        Self {
            config,
            rate_limiter,
            connection_tracker: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Validates an incoming connection attempt and counts it against the
    /// IP's limit. Every `Ok` must be paired with [`Self::on_disconnect`].
    pub async fn validate_connection(&self, ip: IpAddr) -> Result<(), SecurityError> {
        if self.config.banned_ips.contains(&ip) {
            return Err(SecurityError::BannedIp(ip));
        }

        if self.config.enable_connection_limits {
            let mut tracker = self.connection_tracker.write().await;
            let info = tracker.entry(ip).or_insert(ConnectionInfo {
                count: 0,
                last_seen: Instant::now(),
            });

            if info.count >= self.config.max_connections_per_ip {
                return Err(SecurityError::TooManyConnections(ip));
            }

            info.count += 1;
            info.last_seen = Instant::now();
        }

        Ok(())
    }

    /// Charges one game command to `ip`.
    pub async fn check_command_rate(&self, ip: IpAddr) -> Result<(), SecurityError> {
        if self.config.enable_rate_limiting && !self.rate_limiter.check_rate_limit(ip).await {
            return Err(SecurityError::RateLimitExceeded(ip));
        }
        Ok(())
    }

    pub async fn on_disconnect(&self, ip: IpAddr) {
        if self.config.enable_connection_limits {
            let mut tracker = self.connection_tracker.write().await;
            if let Some(info) = tracker.get_mut(&ip) {
                info.count = info.count.saturating_sub(1);
                if info.count == 0 {
                    tracker.remove(&ip);
                }
            }
        }
    }

    /// Drops tracking data for IPs not seen for five minutes and idle rate
    /// limiter buckets.
    pub async fn cleanup(&self) {
        if self.config.enable_connection_limits {
            let mut tracker = self.connection_tracker.write().await;
            let cutoff = Instant::now() - Duration::from_secs(300);
            tracker.retain(|_, info| info.count > 0 || info.last_seen > cutoff);
        }
        self.rate_limiter.cleanup_old_entries().await;
    }

    pub async fn get_stats(&self) -> SecurityStats {
        SecurityStats {
            tracked_ips: self.connection_tracker.read().await.len(),
            rate_limited_commands: self.rate_limiter.blocked_count(),
            banned_ips: self.config.banned_ips.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStats {
    pub tracked_ips: usize,
    pub rate_limited_commands: u64,
    pub banned_ips: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("IP address {0} is banned")]
    BannedIp(IpAddr),

    #[error("Too many connections from IP {0}")]
    TooManyConnections(IpAddr),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Rate limit exceeded for IP {0}")]
    RateLimitExceeded(IpAddr),

    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Malicious content detected")]
    MaliciousContent,
}
