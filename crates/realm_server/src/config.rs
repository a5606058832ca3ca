//! Server configuration types and defaults.
//!
//! `ServerConfig` carries everything the network front end needs and embeds
//! the [`ZoneConfig`] handed to the world simulation.

use std::net::{IpAddr, SocketAddr};

use realm_protocol::DEFAULT_MAX_FRAME;
use realm_world::{ZoneConfig, ZoneId};
use serde::{Deserialize, Serialize};

/// Configuration structure for the zone server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrently connected sessions
    pub max_connections: usize,

    /// Time a client has to complete the handshake
    pub handshake_timeout_ms: u64,

    /// Secret shared with the login service for token signatures
    pub token_secret: String,

    /// Tokens issued longer ago than this are refused
    pub token_ttl_ms: u64,

    /// How often an established session re-checks its token expiry
    pub token_recheck_interval_ms: u64,

    /// Upper bound on waiting for a whisper recipient's queue
    pub whisper_timeout_ms: u64,

    /// Packets buffered per session before zones start dropping
    pub outbound_queue_depth: usize,

    /// Largest accepted frame, length field excluded
    pub max_frame_size: u32,

    /// Longest chat message accepted, in bytes
    pub max_chat_length: usize,

    /// Zone used for characters whose saved zone no longer exists
    pub default_zone: ZoneId,

    /// Security configuration settings
    pub security: SecurityConfig,

    /// World simulation settings
    pub zone: ZoneConfig,
}

/// Connection and input protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Enable per-IP command rate limiting
    pub enable_rate_limiting: bool,

    /// Commands per second allowed from one IP
    pub max_commands_per_second: u32,

    /// Rate-limited commands tolerated before the session is closed
    pub max_rate_violations: u32,

    /// Enforce `max_connections_per_ip`
    pub enable_connection_limits: bool,

    /// Banned IP addresses
    pub banned_ips: Vec<IpAddr>,

    /// Maximum concurrent connections per IP
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 7777)),
            max_connections: 1000,
            handshake_timeout_ms: 10_000,
            token_secret: "change-me".to_string(),
            token_ttl_ms: 5 * 60 * 1000,
            token_recheck_interval_ms: 30_000,
            whisper_timeout_ms: 500,
            outbound_queue_depth: 256,
            max_frame_size: DEFAULT_MAX_FRAME,
            max_chat_length: 255,
            default_zone: 1,
            security: SecurityConfig::default(),
            zone: ZoneConfig::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            max_commands_per_second: 20,
            max_rate_violations: 100,
            enable_connection_limits: true,
            banned_ips: Vec::new(),
            max_connections_per_ip: 10,
        }
    }
}
