//! # Realm server front end
//!
//! Accepts TCP connections, runs the greeting/hello/accept handshake,
//! authenticates session tokens and then relays each player's commands to
//! the zone actor that owns the player. World simulation lives in
//! `realm_world`; this crate only speaks the protocol and routes messages.

pub use config::{SecurityConfig, ServerConfig};
pub use connection::{ConnectionManager, ProtocolSession};
pub use error::{ServerError, SessionError};
pub use health::metrics::MetricsCollector;
pub use health::{HealthReport, HealthStatus};
pub use security::SecurityManager;
pub use server::{RealmServer, ServerContext, ServerStats, WorldServices};

pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod security;
pub mod server;
