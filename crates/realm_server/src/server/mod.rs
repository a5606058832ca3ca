//! Accept loop and per-connection handling.

pub mod core;
pub mod handlers;

pub use self::core::{RealmServer, ServerStats, WorldServices};
pub use handlers::handle_connection;

use std::sync::Arc;

use realm_protocol::TokenAuthority;
use realm_world::{CharacterStore, Directory, ShutdownState, SupervisorHandle};

use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::health::metrics::MetricsCollector;
use crate::security::SecurityManager;

/// Everything a connection task needs, shared by all of them.
pub struct ServerContext {
    pub config: ServerConfig,
    pub tokens: TokenAuthority,
    pub directory: Directory,
    pub supervisor: SupervisorHandle,
    pub store: Arc<dyn CharacterStore>,
    pub connections: ConnectionManager,
    pub security: SecurityManager,
    pub metrics: MetricsCollector,
    pub shutdown: ShutdownState,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("bind_address", &self.config.bind_address)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}
