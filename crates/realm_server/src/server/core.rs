//! The zone server front end: bind, accept, hand each socket to its own
//! task, and drain sessions on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use realm_protocol::TokenAuthority;
use realm_world::{CharacterStore, Directory, ShutdownState, SupervisorHandle};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{handle_connection, ServerContext};
use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::error::ServerError;
use crate::health::metrics::{names, MetricsCollector, MetricsSnapshot};
use crate::security::{SecurityManager, SecurityStats};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
/// How long sessions get to say goodbye and save after shutdown begins.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// World-side collaborators the front end talks to.
#[derive(Clone)]
pub struct WorldServices {
    pub directory: Directory,
    pub supervisor: SupervisorHandle,
    pub store: Arc<dyn CharacterStore>,
}

/// Point-in-time view for the periodic health log.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub connections: usize,
    pub sessions_in_world: usize,
    pub zones: usize,
    pub players: usize,
    pub security: SecurityStats,
    pub metrics: MetricsSnapshot,
}

pub struct RealmServer {
    context: Arc<ServerContext>,
    listener: TcpListener,
}

impl RealmServer {
    /// Binds the listener. Port 0 picks a free port; see [`Self::local_addr`].
    pub async fn bind(
        config: ServerConfig,
        world: WorldServices,
        shutdown: ShutdownState,
    ) -> Result<Self, ServerError> {
        if config.token_secret.is_empty() {
            return Err(ServerError::Internal("token secret must not be empty".into()));
        }
        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("bind {} failed: {e}", config.bind_address)))?;

        let context = Arc::new(ServerContext {
            tokens: TokenAuthority::new(config.token_secret.as_bytes().to_vec()),
            security: SecurityManager::new(config.security.clone()),
            connections: ConnectionManager::new(),
            metrics: MetricsCollector::new(),
            directory: world.directory,
            supervisor: world.supervisor,
            store: world.store,
            shutdown,
            config,
        });
        Ok(Self { context, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Network(e.to_string()))
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    pub fn spawn(self) -> JoinHandle<Result<(), ServerError>> {
        tokio::spawn(self.run())
    }

    /// Accepts until shutdown is initiated, then waits for open sessions to
    /// disconnect and save.
    pub async fn run(self) -> Result<(), ServerError> {
        let ctx = self.context;
        info!("🚀 Realm server listening on {}", self.listener.local_addr().map_err(|e| ServerError::Network(e.to_string()))?);

        let mut sessions = FuturesUnordered::new();
        let mut shutdown_poll = interval(SHUTDOWN_POLL);
        shutdown_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            // Per-socket failures such as EMFILE; keep serving.
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    if ctx.shutdown.is_shutdown_initiated() {
                        debug!(%addr, "refusing connection during shutdown");
                        continue;
                    }
                    if let Err(e) = ctx.security.validate_connection(addr.ip()).await {
                        ctx.metrics.increment_counter(names::CONNECTIONS_REFUSED, 1).await;
                        warn!(%addr, "🚫 Connection refused: {}", e);
                        continue;
                    }
                    ctx.metrics.increment_counter(names::CONNECTIONS_ACCEPTED, 1).await;
                    sessions.push(tokio::spawn(handle_connection(stream, addr, Arc::clone(&ctx))));
                }
                Some(finished) = sessions.next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task failed: {}", e);
                    }
                }
                _ = shutdown_poll.tick() => {
                    if ctx.shutdown.is_shutdown_initiated() {
                        info!("🛑 Accept loop stopping - shutdown initiated");
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        info!("🧹 Waiting for {} session(s) to close...", sessions.len());
        let drained = timeout(SESSION_DRAIN_TIMEOUT, async {
            while sessions.next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("⚠️ {} session(s) still open after drain timeout", sessions.len());
        }
        info!("✅ Server cleanup completed");
        Ok(())
    }
}

impl ServerContext {
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.connection_count().await,
            sessions_in_world: self.connections.in_world_count().await,
            zones: self.directory.zone_count(),
            players: self.directory.player_count(),
            security: self.security.get_stats().await,
            metrics: self.metrics.get_all_metrics().await,
        }
    }
}
