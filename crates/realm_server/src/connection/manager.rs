//! Tracks live connections for admission and diagnostics.

use super::ConnectionId;
use realm_world::{current_timestamp_ms, CharacterId, ZoneKey};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Where a connection is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    Handshaking,
    InWorld,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub connected_at_ms: u64,
    pub phase: ConnectionPhase,
    pub character: Option<CharacterId>,
    pub zone: Option<ZoneKey>,
}

/// Registry of every socket the server currently holds open.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionInfo>>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn add_connection(&self, remote_addr: SocketAddr) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = ConnectionInfo {
            id,
            remote_addr,
            connected_at_ms: current_timestamp_ms(),
            phase: ConnectionPhase::Handshaking,
            character: None,
            zone: None,
        };
        self.connections.write().await.insert(id, info);
        info!("🔗 Connection {} from {}", id, remote_addr);
        id
    }

    pub async fn remove_connection(&self, id: ConnectionId) {
        if let Some(info) = self.connections.write().await.remove(&id) {
            info!("❌ Connection {} from {} disconnected", id, info.remote_addr);
        }
    }

    /// Marks the connection as playing `character` in `zone`.
    pub async fn enter_world(&self, id: ConnectionId, character: CharacterId, zone: ZoneKey) {
        if let Some(info) = self.connections.write().await.get_mut(&id) {
            info.phase = ConnectionPhase::InWorld;
            info.character = Some(character);
            info.zone = Some(zone);
        }
    }

    pub async fn set_zone(&self, id: ConnectionId, zone: ZoneKey) {
        if let Some(info) = self.connections.write().await.get_mut(&id) {
            info.zone = Some(zone);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Connections that have completed the handshake.
    pub async fn in_world_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|info| info.phase == ConnectionPhase::InWorld)
            .count()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.read().await.get(&id).cloned()
    }

    /// All connections ordered by id.
    pub async fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<_> = self.connections.read().await.values().cloned().collect();
        all.sort_by_key(|info| info.id);
        all
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connection_lifecycle() {
        let manager = ConnectionManager::new();
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();

        let a = manager.add_connection(addr).await;
        let b = manager.add_connection(addr).await;
        assert_ne!(a, b);
        assert_eq!(manager.connection_count().await, 2);
        assert_eq!(manager.in_world_count().await, 0);

        manager
            .enter_world(a, CharacterId(7), ZoneKey::new(1, 1))
            .await;
        let info = manager.get(a).await.unwrap();
        assert_eq!(info.phase, ConnectionPhase::InWorld);
        assert_eq!(info.character, Some(CharacterId(7)));
        assert_eq!(manager.in_world_count().await, 1);

        manager.remove_connection(a).await;
        manager.remove_connection(a).await;
        assert_eq!(manager.connection_count().await, 1);
        assert_eq!(manager.snapshot().await[0].id, b);
    }
}
