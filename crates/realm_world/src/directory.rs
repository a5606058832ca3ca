//! Directory service: concurrent lookup from a logical id to the actor
//! currently responsible for it.
//!
//! Every registration returns a [`Registration`] guard. Dropping the guard
//! unregisters the entry, so an actor that owns its guards is removed from
//! the directory automatically however it terminates.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use realm_protocol::{Guid, ServerPacket, WhisperOutcome};
use tokio::sync::mpsc;
use tracing::trace;

use crate::types::{CharacterId, ZoneId, ZoneKey};
use crate::zone::ZoneHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is already registered")]
pub struct AlreadyRegistered(pub String);

struct Slot<V> {
    token: u64,
    value: V,
}

/// One concurrent id -> address map.
pub struct Registry<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, Slot<V>>>,
    tokens: Arc<AtomicU64>,
}

impl<K: Eq + Hash, V> Clone for Registry<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            tokens: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Claims `key`. Fails if someone else holds it.
    pub fn register(&self, key: K, value: V) -> Result<Registration<K, V>, AlreadyRegistered> {
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        match self.entries.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(AlreadyRegistered(format!("{key:?}")))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Slot { token, value });
                Ok(Registration {
                    entries: Arc::clone(&self.entries),
                    key: Some(key),
                    token,
                })
            }
        }
    }

    pub fn lookup(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|slot| slot.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> Vec<V> {
        self.entries.iter().map(|e| e.value().value.clone()).collect()
    }

    /// Entries whose key satisfies `pred`.
    pub fn filter(&self, pred: impl Fn(&K) -> bool) -> Vec<(K, V)> {
        self.entries
            .iter()
            .filter(|e| pred(e.key()))
            .map(|e| (e.key().clone(), e.value().value.clone()))
            .collect()
    }
}

impl<K, V> Default for Registry<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters its key when dropped, unless the key has since been taken
/// over by a newer registration.
pub struct Registration<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, Slot<V>>>,
    key: Option<K>,
    token: u64,
}

impl<K: Eq + Hash, V> Registration<K, V> {
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }
}

impl<K: Eq + Hash, V> Drop for Registration<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let token = self.token;
            self.entries.remove_if(&key, |_, slot| slot.token == token);
        }
    }
}

impl<K: Eq + Hash + std::fmt::Debug, V> std::fmt::Debug for Registration<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

/// How to reach a logged-in player's session.
#[derive(Debug, Clone)]
pub struct PlayerAddress {
    pub character_id: CharacterId,
    pub name: String,
    pub guid: Guid,
    pub outbound: mpsc::Sender<ServerPacket>,
}

pub type ZoneRegistration = Registration<ZoneKey, ZoneHandle>;
pub type PlayerRegistration = Registration<CharacterId, PlayerAddress>;
pub type EntityRegistration = Registration<Guid, ZoneKey>;

/// The shared directory handed to every component that routes messages.
#[derive(Clone, Default)]
pub struct Directory {
    zones: Registry<ZoneKey, ZoneHandle>,
    players: Registry<CharacterId, PlayerAddress>,
    entities: Registry<Guid, ZoneKey>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_zone(
        &self,
        handle: ZoneHandle,
    ) -> Result<ZoneRegistration, AlreadyRegistered> {
        self.zones.register(handle.key(), handle)
    }

    pub fn zone(&self, key: ZoneKey) -> Option<ZoneHandle> {
        self.zones.lookup(&key)
    }

    /// Running instances of `zone_id`, ordered by instance id.
    pub fn zone_instances(&self, zone_id: ZoneId) -> Vec<ZoneHandle> {
        let mut handles: Vec<_> = self
            .zones
            .filter(|key| key.zone_id == zone_id)
            .into_iter()
            .map(|(_, handle)| handle)
            .collect();
        handles.sort_by_key(|h| h.key());
        handles
    }

    pub fn all_zones(&self) -> Vec<ZoneHandle> {
        self.zones.values()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn register_player(
        &self,
        address: PlayerAddress,
    ) -> Result<PlayerRegistration, AlreadyRegistered> {
        self.players.register(address.character_id, address)
    }

    pub fn player(&self, character_id: CharacterId) -> Option<PlayerAddress> {
        self.players.lookup(&character_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn register_entity(
        &self,
        guid: Guid,
        zone: ZoneKey,
    ) -> Result<EntityRegistration, AlreadyRegistered> {
        self.entities.register(guid, zone)
    }

    /// Which zone instance currently owns `guid`.
    pub fn entity_zone(&self, guid: Guid) -> Option<ZoneKey> {
        self.entities.lookup(&guid)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Delivers `packet` to a player's session wherever it is, waiting at
    /// most `timeout` for room in its queue.
    pub async fn deliver_to_player(
        &self,
        character_id: CharacterId,
        packet: ServerPacket,
        timeout: Duration,
    ) -> WhisperOutcome {
        let Some(address) = self.player(character_id) else {
            return WhisperOutcome::NotFound;
        };
        match tokio::time::timeout(timeout, address.outbound.send(packet)).await {
            Ok(Ok(())) => WhisperOutcome::Delivered,
            Ok(Err(_)) => {
                trace!(character = %character_id, "player session closed during delivery");
                WhisperOutcome::NotFound
            }
            Err(_) => WhisperOutcome::Timeout,
        }
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("zones", &self.zones.len())
            .field("players", &self.players.len())
            .field("entities", &self.entities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_protocol::EntityKind;

    #[test]
    fn dropping_registration_unregisters() {
        let registry: Registry<u32, &'static str> = Registry::new();
        let guard = registry.register(1, "a").unwrap();
        assert_eq!(registry.lookup(&1), Some("a"));
        assert!(registry.register(1, "b").is_err());
        drop(guard);
        assert_eq!(registry.lookup(&1), None);
        let _again = registry.register(1, "c").unwrap();
        assert_eq!(registry.lookup(&1), Some("c"));
    }

    #[test]
    fn stale_guard_does_not_remove_newer_entry() {
        let registry: Registry<u32, u32> = Registry::new();
        let first = registry.register(7, 1).unwrap();
        // Force the key free without the guard, then re-register.
        registry.entries.remove(&7);
        let _second = registry.register(7, 2).unwrap();
        drop(first);
        assert_eq!(registry.lookup(&7), Some(2));
    }

    #[test]
    fn concurrent_registration_has_one_winner() {
        let registry: Registry<u32, usize> = Registry::new();
        let winners: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let registry = registry.clone();
                    scope.spawn(move || registry.register(99, i).ok())
                })
                .collect();
            handles.into_iter().filter_map(|h| h.join().ok().flatten()).collect()
        });
        assert_eq!(winners.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn delivery_reports_not_found_and_timeout() {
        let directory = Directory::new();
        let packet = ServerPacket::Pong {
            client_time: 0,
            server_time: 0,
        };
        assert_eq!(
            directory
                .deliver_to_player(CharacterId(1), packet.clone(), Duration::from_millis(10))
                .await,
            WhisperOutcome::NotFound
        );

        let (tx, mut rx) = mpsc::channel(1);
        let _reg = directory
            .register_player(PlayerAddress {
                character_id: CharacterId(1),
                name: "Ayla".into(),
                guid: Guid::new(EntityKind::Player, 1),
                outbound: tx,
            })
            .unwrap();
        assert_eq!(
            directory
                .deliver_to_player(CharacterId(1), packet.clone(), Duration::from_millis(10))
                .await,
            WhisperOutcome::Delivered
        );
        // Queue now full and nobody reads it.
        assert_eq!(
            directory
                .deliver_to_player(CharacterId(1), packet.clone(), Duration::from_millis(10))
                .await,
            WhisperOutcome::Timeout
        );
        rx.close();
        while rx.try_recv().is_ok() {}
        assert_eq!(
            directory
                .deliver_to_player(CharacterId(1), packet, Duration::from_millis(10))
                .await,
            WhisperOutcome::NotFound
        );
    }
}
