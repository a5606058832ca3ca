//! Character persistence collaborator.
//!
//! Loaded once when a session enters the world and saved once when it
//! leaves. Nothing on the tick path touches the store.

use async_trait::async_trait;
use dashmap::DashMap;
use realm_protocol::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::types::{CharacterId, ZoneId};

/// Saved state of one character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub character_id: u64,
    pub account_id: u64,
    pub name: String,
    pub zone_id: ZoneId,
    /// `None` places the character at the zone entry point.
    pub position: Option<Vec3>,
    pub rotation: f32,
    pub health: u32,
    pub max_health: u32,
    pub attack_power: u32,
    pub attack_range: f32,
    #[serde(default)]
    pub account_suspended: bool,
}

#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn load_character_state(
        &self,
        account_id: u64,
        character_id: CharacterId,
    ) -> Result<CharacterRecord, StoreError>;

    async fn save_character_state(&self, record: &CharacterRecord) -> Result<(), StoreError>;
}

/// Template for characters created on first login by
/// [`InMemoryCharacterStore::with_auto_create`].
#[derive(Debug, Clone)]
pub struct CharacterDefaults {
    pub zone_id: ZoneId,
    pub max_health: u32,
    pub attack_power: u32,
    pub attack_range: f32,
}

impl Default for CharacterDefaults {
    fn default() -> Self {
        Self {
            zone_id: 1,
            max_health: 100,
            attack_power: 10,
            attack_range: 5.0,
        }
    }
}

/// Process-local store, used by tests, the bot and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryCharacterStore {
    records: DashMap<u64, CharacterRecord>,
    auto_create: Option<CharacterDefaults>,
}

impl InMemoryCharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown characters are created from `defaults` on first load.
    pub fn with_auto_create(defaults: CharacterDefaults) -> Self {
        Self {
            records: DashMap::new(),
            auto_create: Some(defaults),
        }
    }

    pub fn insert(&self, record: CharacterRecord) {
        self.records.insert(record.character_id, record);
    }

    pub fn get(&self, character_id: u64) -> Option<CharacterRecord> {
        self.records.get(&character_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CharacterStore for InMemoryCharacterStore {
    async fn load_character_state(
        &self,
        account_id: u64,
        character_id: CharacterId,
    ) -> Result<CharacterRecord, StoreError> {
        if let Some(record) = self.records.get(&character_id.0) {
            if record.account_id != account_id {
                return Err(StoreError::AccountMismatch {
                    character: character_id,
                    account: account_id,
                });
            }
            return Ok(record.value().clone());
        }
        let Some(defaults) = &self.auto_create else {
            return Err(StoreError::NotFound(character_id));
        };
        let record = CharacterRecord {
            character_id: character_id.0,
            account_id,
            name: format!("Adventurer{}", character_id.0),
            zone_id: defaults.zone_id,
            position: None,
            rotation: 0.0,
            health: defaults.max_health,
            max_health: defaults.max_health,
            attack_power: defaults.attack_power,
            attack_range: defaults.attack_range,
            account_suspended: false,
        };
        debug!(character = %character_id, "creating character on first load");
        self.records
            .entry(character_id.0)
            .or_insert_with(|| record.clone());
        Ok(record)
    }

    async fn save_character_state(&self, record: &CharacterRecord) -> Result<(), StoreError> {
        self.records.insert(record.character_id, record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_character_without_auto_create_is_not_found() {
        let store = InMemoryCharacterStore::new();
        assert_eq!(
            store.load_character_state(1, CharacterId(2)).await,
            Err(StoreError::NotFound(CharacterId(2)))
        );
    }

    #[tokio::test]
    async fn auto_created_character_round_trips() {
        let store = InMemoryCharacterStore::with_auto_create(CharacterDefaults::default());
        let mut record = store.load_character_state(1, CharacterId(2)).await.unwrap();
        assert_eq!(record.account_id, 1);
        record.position = Some(Vec3::new(3.0, 0.0, 4.0));
        store.save_character_state(&record).await.unwrap();
        assert_eq!(store.get(2).unwrap().position, Some(Vec3::new(3.0, 0.0, 4.0)));
    }

    #[tokio::test]
    async fn character_of_another_account_is_refused() {
        let store = InMemoryCharacterStore::with_auto_create(CharacterDefaults::default());
        store.load_character_state(1, CharacterId(2)).await.unwrap();
        assert!(matches!(
            store.load_character_state(9, CharacterId(2)).await,
            Err(StoreError::AccountMismatch { .. })
        ));
    }
}
