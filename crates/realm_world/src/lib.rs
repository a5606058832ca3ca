//! # Realm world simulation
//!
//! The authoritative side of the Realm zone server. Each active zone shard
//! is a [`zone::ZoneInstance`] owned by a single actor task; the
//! [`directory::Directory`] maps ids to actor addresses, the
//! [`scheduler::TickScheduler`] drives simulation time, and the
//! [`supervisor::ZoneSupervisor`] creates and restarts instances.
//!
//! Nothing in this crate touches sockets. Connection sessions live in
//! `realm_server` and talk to zones only through [`zone::ZoneHandle`].

pub mod config;
pub mod content;
pub mod creature;
pub mod directory;
pub mod entity;
pub mod error;
pub mod events;
pub mod persistence;
pub mod scheduler;
pub mod shutdown;
pub mod spatial;
pub mod supervisor;
pub mod types;
pub mod utils;
pub mod zone;

pub use config::ZoneConfig;
pub use content::{ContentLookup, CreatureTemplate, SpawnDefinition, StaticContent, ZoneDefinition};
pub use directory::{Directory, PlayerAddress, PlayerRegistration};
pub use entity::Entity;
pub use error::{ContentError, StoreError, ZoneError};
pub use events::{ChannelEventSink, EventEnvelope, EventSink, GameEvent, NullEventSink};
pub use persistence::{CharacterDefaults, CharacterRecord, CharacterStore, InMemoryCharacterStore};
pub use scheduler::{TickScheduler, TickSnapshot, TickStats};
pub use shutdown::ShutdownState;
pub use spatial::SpatialGrid;
pub use supervisor::{SupervisorHandle, WorldContext, ZoneSupervisor};
pub use types::{AccountId, CharacterId, InstanceId, RegionBounds, ZoneId, ZoneKey};
pub use utils::{current_timestamp_ms, player_guid, GuidAllocator};
pub use zone::{ZoneCommand, ZoneEntry, ZoneExit, ZoneHandle, ZoneInstance, ZoneLifecycle, ZoneStats};
