//! Single-writer state of one zone shard.
//!
//! `ZoneInstance` is plain synchronous code. The zone actor owns exactly one
//! and feeds it messages one at a time, so nothing in here locks. Every
//! mutating operation validates fully before it commits, so a rejected
//! command leaves no trace.

use std::collections::HashMap;
use std::sync::Arc;

use realm_protocol::{Guid, RejectReason, ServerPacket, Vec3};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::command::ZoneCommand;
use crate::config::ZoneConfig;
use crate::content::{ContentLookup, SpawnDefinition};
use crate::creature::{AiAction, AiState, CreatureController, CreatureProfile, TargetView, RANGE_EPSILON};
use crate::directory::{Directory, EntityRegistration};
use crate::entity::Entity;
use crate::error::ZoneError;
use crate::events::{EventSink, GameEvent};
use crate::persistence::CharacterRecord;
use crate::spatial::{GridStats, SpatialGrid};
use crate::types::ZoneKey;
use crate::utils::{player_guid, GuidAllocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ZoneLifecycle {
    /// Spawn definitions are being materialized.
    Loading,
    Active,
    /// No players; the instance stops once the idle timeout elapses.
    IdleDraining { since_ms: u64 },
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStats {
    pub key: ZoneKey,
    pub lifecycle: ZoneLifecycle,
    pub players: usize,
    pub creatures: usize,
    pub entities: usize,
    pub tick_sequence: u64,
    pub grid: GridStats,
    pub dropped_packets: u64,
    pub contained_panics: u64,
    pub restores: u64,
    pub pending_respawns: usize,
}

/// Result of admitting an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneEntry {
    pub zone: ZoneKey,
    pub guid: Guid,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingRespawn {
    spawn_id: u64,
    due_ms: u64,
}

/// Last-known-good copy of non-player state.
#[derive(Debug, Clone)]
struct ZoneCheckpoint {
    tick: u64,
    entities: HashMap<Guid, Entity>,
    controllers: HashMap<Guid, CreatureController>,
    respawns: Vec<PendingRespawn>,
}

/// Full copy of the simulation state taken before a message runs, so a
/// handler that unwinds part way can be undone. Counters and directory
/// registrations are not part of it.
#[derive(Debug, Clone)]
pub struct ZoneSnapshot {
    lifecycle: ZoneLifecycle,
    entities: HashMap<Guid, Entity>,
    grid: SpatialGrid,
    controllers: HashMap<Guid, CreatureController>,
    subscribers: HashMap<Guid, mpsc::Sender<ServerPacket>>,
    respawns: Vec<PendingRespawn>,
    dead_players: HashMap<Guid, u64>,
    player_total: usize,
    tick_sequence: u64,
    last_tick_ms: Option<u64>,
}

pub struct ZoneInstance {
    key: ZoneKey,
    config: Arc<ZoneConfig>,
    content: Arc<dyn ContentLookup>,
    events: Arc<dyn EventSink>,
    directory: Directory,
    guids: GuidAllocator,
    lifecycle: ZoneLifecycle,
    persistent: bool,
    entry_point: Vec3,
    entities: HashMap<Guid, Entity>,
    grid: SpatialGrid,
    controllers: HashMap<Guid, CreatureController>,
    subscribers: HashMap<Guid, mpsc::Sender<ServerPacket>>,
    registrations: HashMap<Guid, EntityRegistration>,
    spawns: HashMap<u64, SpawnDefinition>,
    respawns: Vec<PendingRespawn>,
    dead_players: HashMap<Guid, u64>,
    player_total: usize,
    tick_sequence: u64,
    last_tick_ms: Option<u64>,
    checkpoint: Option<ZoneCheckpoint>,
    dropped_packets: u64,
    contained_panics: u64,
    restores: u64,
}

impl std::fmt::Debug for ZoneInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneInstance")
            .field("key", &self.key)
            .field("lifecycle", &self.lifecycle)
            .field("entities", &self.entities.len())
            .field("tick_sequence", &self.tick_sequence)
            .finish()
    }
}

impl ZoneInstance {
    pub fn new(
        key: ZoneKey,
        config: Arc<ZoneConfig>,
        content: Arc<dyn ContentLookup>,
        events: Arc<dyn EventSink>,
        directory: Directory,
        guids: GuidAllocator,
    ) -> Self {
        let persistent = config.persistent_zones.contains(&key.zone_id);
        let entry_point = content
            .zone(key.zone_id)
            .map(|z| z.entry_point)
            .unwrap_or(Vec3::ZERO);
        let spawns = content
            .spawn_definitions(key.zone_id)
            .iter()
            .map(|s| (s.id, s.clone()))
            .collect();
        Self {
            key,
            grid: SpatialGrid::new(config.cell_size),
            config,
            content,
            events,
            directory,
            guids,
            lifecycle: ZoneLifecycle::Loading,
            persistent,
            entry_point,
            entities: HashMap::new(),
            controllers: HashMap::new(),
            subscribers: HashMap::new(),
            registrations: HashMap::new(),
            spawns,
            respawns: Vec::new(),
            dead_players: HashMap::new(),
            player_total: 0,
            tick_sequence: 0,
            last_tick_ms: None,
            checkpoint: None,
            dropped_packets: 0,
            contained_panics: 0,
            restores: 0,
        }
    }

    /// Materializes every spawn definition and makes the zone active.
    pub fn load(&mut self, now_ms: u64) {
        let mut spawns: Vec<_> = self.spawns.values().cloned().collect();
        spawns.sort_by_key(|s| s.id);
        for spawn in &spawns {
            if let Err(err) = self.spawn_creature(spawn) {
                warn!(zone = %self.key, spawn = spawn.id, "spawn failed: {}", err);
            }
        }
        self.lifecycle = ZoneLifecycle::Active;
        self.last_tick_ms = Some(now_ms);
        self.take_checkpoint();
        self.events.publish(GameEvent::ZoneStarted { zone: self.key });
        info!(
            zone = %self.key,
            creatures = self.controllers.len(),
            persistent = self.persistent,
            "🌍 Zone instance active"
        );
    }

    pub fn key(&self) -> ZoneKey {
        self.key
    }

    pub fn lifecycle(&self) -> ZoneLifecycle {
        self.lifecycle
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn player_count(&self) -> usize {
        self.player_total
    }

    pub fn tick_sequence(&self) -> u64 {
        self.tick_sequence
    }

    pub fn entity(&self, guid: Guid) -> Option<&Entity> {
        self.entities.get(&guid)
    }

    /// Direct mutable access. Position changes made through this reference
    /// bypass the spatial index until [`ZoneInstance::reindex`] is called.
    pub fn entity_mut(&mut self, guid: Guid) -> Option<&mut Entity> {
        self.entities.get_mut(&guid)
    }

    pub fn reindex(&mut self, guid: Guid) {
        if let Some(entity) = self.entities.get(&guid) {
            self.grid.upsert(guid, entity.position);
        }
    }

    pub fn controller(&self, guid: Guid) -> Option<&CreatureController> {
        self.controllers.get(&guid)
    }

    /// Guids of living creatures, ordered.
    pub fn creatures(&self) -> Vec<Guid> {
        let mut guids: Vec<_> = self.controllers.keys().copied().collect();
        guids.sort_unstable();
        guids
    }

    pub fn entry_point(&self) -> Vec3 {
        self.entry_point
    }

    pub fn record_contained_panic(&mut self) {
        self.contained_panics += 1;
    }

    pub fn stats(&self) -> ZoneStats {
        ZoneStats {
            key: self.key,
            lifecycle: self.lifecycle,
            players: self.player_total,
            creatures: self.controllers.len(),
            entities: self.entities.len(),
            tick_sequence: self.tick_sequence,
            grid: self.grid.stats(),
            dropped_packets: self.dropped_packets,
            contained_panics: self.contained_panics,
            restores: self.restores,
            pending_respawns: self.respawns.len(),
        }
    }

    // ------------------------------------------------------------------
    // Entity set
    // ------------------------------------------------------------------

    /// Admits a player built from its persisted record. The saved position
    /// is used only if it belongs to this zone and lies inside the region.
    pub fn admit_player(
        &mut self,
        record: &CharacterRecord,
        outbound: mpsc::Sender<ServerPacket>,
    ) -> Result<ZoneEntry, ZoneError> {
        let position = match record.position {
            Some(p) if record.zone_id == self.key.zone_id && self.config.region.contains(p) => p,
            _ => self.entry_point,
        };
        let mut entity = Entity::player(player_guid(record.character_id), record, self.key, position);
        if entity.health == 0 {
            entity.health = entity.max_health;
        }
        self.add_entity(entity, Some(outbound))
    }

    /// Inserts an entity, optionally subscribing a session to zone
    /// broadcasts. A subscriber first receives the zone entry and a spawn
    /// packet for everything already present.
    pub fn add_entity(
        &mut self,
        mut entity: Entity,
        outbound: Option<mpsc::Sender<ServerPacket>>,
    ) -> Result<ZoneEntry, ZoneError> {
        if self.lifecycle == ZoneLifecycle::Stopped {
            return Err(ZoneError::NotAccepting(self.key));
        }
        let guid = entity.guid;
        let is_player = entity.is_player();
        if is_player && self.player_total >= self.config.max_players_per_instance {
            return Err(ZoneError::Full(self.key));
        }
        if self.entities.contains_key(&guid) {
            return Err(ZoneError::AlreadyPresent(guid));
        }
        let registration = self
            .directory
            .register_entity(guid, self.key)
            .map_err(|_| ZoneError::AlreadyPresent(guid))?;

        entity.zone = self.key;
        if !self.config.region.contains(entity.position) {
            entity.position = self.entry_point;
        }
        let position = entity.position;
        let spawn = entity.spawn_packet();
        let character_id = entity.character_id;

        self.registrations.insert(guid, registration);
        self.grid.upsert(guid, position);
        self.entities.insert(guid, entity);
        if is_player {
            self.player_total += 1;
        }

        if let Some(tx) = outbound {
            let mut snapshot = vec![ServerPacket::EnterZone {
                zone_id: self.key.zone_id,
                instance_id: self.key.instance_id,
                guid,
                position,
            }];
            let mut others: Vec<_> = self.entities.values().filter(|e| e.guid != guid).collect();
            others.sort_by_key(|e| e.guid);
            snapshot.extend(others.into_iter().map(Entity::spawn_packet));
            for packet in snapshot {
                if tx.try_send(packet).is_err() {
                    self.dropped_packets += 1;
                }
            }
            self.subscribers.insert(guid, tx);
        }
        self.broadcast(spawn, Some(guid));

        if let Some(character) = character_id {
            self.events.publish(GameEvent::PlayerEnteredZone {
                character_id: character.0,
                zone: self.key,
            });
        }
        if matches!(self.lifecycle, ZoneLifecycle::IdleDraining { .. }) && self.player_total > 0 {
            self.lifecycle = ZoneLifecycle::Active;
        }
        debug!(zone = %self.key, guid = %guid, "entity added");
        Ok(ZoneEntry {
            zone: self.key,
            guid,
            position,
        })
    }

    /// Removes an entity and everything tied to it. Returns the final state.
    pub fn remove_entity(&mut self, guid: Guid) -> Option<Entity> {
        let entity = self.entities.remove(&guid)?;
        self.grid.remove(guid);
        self.controllers.remove(&guid);
        self.subscribers.remove(&guid);
        self.registrations.remove(&guid);
        self.dead_players.remove(&guid);
        if entity.is_player() {
            self.player_total = self.player_total.saturating_sub(1);
            for controller in self.controllers.values_mut() {
                controller.forget(guid);
            }
        }
        self.broadcast(ServerPacket::EntityDespawned { guid }, None);
        if let Some(character) = entity.character_id {
            self.events.publish(GameEvent::PlayerLeftZone {
                character_id: character.0,
                zone: self.key,
            });
        }
        debug!(zone = %self.key, guid = %guid, "entity removed");
        Some(entity)
    }

    fn spawn_creature(&mut self, spawn: &SpawnDefinition) -> Result<Guid, ZoneError> {
        let template = self
            .content
            .creature_template(spawn.creature_id)
            .ok_or(ZoneError::Rejected(RejectReason::Internal))?
            .clone();
        let guid = self.guids.next(realm_protocol::EntityKind::Creature);
        let entity = Entity::creature(guid, &template, spawn, self.key);
        self.add_entity(entity, None)?;
        self.controllers
            .insert(guid, CreatureController::new(CreatureProfile::from_template(&template)));
        trace!(zone = %self.key, guid = %guid, template = template.id, "creature spawned");
        Ok(guid)
    }

    /// Adds threat from `source` to a creature, engaging it if the
    /// threshold is crossed. Returns true if the creature entered combat.
    pub fn add_threat(&mut self, creature: Guid, source: Guid, amount: f32) -> bool {
        let threshold = self.config.aggro_threshold;
        self.controllers
            .get_mut(&creature)
            .map(|c| c.add_threat(source, amount, threshold))
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Queries and broadcast
    // ------------------------------------------------------------------

    pub fn entities_in_range(&self, position: Vec3, radius: f32) -> Vec<Guid> {
        self.grid.query(position, radius)
    }

    /// Sends `packet` to every subscriber except `exclude`. Never blocks: a
    /// subscriber with a full queue misses the packet.
    pub fn broadcast(&mut self, packet: ServerPacket, exclude: Option<Guid>) {
        for (guid, tx) in &self.subscribers {
            if Some(*guid) == exclude {
                continue;
            }
            if tx.try_send(packet.clone()).is_err() {
                self.dropped_packets += 1;
            }
        }
    }

    pub fn send_to(&mut self, guid: Guid, packet: ServerPacket) {
        if let Some(tx) = self.subscribers.get(&guid) {
            if tx.try_send(packet).is_err() {
                self.dropped_packets += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn apply_command(
        &mut self,
        actor: Guid,
        command: ZoneCommand,
        now_ms: u64,
    ) -> Result<(), ZoneError> {
        use RejectReason as R;

        if self.lifecycle == ZoneLifecycle::Stopped {
            return Err(ZoneError::NotAccepting(self.key));
        }
        let reject = |reason| Err(ZoneError::Rejected(reason));
        let Some(me) = self.entities.get(&actor) else {
            return reject(R::NotInZone);
        };

        match command {
            ZoneCommand::Move { position, rotation } => {
                if !me.is_alive() {
                    return reject(R::ActorDead);
                }
                if !position.is_finite() || !rotation.is_finite() || !self.config.region.contains(position) {
                    return reject(R::OutOfBounds);
                }
                if me.position.distance(position) > self.config.max_move_distance {
                    return reject(R::MoveTooFar);
                }
                let packet = {
                    let Some(me) = self.entities.get_mut(&actor) else {
                        return reject(R::NotInZone);
                    };
                    me.position = position;
                    me.rotation = rotation;
                    me.moved_packet()
                };
                self.grid.upsert(actor, position);
                self.broadcast(packet, Some(actor));
                Ok(())
            }
            ZoneCommand::Attack { target } => {
                if !me.is_alive() {
                    return reject(R::ActorDead);
                }
                if target == actor {
                    return reject(R::InvalidTarget);
                }
                let Some(victim) = self.entities.get(&target) else {
                    return reject(R::UnknownTarget);
                };
                if !self.controllers.contains_key(&target) {
                    return reject(R::InvalidTarget);
                }
                if !victim.is_alive() {
                    return reject(R::TargetDead);
                }
                if me.position.distance(victim.position) > me.attack_range + RANGE_EPSILON {
                    return reject(R::TargetOutOfRange);
                }
                if let Some(last) = me.last_attack_ms {
                    if now_ms.saturating_sub(last) < self.config.player_attack_cooldown_ms {
                        return reject(R::CooldownActive);
                    }
                }
                let damage = me.attack_power;
                if let Some(me) = self.entities.get_mut(&actor) {
                    me.last_attack_ms = Some(now_ms);
                }
                self.deal_damage(actor, target, damage, now_ms);
                Ok(())
            }
            ZoneCommand::Say { message } => {
                let text = message.trim();
                if text.is_empty() {
                    return reject(R::InvalidMessage);
                }
                let packet = ServerPacket::ChatMessage {
                    speaker: actor,
                    speaker_name: me.name.clone(),
                    message: text.to_string(),
                };
                let listeners: Vec<_> = self
                    .grid
                    .query(me.position, self.config.chat_radius)
                    .into_iter()
                    .filter(|g| g.is_player())
                    .collect();
                for listener in listeners {
                    self.send_to(listener, packet.clone());
                }
                Ok(())
            }
        }
    }

    /// Applies damage and everything that follows from it: kill tagging,
    /// threat, broadcasts and death.
    fn deal_damage(&mut self, attacker: Guid, target: Guid, amount: u32, now_ms: u64) {
        let Some(victim) = self.entities.get_mut(&target) else {
            return;
        };
        let dealt = victim.take_damage(amount);
        if attacker.is_player() && !victim.is_player() && victim.tagged_by.is_none() {
            victim.tagged_by = Some(attacker);
        }
        let health = victim.health_packet();
        let died = !victim.is_alive();

        self.broadcast(
            ServerPacket::AttackPerformed {
                attacker,
                target,
                damage: dealt,
            },
            None,
        );
        self.broadcast(health, None);

        if died {
            self.handle_death(target, attacker, now_ms);
        } else if let Some(controller) = self.controllers.get_mut(&target) {
            controller.on_damaged(attacker, dealt);
        }
    }

    fn handle_death(&mut self, guid: Guid, killer: Guid, now_ms: u64) {
        let Some(entity) = self.entities.get(&guid) else {
            return;
        };
        if let Some(controller) = self.controllers.get_mut(&guid) {
            let credited = entity.tagged_by.unwrap_or(killer);
            let template_id = entity.template_id;
            controller.on_death(now_ms);
            let killer_character = self
                .entities
                .get(&credited)
                .and_then(|e| e.character_id)
                .map(|c| c.0);
            self.broadcast(
                ServerPacket::EntityDied {
                    guid,
                    killer: credited,
                },
                None,
            );
            self.events.publish(GameEvent::CreatureKilled {
                creature: guid,
                template_id,
                killer_character,
                zone: self.key,
            });
            debug!(zone = %self.key, creature = %guid, killer = %credited, "creature killed");
        } else if let Some(character) = entity.character_id {
            self.dead_players.insert(guid, now_ms);
            for controller in self.controllers.values_mut() {
                controller.forget(guid);
            }
            self.broadcast(ServerPacket::EntityDied { guid, killer }, None);
            self.events.publish(GameEvent::PlayerDied {
                character_id: character.0,
                killer,
                zone: self.key,
            });
            debug!(zone = %self.key, player = %guid, killer = %killer, "player died");
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advances the simulation to `now_ms`.
    pub fn tick(&mut self, now_ms: u64) {
        if self.lifecycle == ZoneLifecycle::Stopped {
            return;
        }
        self.tick_sequence += 1;
        let dt_ms = self
            .last_tick_ms
            .map(|last| now_ms.saturating_sub(last))
            .unwrap_or(0);
        self.last_tick_ms = Some(now_ms);
        let dt = dt_ms as f32 / 1000.0;

        self.reap_detached_players();
        self.revive_players(now_ms);
        self.run_creatures(now_ms, dt);
        self.process_respawns(now_ms);
        self.update_lifecycle(now_ms);

        let interval = self.config.checkpoint_interval_ticks;
        if interval > 0 && self.tick_sequence % interval == 0 {
            self.take_checkpoint();
        }
    }

    fn run_creatures(&mut self, now_ms: u64, dt: f32) {
        let corpse_ms = self.config.corpse_duration_ms;
        let decay = self.config.threat_decay_per_sec * dt;
        let proximity = self.config.proximity_threat_per_sec * dt;
        let threshold = self.config.aggro_threshold;
        let mut despawn = Vec::new();

        for guid in self.creatures() {
            let Some(position) = self.entities.get(&guid).map(|e| e.position) else {
                continue;
            };
            let Some(controller) = self.controllers.get_mut(&guid) else {
                continue;
            };
            if controller.is_dead() {
                if controller
                    .died_at_ms
                    .is_some_and(|died| now_ms.saturating_sub(died) >= corpse_ms)
                {
                    despawn.push(guid);
                }
                continue;
            }

            controller.decay_threat(decay);
            let radius = controller.profile.aggro_radius;
            if radius > 0.0 && proximity > 0.0 {
                for other in self.grid.query(position, radius) {
                    let alive_player = other.is_player()
                        && self.entities.get(&other).is_some_and(Entity::is_alive);
                    if alive_player {
                        controller.add_threat(other, proximity, threshold);
                    }
                }
            }

            let entities = &self.entities;
            let actions = controller.step(position, now_ms, |g| {
                entities.get(&g).map(|e| TargetView {
                    position: e.position,
                    alive: e.is_alive(),
                })
            });
            self.apply_ai_actions(guid, actions, now_ms);
        }

        for guid in despawn {
            self.despawn_creature(guid, now_ms);
        }
    }

    fn apply_ai_actions(&mut self, guid: Guid, actions: Vec<AiAction>, now_ms: u64) {
        for action in actions {
            match action {
                AiAction::Moved { position, arrived } => {
                    let Some(entity) = self.entities.get_mut(&guid) else {
                        continue;
                    };
                    entity.position = position;
                    let packet = entity.moved_packet();
                    self.grid.upsert(guid, position);
                    if arrived {
                        self.broadcast(packet, None);
                    }
                }
                AiAction::ChaseStarted { path } => {
                    if let (Some(entity), Some(heading)) = (self.entities.get_mut(&guid), path.heading()) {
                        entity.rotation = heading;
                    }
                    self.broadcast(
                        ServerPacket::ChaseStarted {
                            guid,
                            waypoints: path.waypoints().to_vec(),
                            duration_ms: path.duration_ms().min(u32::MAX as u64) as u32,
                        },
                        None,
                    );
                }
                AiAction::Attack { target, damage } => {
                    if let Some(entity) = self.entities.get_mut(&guid) {
                        entity.last_attack_ms = Some(now_ms);
                    }
                    self.deal_damage(guid, target, damage, now_ms);
                }
                AiAction::TargetLost { target } => {
                    trace!(zone = %self.key, creature = %guid, target = %target, "target lost");
                }
            }
        }
    }

    fn despawn_creature(&mut self, guid: Guid, now_ms: u64) {
        let Some(entity) = self.remove_entity(guid) else {
            return;
        };
        if let Some(spawn_id) = entity.spawn_id {
            let delay = self
                .spawns
                .get(&spawn_id)
                .map(|s| s.respawn_time_ms)
                .unwrap_or(0);
            self.respawns.push(PendingRespawn {
                spawn_id,
                due_ms: now_ms.saturating_add(delay),
            });
        }
    }

    fn process_respawns(&mut self, now_ms: u64) {
        if self.respawns.is_empty() {
            return;
        }
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.respawns)
            .into_iter()
            .partition(|r| r.due_ms <= now_ms);
        self.respawns = pending;
        for respawn in due {
            let Some(spawn) = self.spawns.get(&respawn.spawn_id).cloned() else {
                continue;
            };
            match self.spawn_creature(&spawn) {
                Ok(guid) => debug!(zone = %self.key, spawn = spawn.id, guid = %guid, "respawned"),
                Err(err) => warn!(zone = %self.key, spawn = spawn.id, "respawn failed: {}", err),
            }
        }
    }

    /// Players whose session dropped its outbound queue without leaving,
    /// such as an admission abandoned after this zone accepted it.
    fn reap_detached_players(&mut self) {
        let detached: Vec<Guid> = self
            .subscribers
            .iter()
            .filter(|(_, outbound)| outbound.is_closed())
            .map(|(guid, _)| *guid)
            .collect();
        for guid in detached {
            warn!(zone = %self.key, guid = %guid, "removing player whose session is gone");
            self.remove_entity(guid);
        }
    }

    fn revive_players(&mut self, now_ms: u64) {
        let revive_ms = self.config.player_revive_ms;
        let due: Vec<Guid> = self
            .dead_players
            .iter()
            .filter(|(_, died)| now_ms.saturating_sub(**died) >= revive_ms)
            .map(|(guid, _)| *guid)
            .collect();
        for guid in due {
            self.dead_players.remove(&guid);
            let entry = self.entry_point;
            let Some(entity) = self.entities.get_mut(&guid) else {
                continue;
            };
            entity.health = entity.max_health;
            entity.position = entry;
            let moved = entity.moved_packet();
            let health = entity.health_packet();
            self.grid.upsert(guid, entry);
            self.broadcast(moved, None);
            self.broadcast(health, None);
        }
    }

    fn update_lifecycle(&mut self, now_ms: u64) {
        match self.lifecycle {
            ZoneLifecycle::Active if self.player_total == 0 && !self.persistent => {
                self.lifecycle = ZoneLifecycle::IdleDraining { since_ms: now_ms };
                debug!(zone = %self.key, "zone idle, draining");
            }
            ZoneLifecycle::IdleDraining { .. } if self.player_total > 0 => {
                self.lifecycle = ZoneLifecycle::Active;
            }
            ZoneLifecycle::IdleDraining { since_ms }
                if now_ms.saturating_sub(since_ms) >= self.config.idle_timeout_ms =>
            {
                info!(zone = %self.key, "zone idle timeout reached");
                self.stop();
            }
            _ => {}
        }
    }

    /// Terminal. Releases every directory registration.
    pub fn stop(&mut self) {
        if self.lifecycle == ZoneLifecycle::Stopped {
            return;
        }
        self.lifecycle = ZoneLifecycle::Stopped;
        self.registrations.clear();
        self.subscribers.clear();
        self.events.publish(GameEvent::ZoneStopped { zone: self.key });
    }

    // ------------------------------------------------------------------
    // Checkpoint and restore
    // ------------------------------------------------------------------

    pub fn take_checkpoint(&mut self) {
        let entities = self
            .entities
            .iter()
            .filter(|(_, e)| !e.is_player())
            .map(|(g, e)| (*g, e.clone()))
            .collect();
        self.checkpoint = Some(ZoneCheckpoint {
            tick: self.tick_sequence,
            entities,
            controllers: self.controllers.clone(),
            respawns: self.respawns.clone(),
        });
    }

    pub fn checkpoint_tick(&self) -> Option<u64> {
        self.checkpoint.as_ref().map(|c| c.tick)
    }

    /// Cross-checks the entity map, spatial index, controllers and
    /// subscriptions.
    pub fn verify_consistency(&self) -> Result<(), String> {
        self.grid.check_invariants()?;
        if self.grid.len() != self.entities.len() {
            return Err(format!(
                "grid holds {} guids, entity map {}",
                self.grid.len(),
                self.entities.len()
            ));
        }
        let mut players = 0;
        for (guid, entity) in &self.entities {
            if entity.guid != *guid || entity.zone != self.key {
                return Err(format!("{guid} has mismatched identity"));
            }
            if self.grid.position(*guid) != Some(entity.position) {
                return Err(format!("{guid} indexed at a stale position"));
            }
            if !entity.position.is_finite() || entity.health > entity.max_health {
                return Err(format!("{guid} has invalid state"));
            }
            if entity.is_player() {
                players += 1;
            } else if entity.guid.is_creature() && !self.controllers.contains_key(guid) {
                return Err(format!("creature {guid} has no controller"));
            }
        }
        if players != self.player_total {
            return Err(format!("player count {} but {} present", self.player_total, players));
        }
        if let Some(orphan) = self.controllers.keys().find(|g| !self.entities.contains_key(g)) {
            return Err(format!("controller for absent {orphan}"));
        }
        if let Some(orphan) = self.subscribers.keys().find(|g| !self.entities.contains_key(g)) {
            return Err(format!("subscriber for absent {orphan}"));
        }
        Ok(())
    }

    /// Rebuilds non-player state from the last checkpoint. Players are
    /// kept as they are now, since their sessions are still attached.
    pub fn restore_last_checkpoint(&mut self) {
        let entry = self.entry_point;
        let mut players: Vec<Entity> = self
            .entities
            .values()
            .filter(|e| e.is_player())
            .cloned()
            .collect();
        for player in &mut players {
            player.zone = self.key;
            player.health = player.health.min(player.max_health);
            if !player.position.is_finite() || !self.config.region.contains(player.position) {
                player.position = entry;
            }
        }

        match self.checkpoint.clone() {
            Some(checkpoint) => {
                self.entities = checkpoint.entities;
                self.controllers = checkpoint.controllers;
                self.respawns = checkpoint.respawns;
            }
            None => {
                self.entities.retain(|_, e| !e.is_player());
                let entities = &self.entities;
                self.controllers.retain(|g, _| entities.contains_key(g));
            }
        }
        self.player_total = players.len();
        for player in players {
            self.entities.insert(player.guid, player);
        }

        self.grid.clear();
        for (guid, entity) in &self.entities {
            self.grid.upsert(*guid, entity.position);
        }
        let entities = &self.entities;
        self.subscribers.retain(|g, _| entities.contains_key(g));
        self.dead_players.retain(|g, _| entities.contains_key(g));
        self.reconcile_registrations();
        self.resync_subscribers();
        warn!(
            zone = %self.key,
            checkpoint_tick = ?self.checkpoint_tick(),
            "♻️ Zone state restored from last-known-good checkpoint"
        );
    }

    pub fn snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            lifecycle: self.lifecycle,
            entities: self.entities.clone(),
            grid: self.grid.clone(),
            controllers: self.controllers.clone(),
            subscribers: self.subscribers.clone(),
            respawns: self.respawns.clone(),
            dead_players: self.dead_players.clone(),
            player_total: self.player_total,
            tick_sequence: self.tick_sequence,
            last_tick_ms: self.last_tick_ms,
        }
    }

    /// Puts the instance back exactly as it was when `snapshot` was taken.
    /// Packets and events already sent by the undone work cannot be
    /// recalled, so every subscriber gets a fresh view afterwards.
    pub fn rollback(&mut self, snapshot: ZoneSnapshot) {
        self.lifecycle = snapshot.lifecycle;
        self.entities = snapshot.entities;
        self.grid = snapshot.grid;
        self.controllers = snapshot.controllers;
        self.subscribers = snapshot.subscribers;
        self.respawns = snapshot.respawns;
        self.dead_players = snapshot.dead_players;
        self.player_total = snapshot.player_total;
        self.tick_sequence = snapshot.tick_sequence;
        self.last_tick_ms = snapshot.last_tick_ms;
        self.reconcile_registrations();
        self.resync_subscribers();
        warn!(
            zone = %self.key,
            tick = self.tick_sequence,
            "⏪ Zone state rolled back to before the failed message"
        );
    }

    /// Drops directory entries for guids no longer present and registers
    /// any that lost theirs.
    fn reconcile_registrations(&mut self) {
        let entities = &self.entities;
        self.registrations.retain(|g, _| entities.contains_key(g));
        let missing: Vec<Guid> = self
            .entities
            .keys()
            .filter(|g| !self.registrations.contains_key(g))
            .copied()
            .collect();
        for guid in missing {
            match self.directory.register_entity(guid, self.key) {
                Ok(registration) => {
                    self.registrations.insert(guid, registration);
                }
                Err(err) => warn!(zone = %self.key, guid = %guid, "re-registration failed: {}", err),
            }
        }
    }

    fn resync_subscribers(&mut self) {
        self.restores += 1;
        let mut spawns: Vec<_> = self.entities.values().map(Entity::spawn_packet).collect();
        spawns.sort_by_key(|p| match p {
            ServerPacket::EntitySpawned { guid, .. } => *guid,
            _ => Guid::NONE,
        });
        for packet in spawns {
            self.broadcast(packet, None);
        }
    }

    /// Current AI state of every creature, for diagnostics.
    pub fn ai_states(&self) -> Vec<(Guid, AiState)> {
        let mut states: Vec<_> = self
            .controllers
            .iter()
            .map(|(g, c)| (*g, c.state()))
            .collect();
        states.sort_unstable_by_key(|(g, _)| *g);
        states
    }
}
