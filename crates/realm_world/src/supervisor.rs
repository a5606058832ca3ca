//! Zone supervisor: creates zone instances on demand and watches them.
//!
//! The supervisor is itself an actor. Sessions ask it for an instance of a
//! zone; it answers with an existing instance that has room or starts a new
//! one. When a zone task ends it decides whether to start it again.
//!
//! The supervisor never awaits a zone. Restarts halt the old actor and are
//! completed when its task is reported finished, so a wedged zone cannot
//! hold up requests for any other zone.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ZoneConfig;
use crate::content::ContentLookup;
use crate::directory::Directory;
use crate::error::ZoneError;
use crate::events::EventSink;
use crate::types::{InstanceId, ZoneId, ZoneKey};
use crate::utils::{current_timestamp_ms, GuidAllocator};
use crate::zone::{ZoneActor, ZoneExit, ZoneHandle, ZoneInstance};

/// Everything a zone instance needs from the outside world.
#[derive(Clone)]
pub struct WorldContext {
    pub config: Arc<ZoneConfig>,
    pub content: Arc<dyn ContentLookup>,
    pub events: Arc<dyn EventSink>,
    pub directory: Directory,
    pub guids: GuidAllocator,
}

impl WorldContext {
    pub fn new(
        config: ZoneConfig,
        content: Arc<dyn ContentLookup>,
        events: Arc<dyn EventSink>,
        directory: Directory,
    ) -> Self {
        Self {
            config: Arc::new(config),
            content,
            events,
            directory,
            guids: GuidAllocator::new(),
        }
    }
}

impl std::fmt::Debug for WorldContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldContext")
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

type RestartReply = oneshot::Sender<Result<ZoneHandle, ZoneError>>;

#[derive(Debug)]
enum SupervisorMessage {
    EnsureInstance {
        zone_id: ZoneId,
        reply: oneshot::Sender<Result<ZoneHandle, ZoneError>>,
    },
    Restart {
        key: ZoneKey,
        reply: RestartReply,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Clone, Debug)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorMessage>,
}

impl SupervisorHandle {
    /// An instance of `zone_id` with room for one more player.
    pub async fn ensure_instance(&self, zone_id: ZoneId) -> Result<ZoneHandle, ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::EnsureInstance { zone_id, reply })
            .await
            .map_err(|_| ZoneError::SupervisorUnavailable)?;
        rx.await.map_err(|_| ZoneError::SupervisorUnavailable)?
    }

    /// Stops the instance if it is running and starts it again from its
    /// spawn definitions.
    pub async fn restart(&self, key: ZoneKey) -> Result<ZoneHandle, ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(SupervisorMessage::Restart { key, reply })
            .await
            .map_err(|_| ZoneError::SupervisorUnavailable)?;
        rx.await.map_err(|_| ZoneError::SupervisorUnavailable)?
    }

    /// Stops every zone and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self
            .sender
            .send(SupervisorMessage::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

pub struct ZoneSupervisor {
    world: WorldContext,
    inbox: mpsc::Receiver<SupervisorMessage>,
    tasks: JoinSet<(ZoneKey, ZoneExit)>,
    restarts: HashMap<ZoneKey, u32>,
    /// Restart requests waiting for the old task to finish.
    pending_restarts: HashMap<ZoneKey, Vec<RestartReply>>,
}

impl ZoneSupervisor {
    pub fn new(world: WorldContext) -> (Self, SupervisorHandle) {
        let (sender, inbox) = mpsc::channel(256);
        let supervisor = Self {
            world,
            inbox,
            tasks: JoinSet::new(),
            restarts: HashMap::new(),
            pending_restarts: HashMap::new(),
        };
        (supervisor, SupervisorHandle { sender })
    }

    pub fn spawn(world: WorldContext) -> (SupervisorHandle, JoinHandle<()>) {
        let (supervisor, handle) = Self::new(world);
        (handle, tokio::spawn(supervisor.run()))
    }

    pub async fn run(mut self) {
        let persistent = self.world.config.persistent_zones.clone();
        for zone_id in persistent {
            if self.world.content.zone(zone_id).is_none() {
                warn!(zone = zone_id, "persistent zone has no definition, skipping");
                continue;
            }
            if let Err(err) = self.start_instance(ZoneKey::new(zone_id, 1)) {
                error!(zone = zone_id, "failed to start persistent zone: {}", err);
            }
        }
        info!(zones = self.tasks.len(), "🗺️ Zone supervisor running");

        loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(SupervisorMessage::EnsureInstance { zone_id, reply }) => {
                        let _ = reply.send(self.ensure_instance(zone_id));
                    }
                    Some(SupervisorMessage::Restart { key, reply }) => {
                        self.restart(key, reply);
                    }
                    Some(SupervisorMessage::Shutdown { reply }) => {
                        self.stop_all().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.stop_all().await;
                        break;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.on_zone_exit(joined);
                }
            }
        }
        info!("✅ Zone supervisor stopped");
    }

    fn ensure_instance(&mut self, zone_id: ZoneId) -> Result<ZoneHandle, ZoneError> {
        if self.world.content.zone(zone_id).is_none() {
            return Err(ZoneError::UnknownZone(zone_id));
        }
        let cap = self.world.config.max_players_per_instance;
        let instances = self.world.directory.zone_instances(zone_id);
        if let Some(open) = instances
            .iter()
            .find(|h| {
                !h.is_closed()
                    && h.occupancy() < cap
                    && !self.pending_restarts.contains_key(&h.key())
            })
        {
            return Ok(open.clone());
        }
        let instance_id = (1..=InstanceId::MAX)
            .find(|id| !instances.iter().any(|h| h.key().instance_id == *id))
            .ok_or(ZoneError::UnknownZone(zone_id))?;
        if !instances.is_empty() {
            info!(zone = zone_id, instance = instance_id, "Opening overflow instance");
        }
        self.start_instance(ZoneKey::new(zone_id, instance_id))
    }

    fn start_instance(&mut self, key: ZoneKey) -> Result<ZoneHandle, ZoneError> {
        let world = &self.world;
        let mut zone = ZoneInstance::new(
            key,
            Arc::clone(&world.config),
            Arc::clone(&world.content),
            Arc::clone(&world.events),
            world.directory.clone(),
            world.guids.clone(),
        );
        zone.load(current_timestamp_ms());
        let (mut actor, handle) = ZoneActor::new(
            zone,
            world.config.inbox_depth,
            world.config.max_contained_panics,
        );
        let registration = world
            .directory
            .register_zone(handle.clone())
            .map_err(|_| ZoneError::Unavailable(key))?;
        actor.attach_registration(registration);

        self.tasks.spawn(async move {
            let exit = AssertUnwindSafe(actor.run())
                .catch_unwind()
                .await
                .unwrap_or(ZoneExit::Panicked);
            (key, exit)
        });
        debug!(zone = %key, "zone task spawned");
        Ok(handle)
    }

    /// Halts the running instance, if any, and answers `reply` once the
    /// replacement is up.
    fn restart(&mut self, key: ZoneKey, reply: RestartReply) {
        if self.world.content.zone(key.zone_id).is_none() {
            let _ = reply.send(Err(ZoneError::UnknownZone(key.zone_id)));
            return;
        }
        match self.world.directory.zone(key) {
            Some(running) => {
                info!(zone = %key, "🔄 Halting zone instance for restart");
                running.halt();
                self.pending_restarts.entry(key).or_default().push(reply);
            }
            None => {
                info!(zone = %key, "🔄 Restarting zone instance");
                let _ = reply.send(self.start_instance(key));
            }
        }
    }

    fn on_zone_exit(&mut self, joined: Result<(ZoneKey, ZoneExit), JoinError>) {
        let Some((key, exit)) = self.log_exit(joined) else {
            return;
        };
        if let Some(replies) = self.pending_restarts.remove(&key) {
            info!(zone = %key, "🔄 Restarting zone instance");
            let result = self.start_instance(key);
            for reply in replies {
                let _ = reply.send(result.clone());
            }
            return;
        }
        if !exit.should_restart() {
            return;
        }
        if self.world.directory.zone(key).is_some() {
            debug!(zone = %key, "instance already replaced");
            return;
        }
        let attempts = self.restarts.entry(key).or_insert(0);
        *attempts += 1;
        if *attempts > self.world.config.max_restarts {
            error!(zone = %key, attempts = *attempts - 1, "Zone keeps failing, not restarting");
            return;
        }
        warn!(zone = %key, attempt = *attempts, "Restarting failed zone");
        if let Err(err) = self.start_instance(key) {
            error!(zone = %key, "zone restart failed: {}", err);
        }
    }

    fn log_exit(
        &self,
        joined: Result<(ZoneKey, ZoneExit), JoinError>,
    ) -> Option<(ZoneKey, ZoneExit)> {
        match joined {
            Ok((key, exit)) => {
                match exit {
                    ZoneExit::Stopped | ZoneExit::Shutdown => info!(zone = %key, ?exit, "Zone task ended"),
                    ZoneExit::Poisoned | ZoneExit::Panicked => error!(zone = %key, ?exit, "Zone task failed"),
                }
                Some((key, exit))
            }
            Err(err) => {
                error!("zone task could not be joined: {}", err);
                None
            }
        }
    }

    async fn stop_all(&mut self) {
        let zones = self.world.directory.all_zones();
        info!(zones = zones.len(), "Stopping all zones");
        for zone in zones {
            zone.request_stop();
        }
        while let Some(joined) = self.tasks.join_next().await {
            self.log_exit(joined);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::StaticContent;
    use crate::events::NullEventSink;
    use crate::persistence::CharacterRecord;
    use realm_protocol::Vec3;
    use std::time::Duration;

    fn world(config: ZoneConfig) -> WorldContext {
        WorldContext::new(
            config,
            Arc::new(StaticContent::starter()),
            Arc::new(NullEventSink),
            Directory::new(),
        )
    }

    fn record(id: u64) -> CharacterRecord {
        CharacterRecord {
            character_id: id,
            account_id: id,
            name: format!("Player{id}"),
            zone_id: 1,
            position: None,
            rotation: 0.0,
            health: 100,
            max_health: 100,
            attack_power: 10,
            attack_range: 5.0,
            account_suspended: false,
        }
    }

    #[tokio::test]
    async fn persistent_zones_start_eagerly() {
        let world = world(ZoneConfig {
            persistent_zones: vec![2],
            ..ZoneConfig::default()
        });
        let directory = world.directory.clone();
        let (handle, task) = ZoneSupervisor::spawn(world);
        // Ensure round-trips through the supervisor, so startup has happened.
        let zone = handle.ensure_instance(2).await.unwrap();
        assert_eq!(zone.key(), ZoneKey::new(2, 1));
        assert_eq!(directory.zone_count(), 1);
        handle.shutdown().await;
        task.await.unwrap();
        assert_eq!(directory.zone_count(), 0);
    }

    #[tokio::test]
    async fn unknown_zone_is_refused() {
        let (handle, _task) = ZoneSupervisor::spawn(world(ZoneConfig::default()));
        assert_eq!(
            handle.ensure_instance(42).await.unwrap_err(),
            ZoneError::UnknownZone(42)
        );
    }

    #[tokio::test]
    async fn full_instance_overflows_into_a_new_one() {
        let world = world(ZoneConfig {
            max_players_per_instance: 1,
            ..ZoneConfig::default()
        });
        let (handle, _task) = ZoneSupervisor::spawn(world);

        let first = handle.ensure_instance(1).await.unwrap();
        let (tx, _rx) = mpsc::channel(64);
        first.add_player(record(1), tx).await.unwrap();
        assert_eq!(first.occupancy(), 1);

        let second = handle.ensure_instance(1).await.unwrap();
        assert_eq!(second.key(), ZoneKey::new(1, 2));
        let (tx, _rx2) = mpsc::channel(64);
        let entry = second.add_player(record(2), tx).await.unwrap();
        assert_eq!(entry.position, Vec3::ZERO);

        // The first instance has room again once its player leaves.
        first
            .remove_player(crate::utils::player_guid(1))
            .await
            .unwrap();
        assert_eq!(handle.ensure_instance(1).await.unwrap().key(), ZoneKey::new(1, 1));
    }

    #[tokio::test]
    async fn poisoned_zone_is_restarted() {
        let world = world(ZoneConfig {
            max_contained_panics: 1,
            persistent_zones: vec![1],
            ..ZoneConfig::default()
        });
        let directory = world.directory.clone();
        let (handle, _task) = ZoneSupervisor::spawn(world);
        let zone = handle.ensure_instance(1).await.unwrap();

        let _ = zone.inspect::<(), _>(|_| panic!("fatal")).await;

        let restarted = wait_for_fresh(&directory, ZoneKey::new(1, 1))
            .await
            .expect("zone was not restarted");
        assert!(zone.is_closed());
        assert_eq!(restarted.stats().await.unwrap().contained_panics, 0);
    }

    /// Blocks the zone inside a handler until the returned sender fires or
    /// is dropped, then fills its inbox.
    async fn wedge(zone: &ZoneHandle) -> std::sync::mpsc::Sender<()> {
        let (release, gate) = std::sync::mpsc::channel::<()>();
        // Polled rather than awaited: a wake issued from the blocked worker
        // could park the test task behind it.
        let (entered, inside) = std::sync::mpsc::channel::<()>();
        let stuck = zone.clone();
        tokio::spawn(async move {
            let _ = stuck
                .inspect(move |_| {
                    let _ = entered.send(());
                    let _ = gate.recv_timeout(Duration::from_secs(10));
                })
                .await;
        });
        while inside.try_recv().is_err() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        while zone.try_tick(0, 1).is_ok() {}
        release
    }

    async fn wait_for_fresh(directory: &Directory, key: ZoneKey) -> Option<ZoneHandle> {
        for _ in 0..100 {
            if let Some(fresh) = directory.zone(key) {
                if !fresh.is_closed() && fresh.stats().await.is_ok() {
                    return Some(fresh);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restarting_a_wedged_zone_does_not_block_other_zones() {
        let world = world(ZoneConfig {
            inbox_depth: 1,
            ..ZoneConfig::default()
        });
        let (handle, _task) = ZoneSupervisor::spawn(world);
        let stuck = handle.ensure_instance(1).await.unwrap();
        let release = wedge(&stuck).await;

        let restarting = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.restart(ZoneKey::new(1, 1)).await })
        };

        let other = tokio::time::timeout(Duration::from_secs(2), handle.ensure_instance(2))
            .await
            .expect("supervisor blocked by a wedged zone")
            .unwrap();
        assert_eq!(other.key(), ZoneKey::new(2, 1));
        assert!(!restarting.is_finished());

        drop(release);
        let fresh = tokio::time::timeout(Duration::from_secs(5), restarting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(fresh.key(), ZoneKey::new(1, 1));
        assert_eq!(fresh.stats().await.unwrap().tick_sequence, 0);
        assert!(stuck.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zone_failing_during_a_pending_restart_is_still_restarted() {
        let world = world(ZoneConfig {
            inbox_depth: 1,
            max_contained_panics: 1,
            persistent_zones: vec![2],
            ..ZoneConfig::default()
        });
        let directory = world.directory.clone();
        let (handle, _task) = ZoneSupervisor::spawn(world);
        let stuck = handle.ensure_instance(1).await.unwrap();
        let release = wedge(&stuck).await;
        let restarting = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.restart(ZoneKey::new(1, 1)).await })
        };

        let failing = handle.ensure_instance(2).await.unwrap();
        let _ = failing.inspect::<(), _>(|_| panic!("fatal")).await;
        let restarted = wait_for_fresh(&directory, ZoneKey::new(2, 1))
            .await
            .expect("zone was not restarted");
        assert!(failing.is_closed());
        assert_eq!(restarted.stats().await.unwrap().contained_panics, 0);

        drop(release);
        assert!(restarting.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn explicit_restart_replaces_the_instance() {
        let (handle, _task) = ZoneSupervisor::spawn(world(ZoneConfig::default()));
        let original = handle.ensure_instance(1).await.unwrap();
        let (tx, _rx) = mpsc::channel(64);
        original.add_player(record(1), tx).await.unwrap();

        let fresh = handle.restart(ZoneKey::new(1, 1)).await.unwrap();
        assert!(original.stats().await.is_err());
        let stats = fresh.stats().await.unwrap();
        assert_eq!(stats.players, 0);
        assert_eq!(stats.creatures, 2);
    }
}
