//! The zone actor: a task that owns one [`ZoneInstance`] and processes its
//! inbox strictly in order.
//!
//! Every message runs inside `catch_unwind`. Messages that can mutate the
//! instance run against a snapshot taken just before them; if the handler
//! panics the snapshot is put back, so the message either fully applies or
//! leaves no trace. Processing then continues with the next message. Only a
//! zone that keeps panicking is shut down.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use realm_protocol::{Guid, ServerPacket, Vec3};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, trace, warn};

use super::command::ZoneCommand;
use super::instance::{ZoneEntry, ZoneInstance, ZoneLifecycle, ZoneStats};
use crate::directory::ZoneRegistration;
use crate::entity::Entity;
use crate::error::ZoneError;
use crate::persistence::CharacterRecord;
use crate::types::ZoneKey;

type InspectFn = Box<dyn FnOnce(&mut ZoneInstance) + Send>;

pub enum ZoneMessage {
    AddPlayer {
        record: CharacterRecord,
        outbound: mpsc::Sender<ServerPacket>,
        reply: oneshot::Sender<Result<ZoneEntry, ZoneError>>,
    },
    RemovePlayer {
        guid: Guid,
        reply: Option<oneshot::Sender<Option<Entity>>>,
    },
    /// Fire-and-forget. Rejections go back to the actor's own subscriber
    /// channel as `CommandRejected`.
    Command {
        guid: Guid,
        command: ZoneCommand,
        received_ms: u64,
    },
    Tick {
        now_ms: u64,
        sequence: u64,
    },
    Query {
        position: Vec3,
        radius: f32,
        reply: oneshot::Sender<Vec<Guid>>,
    },
    Stats {
        reply: oneshot::Sender<ZoneStats>,
    },
    /// Rolls non-player state back to the last checkpoint.
    Restore {
        reply: oneshot::Sender<()>,
    },
    /// Runs arbitrary code against the instance. Diagnostics and tests.
    Inspect(InspectFn),
    Stop,
}

impl ZoneMessage {
    /// Whether handling this message may change zone state.
    fn mutates(&self) -> bool {
        !matches!(self, Self::Query { .. } | Self::Stats { .. } | Self::Stop)
    }
}

impl std::fmt::Debug for ZoneMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AddPlayer { .. } => "AddPlayer",
            Self::RemovePlayer { .. } => "RemovePlayer",
            Self::Command { .. } => "Command",
            Self::Tick { .. } => "Tick",
            Self::Query { .. } => "Query",
            Self::Stats { .. } => "Stats",
            Self::Restore { .. } => "Restore",
            Self::Inspect(_) => "Inspect",
            Self::Stop => "Stop",
        };
        f.write_str(name)
    }
}

/// Why a zone actor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneExit {
    /// Idle timeout reached.
    Stopped,
    /// Asked to stop, or every handle was dropped.
    Shutdown,
    /// Too many contained panics.
    Poisoned,
    /// The task itself unwound. Set by whoever awaited the task.
    Panicked,
}

impl ZoneExit {
    pub fn should_restart(self) -> bool {
        matches!(self, Self::Poisoned | Self::Panicked)
    }
}

/// Cloneable address of a running zone actor.
#[derive(Clone, Debug)]
pub struct ZoneHandle {
    key: ZoneKey,
    sender: mpsc::Sender<ZoneMessage>,
    occupancy: Arc<AtomicUsize>,
    halt: Arc<Notify>,
}

impl ZoneHandle {
    pub fn key(&self) -> ZoneKey {
        self.key
    }

    /// Player count as of the last processed message.
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send(&self, message: ZoneMessage) -> Result<(), ZoneError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ZoneError::Unavailable(self.key))
    }

    /// Never waits. A zone whose inbox is full simply misses this tick.
    pub fn try_tick(&self, now_ms: u64, sequence: u64) -> Result<(), TrySendError<ZoneMessage>> {
        self.sender.try_send(ZoneMessage::Tick { now_ms, sequence })
    }

    pub async fn add_player(
        &self,
        record: CharacterRecord,
        outbound: mpsc::Sender<ServerPacket>,
    ) -> Result<ZoneEntry, ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.send(ZoneMessage::AddPlayer {
            record,
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ZoneError::Unavailable(self.key))?
    }

    /// Removes the player and returns its final state, if the zone still
    /// has it.
    pub async fn remove_player(&self, guid: Guid) -> Result<Option<Entity>, ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.send(ZoneMessage::RemovePlayer {
            guid,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| ZoneError::Unavailable(self.key))
    }

    pub async fn command(
        &self,
        guid: Guid,
        command: ZoneCommand,
        received_ms: u64,
    ) -> Result<(), ZoneError> {
        self.send(ZoneMessage::Command {
            guid,
            command,
            received_ms,
        })
        .await
    }

    pub async fn query(&self, position: Vec3, radius: f32) -> Result<Vec<Guid>, ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.send(ZoneMessage::Query {
            position,
            radius,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ZoneError::Unavailable(self.key))
    }

    pub async fn stats(&self) -> Result<ZoneStats, ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.send(ZoneMessage::Stats { reply }).await?;
        rx.await.map_err(|_| ZoneError::Unavailable(self.key))
    }

    pub async fn restore(&self) -> Result<(), ZoneError> {
        let (reply, rx) = oneshot::channel();
        self.send(ZoneMessage::Restore { reply }).await?;
        rx.await.map_err(|_| ZoneError::Unavailable(self.key))
    }

    /// Runs `f` on the zone task and returns its result. A panic inside `f`
    /// is contained by the actor and surfaces here as `Unavailable`.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R, ZoneError>
    where
        F: FnOnce(&mut ZoneInstance) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(ZoneMessage::Inspect(Box::new(move |zone| {
            let _ = reply.send(f(zone));
        })))
        .await?;
        rx.await.map_err(|_| ZoneError::Unavailable(self.key))
    }

    /// Queues a stop behind whatever is already in the inbox.
    pub async fn stop(&self) {
        let _ = self.sender.send(ZoneMessage::Stop).await;
    }

    /// Like [`ZoneHandle::stop`] but never waits. Falls back to
    /// [`ZoneHandle::halt`] when the inbox is full.
    pub fn request_stop(&self) {
        if self.sender.try_send(ZoneMessage::Stop).is_err() {
            self.halt();
        }
    }

    /// Stops the actor as soon as its current message returns. Anything
    /// still queued is dropped.
    pub fn halt(&self) {
        self.halt.notify_one();
    }
}

pub struct ZoneActor {
    zone: ZoneInstance,
    inbox: mpsc::Receiver<ZoneMessage>,
    occupancy: Arc<AtomicUsize>,
    halt: Arc<Notify>,
    max_contained_panics: u32,
    contained_panics: u32,
    registration: Option<ZoneRegistration>,
}

impl ZoneActor {
    pub fn new(zone: ZoneInstance, inbox_depth: usize, max_contained_panics: u32) -> (Self, ZoneHandle) {
        let (sender, inbox) = mpsc::channel(inbox_depth.max(1));
        let occupancy = Arc::new(AtomicUsize::new(zone.player_count()));
        let halt = Arc::new(Notify::new());
        let handle = ZoneHandle {
            key: zone.key(),
            sender,
            occupancy: Arc::clone(&occupancy),
            halt: Arc::clone(&halt),
        };
        let actor = Self {
            zone,
            inbox,
            occupancy,
            halt,
            max_contained_panics,
            contained_panics: 0,
            registration: None,
        };
        (actor, handle)
    }

    /// Ties the directory entry to the actor's lifetime.
    pub fn attach_registration(&mut self, registration: ZoneRegistration) {
        self.registration = Some(registration);
    }

    pub async fn run(mut self) -> ZoneExit {
        let key = self.zone.key();
        info!(zone = %key, "🚀 Zone actor started");

        let exit = loop {
            let message = tokio::select! {
                biased;
                _ = self.halt.notified() => {
                    info!(zone = %key, dropped = self.inbox.len(), "Zone halted");
                    self.zone.stop();
                    break ZoneExit::Shutdown;
                }
                message = self.inbox.recv() => message,
            };
            let Some(message) = message else {
                break ZoneExit::Shutdown;
            };
            if matches!(message, ZoneMessage::Stop) {
                self.zone.stop();
                break ZoneExit::Shutdown;
            }

            let snapshot = message.mutates().then(|| self.zone.snapshot());
            let zone = &mut self.zone;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handle_message(zone, message))) {
                self.contained_panics += 1;
                self.zone.record_contained_panic();
                error!(
                    zone = %key,
                    count = self.contained_panics,
                    "💥 Zone message handler panicked: {}",
                    panic_message(panic.as_ref())
                );
                if let Some(snapshot) = snapshot {
                    self.zone.rollback(snapshot);
                }
                if let Err(problem) = self.zone.verify_consistency() {
                    warn!(zone = %key, "Inconsistent state after panic: {}", problem);
                    self.zone.restore_last_checkpoint();
                }
                if self.contained_panics >= self.max_contained_panics {
                    error!(zone = %key, "Zone exceeded its panic allowance, shutting down");
                    self.zone.stop();
                    break ZoneExit::Poisoned;
                }
            }

            self.occupancy.store(self.zone.player_count(), Ordering::Relaxed);
            if self.zone.lifecycle() == ZoneLifecycle::Stopped {
                break ZoneExit::Stopped;
            }
        };

        self.registration.take();
        info!(zone = %key, exit = ?exit, "Zone actor finished");
        exit
    }
}

fn handle_message(zone: &mut ZoneInstance, message: ZoneMessage) {
    match message {
        ZoneMessage::AddPlayer {
            record,
            outbound,
            reply,
        } => {
            let result = zone.admit_player(&record, outbound);
            let admitted = result.as_ref().ok().map(|entry| entry.guid);
            if reply.send(result).is_err() {
                // Requester went away before hearing back.
                if let Some(guid) = admitted {
                    zone.remove_entity(guid);
                }
            }
        }
        ZoneMessage::RemovePlayer { guid, reply } => {
            let removed = zone.remove_entity(guid);
            if let Some(reply) = reply {
                let _ = reply.send(removed);
            }
        }
        ZoneMessage::Command {
            guid,
            command,
            received_ms,
        } => {
            let opcode = command.opcode();
            if let Err(err) = zone.apply_command(guid, command, received_ms) {
                debug!(zone = %zone.key(), actor = %guid, "command rejected: {}", err);
                zone.send_to(
                    guid,
                    ServerPacket::CommandRejected {
                        command_opcode: opcode,
                        reason: err.reject_reason(),
                    },
                );
            }
        }
        ZoneMessage::Tick { now_ms, sequence } => {
            trace!(zone = %zone.key(), sequence, "tick");
            zone.tick(now_ms);
        }
        ZoneMessage::Query {
            position,
            radius,
            reply,
        } => {
            let _ = reply.send(zone.entities_in_range(position, radius));
        }
        ZoneMessage::Stats { reply } => {
            let _ = reply.send(zone.stats());
        }
        ZoneMessage::Restore { reply } => {
            zone.restore_last_checkpoint();
            let _ = reply.send(());
        }
        ZoneMessage::Inspect(f) => f(zone),
        ZoneMessage::Stop => zone.stop(),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZoneConfig;
    use crate::content::StaticContent;
    use crate::directory::Directory;
    use crate::events::NullEventSink;
    use crate::utils::GuidAllocator;
    use realm_protocol::RejectReason;
    use tokio::task::JoinHandle;

    const WOLF_SPAWN: Vec3 = Vec3 {
        x: 30.0,
        y: 0.0,
        z: 10.0,
    };

    fn start(zone_id: u32, config: ZoneConfig, directory: &Directory) -> (ZoneHandle, JoinHandle<ZoneExit>) {
        let max_panics = config.max_contained_panics;
        let mut zone = ZoneInstance::new(
            ZoneKey::new(zone_id, 1),
            Arc::new(config),
            Arc::new(StaticContent::starter()),
            Arc::new(NullEventSink),
            directory.clone(),
            GuidAllocator::starting_at(u64::from(zone_id) << 32),
        );
        zone.load(0);
        let (mut actor, handle) = ZoneActor::new(zone, 64, max_panics);
        actor.attach_registration(directory.register_zone(handle.clone()).unwrap());
        (handle, tokio::spawn(actor.run()))
    }

    fn record(id: u64, position: Vec3) -> CharacterRecord {
        CharacterRecord {
            character_id: id,
            account_id: id,
            name: format!("Player{id}"),
            zone_id: 1,
            position: Some(position),
            rotation: 0.0,
            health: 100,
            max_health: 100,
            attack_power: 10,
            attack_range: 5.0,
            account_suspended: false,
        }
    }

    async fn wolf(handle: &ZoneHandle) -> Guid {
        handle.query(WOLF_SPAWN, 0.5).await.unwrap()[0]
    }

    #[tokio::test]
    async fn concurrent_attacks_from_two_sessions_both_land() {
        let directory = Directory::new();
        let (handle, _task) = start(1, ZoneConfig::default(), &directory);
        let (tx_a, _rx_a) = mpsc::channel(64);
        let (tx_b, _rx_b) = mpsc::channel(64);
        let a = handle.add_player(record(1, Vec3::new(30.0, 0.0, 12.0)), tx_a).await.unwrap();
        let b = handle.add_player(record(2, Vec3::new(31.0, 0.0, 9.0)), tx_b).await.unwrap();
        let target = wolf(&handle).await;

        let sessions = [a.guid, b.guid].map(|guid| {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .command(guid, ZoneCommand::Attack { target }, 1_000)
                    .await
            })
        });
        for session in sessions {
            session.await.unwrap().unwrap();
        }

        let health = handle
            .inspect(move |zone| zone.entity(target).map(|e| e.health))
            .await
            .unwrap();
        assert_eq!(health, Some(40));
        assert_eq!(handle.occupancy(), 2);
    }

    #[tokio::test]
    async fn rejection_is_reported_to_the_sender_only() {
        let directory = Directory::new();
        let (handle, _task) = start(1, ZoneConfig::default(), &directory);
        let (tx, mut rx) = mpsc::channel(64);
        let me = handle.add_player(record(1, Vec3::ZERO), tx).await.unwrap();
        let target = wolf(&handle).await;

        handle
            .command(me.guid, ZoneCommand::Attack { target }, 0)
            .await
            .unwrap();
        handle.stats().await.unwrap();

        let mut rejected = None;
        while let Ok(packet) = rx.try_recv() {
            if let ServerPacket::CommandRejected { .. } = packet {
                rejected = Some(packet);
            }
        }
        assert_eq!(
            rejected,
            Some(ServerPacket::CommandRejected {
                command_opcode: realm_protocol::opcode::ATTACK,
                reason: RejectReason::TargetOutOfRange,
            })
        );
    }

    #[tokio::test]
    async fn panic_is_contained_and_corruption_rolled_back() {
        let directory = Directory::new();
        let (faulty, _task) = start(1, ZoneConfig::default(), &directory);
        let (healthy, _other) = start(2, ZoneConfig::default(), &directory);
        let (tx, _rx) = mpsc::channel(64);
        let player = faulty
            .add_player(record(1, Vec3::new(5.0, 0.0, 5.0)), tx)
            .await
            .unwrap();
        let target = wolf(&faulty).await;
        let healthy_before = healthy.stats().await.unwrap();

        let result = faulty
            .inspect::<(), _>(move |zone| {
                if let Some(entity) = zone.entity_mut(target) {
                    entity.position = Vec3::new(-400.0, 0.0, 0.0);
                }
                panic!("injected fault");
            })
            .await;
        assert_eq!(result, Err(ZoneError::Unavailable(ZoneKey::new(1, 1))));

        let (wolf_position, player_position, consistent) = faulty
            .inspect(move |zone| {
                (
                    zone.entity(target).map(|e| e.position),
                    zone.entity(player.guid).map(|e| e.position),
                    zone.verify_consistency().is_ok(),
                )
            })
            .await
            .unwrap();
        assert_eq!(wolf_position, Some(WOLF_SPAWN));
        assert_eq!(player_position, Some(Vec3::new(5.0, 0.0, 5.0)));
        assert!(consistent);

        let stats = faulty.stats().await.unwrap();
        assert_eq!(stats.contained_panics, 1);
        assert_eq!(stats.restores, 1);
        let healthy_after = healthy.stats().await.unwrap();
        assert_eq!(healthy_after.entities, healthy_before.entities);
        assert_eq!(healthy_after.contained_panics, 0);
    }

    #[tokio::test]
    async fn panicking_message_is_undone_even_when_state_looks_valid() {
        let directory = Directory::new();
        let (handle, _task) = start(1, ZoneConfig::default(), &directory);
        let (tx, _rx) = mpsc::channel(64);
        let player = handle
            .add_player(record(1, Vec3::new(30.0, 0.0, 12.0)), tx)
            .await
            .unwrap();
        let target = wolf(&handle).await;
        let before = handle
            .inspect(move |zone| zone.entity(target).map(|e| e.health))
            .await
            .unwrap()
            .unwrap();

        // Health written, death handling never reached.
        let result = handle
            .inspect::<(), _>(move |zone| {
                if let Some(entity) = zone.entity_mut(target) {
                    entity.health = 0;
                }
                panic!("fault after partial write");
            })
            .await;
        assert!(result.is_err());

        let (health, state, consistent) = handle
            .inspect(move |zone| {
                (
                    zone.entity(target).map(|e| e.health),
                    zone.controller(target).map(|c| c.state()),
                    zone.verify_consistency().is_ok(),
                )
            })
            .await
            .unwrap();
        assert_eq!(health, Some(before));
        assert_eq!(state, Some(crate::creature::AiState::Idle));
        assert!(consistent);

        // The creature is still a valid target.
        handle
            .command(player.guid, ZoneCommand::Attack { target }, 1_000)
            .await
            .unwrap();
        let health = handle
            .inspect(move |zone| zone.entity(target).map(|e| e.health))
            .await
            .unwrap();
        assert_eq!(health, Some(before - 10));
    }

    #[tokio::test]
    async fn halt_skips_queued_messages() {
        let directory = Directory::new();
        let (handle, task) = start(1, ZoneConfig::default(), &directory);
        handle.halt();
        assert_eq!(task.await.unwrap(), ZoneExit::Shutdown);
        assert_eq!(directory.zone_count(), 0);
        assert!(handle.stats().await.is_err());
    }

    #[tokio::test]
    async fn repeated_panics_poison_the_zone() {
        let directory = Directory::new();
        let config = ZoneConfig {
            max_contained_panics: 2,
            ..ZoneConfig::default()
        };
        let (handle, task) = start(1, config, &directory);
        for _ in 0..2 {
            let _ = handle.inspect::<(), _>(|_| panic!("boom")).await;
        }
        assert_eq!(task.await.unwrap(), ZoneExit::Poisoned);
        assert!(directory.zone(ZoneKey::new(1, 1)).is_none());
        assert_eq!(directory.entity_count(), 0);
        assert!(handle.stats().await.is_err());
    }

    #[tokio::test]
    async fn stop_releases_directory_entries() {
        let directory = Directory::new();
        let (handle, task) = start(1, ZoneConfig::default(), &directory);
        assert!(directory.zone(ZoneKey::new(1, 1)).is_some());
        handle.stop().await;
        assert_eq!(task.await.unwrap(), ZoneExit::Shutdown);
        assert_eq!(directory.zone_count(), 0);
        assert_eq!(directory.entity_count(), 0);
    }

    #[tokio::test]
    async fn abandoned_admission_is_undone() {
        let directory = Directory::new();
        let (handle, _task) = start(1, ZoneConfig::default(), &directory);
        let (tx, _rx) = mpsc::channel(64);
        let (reply, rx) = oneshot::channel();
        drop(rx);
        handle
            .sender
            .send(ZoneMessage::AddPlayer {
                record: record(9, Vec3::ZERO),
                outbound: tx,
                reply,
            })
            .await
            .unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.players, 0);
        assert!(directory.entity_zone(crate::utils::player_guid(9)).is_none());
    }
}
