//! Game events published to downstream collaborators (quests, achievements,
//! economy). Publishing never blocks the simulation: a full sink drops the
//! event and counts it.

use std::sync::atomic::{AtomicU64, Ordering};

use realm_protocol::Guid;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::types::ZoneKey;
use crate::utils::current_timestamp_ms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    PlayerEnteredZone {
        character_id: u64,
        zone: ZoneKey,
    },
    PlayerLeftZone {
        character_id: u64,
        zone: ZoneKey,
    },
    CreatureKilled {
        creature: Guid,
        template_id: u32,
        /// Character credited through kill tagging.
        killer_character: Option<u64>,
        zone: ZoneKey,
    },
    PlayerDied {
        character_id: u64,
        killer: Guid,
        zone: ZoneKey,
    },
    ZoneStarted {
        zone: ZoneKey,
    },
    ZoneStopped {
        zone: ZoneKey,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub timestamp_ms: u64,
    pub event: GameEvent,
}

impl EventEnvelope {
    pub fn new(event: GameEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp_ms: current_timestamp_ms(),
            event,
        }
    }
}

pub trait EventSink: Send + Sync {
    /// Must return immediately.
    fn publish(&self, event: GameEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: GameEvent) {}
}

/// Forwards events into a bounded channel drained by a consumer task.
#[derive(Debug)]
pub struct ChannelEventSink {
    sender: mpsc::Sender<EventEnvelope>,
    dropped: AtomicU64,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                dropped: AtomicU64::new(0),
            },
            receiver,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: GameEvent) {
        if let Err(err) = self.sender.try_send(EventEnvelope::new(event)) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                warn!(dropped, "event sink saturated, dropping events: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_sink_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelEventSink::new(1);
        let zone = ZoneKey::new(1, 1);
        sink.publish(GameEvent::ZoneStarted { zone });
        sink.publish(GameEvent::ZoneStopped { zone });
        assert_eq!(sink.dropped(), 1);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, GameEvent::ZoneStarted { zone });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(GameEvent::PlayerDied {
            character_id: 4,
            killer: Guid(9),
            zone: ZoneKey::new(1, 2),
        })
        .unwrap();
        assert_eq!(json["type"], "player_died");
        assert_eq!(json["zone"]["instance_id"], 2);
    }
}
