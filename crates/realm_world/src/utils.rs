use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use realm_protocol::{EntityKind, Guid};

/// Milliseconds since the Unix epoch. A clock set before 1970 reads as 0.
pub fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Hands out process-unique serials for non-player guids.
///
/// Player guids are derived from the character id instead so that a
/// character keeps the same guid across zones and reconnects.
#[derive(Debug, Clone)]
pub struct GuidAllocator {
    next: Arc<AtomicU64>,
}

impl GuidAllocator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    /// An allocator whose first serial is `first`. Lets several worlds in
    /// one process share a directory without colliding.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first.max(1))),
        }
    }

    pub fn next(&self, kind: EntityKind) -> Guid {
        Guid::new(kind, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for GuidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn player_guid(character_id: u64) -> Guid {
    Guid::new(EntityKind::Player, character_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_shared_between_clones() {
        let a = GuidAllocator::new();
        let b = a.clone();
        let first = a.next(EntityKind::Creature);
        let second = b.next(EntityKind::Creature);
        assert_ne!(first, second);
        assert!(first.is_creature());
    }
}
