use std::collections::HashMap;

use realm_protocol::Guid;
use serde::{Deserialize, Serialize};

/// Accumulated hostility per source entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatTable {
    entries: HashMap<Guid, f32>,
}

impl ThreatTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `amount` (ignored unless positive and finite) and returns the new total.
    pub fn add(&mut self, source: Guid, amount: f32) -> f32 {
        let entry = self.entries.entry(source).or_insert(0.0);
        if amount.is_finite() && amount > 0.0 {
            *entry += amount;
        }
        *entry
    }

    pub fn get(&self, source: Guid) -> f32 {
        self.entries.get(&source).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, source: Guid) -> bool {
        self.entries.contains_key(&source)
    }

    pub fn remove(&mut self, source: Guid) -> Option<f32> {
        self.entries.remove(&source)
    }

    /// Reduces every entry and forgets those that reach zero.
    pub fn decay(&mut self, amount: f32) {
        if !(amount.is_finite() && amount > 0.0) {
            return;
        }
        self.entries.retain(|_, value| {
            *value -= amount;
            *value > 0.0
        });
    }

    /// Highest threat source. Ties go to the lower guid so the choice is
    /// stable across ticks.
    pub fn top(&self) -> Option<(Guid, f32)> {
        self.entries
            .iter()
            .map(|(guid, value)| (*guid, *value))
            .filter(|(_, value)| *value > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_protocol::EntityKind;

    #[test]
    fn decay_forgets_exhausted_sources() {
        let a = Guid::new(EntityKind::Player, 1);
        let b = Guid::new(EntityKind::Player, 2);
        let mut table = ThreatTable::new();
        table.add(a, 3.0);
        table.add(b, 10.0);
        table.decay(5.0);
        assert!(!table.contains(a));
        assert_eq!(table.get(b), 5.0);
        assert_eq!(table.top(), Some((b, 5.0)));
    }

    #[test]
    fn ties_prefer_lower_guid() {
        let a = Guid::new(EntityKind::Player, 1);
        let b = Guid::new(EntityKind::Player, 2);
        let mut table = ThreatTable::new();
        table.add(b, 4.0);
        table.add(a, 4.0);
        assert_eq!(table.top().map(|(g, _)| g), Some(a));
    }

    #[test]
    fn non_positive_amounts_are_ignored() {
        let a = Guid::new(EntityKind::Player, 1);
        let mut table = ThreatTable::new();
        table.add(a, -4.0);
        table.add(a, f32::NAN);
        assert_eq!(table.get(a), 0.0);
        assert_eq!(table.top(), None);
    }
}
