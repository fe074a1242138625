//! Presence bookkeeping for presentation layers.
//!
//! Purely observational: nothing here gates negotiation.

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    pub id: String,
    pub display_label: String,
    pub is_local: bool,
}

/// Roster snapshot published on every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterView {
    pub count: usize,
    pub is_empty: bool,
}

pub struct ParticipantRegistry {
    records: Vec<ParticipantRecord>,
    roster: watch::Sender<RosterView>,
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        let (roster, _) = watch::channel(RosterView {
            count: 0,
            is_empty: true,
        });
        Self {
            records: Vec::new(),
            roster,
        }
    }

    /// No-op if `id` is already present. Returns true when added.
    pub fn add(&mut self, id: &str, label: &str, is_local: bool) -> bool {
        if self.contains(id) {
            return false;
        }
        self.records.push(ParticipantRecord {
            id: id.to_string(),
            display_label: label.to_string(),
            is_local,
        });
        debug!("Participant added: {} ({})", id, label);
        self.publish();
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<ParticipantRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        let record = self.records.remove(index);
        debug!("Participant removed: {}", id);
        self.publish();
        Some(record)
    }

    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.records.clear();
            self.publish();
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&ParticipantRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// In join order.
    pub fn participants(&self) -> &[ParticipantRecord] {
        &self.records
    }

    pub fn subscribe(&self) -> watch::Receiver<RosterView> {
        self.roster.subscribe()
    }

    fn publish(&self) {
        let view = RosterView {
            count: self.records.len(),
            is_empty: self.records.is_empty(),
        };
        self.roster.send_replace(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = ParticipantRegistry::new();
        assert!(registry.add("A", "Peer: A", false));
        assert!(!registry.add("A", "something else", true));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("A").unwrap().display_label, "Peer: A");
    }

    #[test]
    fn test_remove_missing_is_none() {
        let mut registry = ParticipantRegistry::new();
        assert!(registry.remove("ghost").is_none());
    }

    #[tokio::test]
    async fn test_empty_observation() {
        let mut registry = ParticipantRegistry::new();
        let mut roster = registry.subscribe();
        assert!(roster.borrow().is_empty);

        registry.add("me", "You", true);
        registry.add("B", "Peer: B", false);
        roster.changed().await.unwrap();
        assert_eq!(roster.borrow_and_update().count, 2);

        registry.remove("B");
        registry.remove("me");
        roster.changed().await.unwrap();
        let view = roster.borrow_and_update().clone();
        assert!(view.is_empty);
        assert_eq!(view.count, 0);
    }

    #[test]
    fn test_participants_keep_join_order() {
        let mut registry = ParticipantRegistry::new();
        registry.add("me", "You", true);
        registry.add("C", "Peer: C", false);
        registry.add("B", "Peer: B", false);
        let ids: Vec<_> = registry.participants().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["me", "C", "B"]);
        assert!(registry.participants()[0].is_local);
    }
}
