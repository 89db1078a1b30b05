//! The registry of connected participants.
//!
//! The registry is the one piece of state shared between the per-connection
//! tasks and the round scheduler. It is guarded by a single mutex with short
//! critical sections: insert, remove and snapshot only. All round logic
//! operates on immutable [`RegistrySnapshot`]s taken atomically; nothing
//! ever iterates the registry while it can mutate.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use thiserror::Error;
use tokio::sync::watch;

use crate::{
    context::ContextDescriptor,
    coordinator::channel::ChannelHandle,
    message::ParticipantId,
};

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The id is already registered by an active participant.
    #[error("participant id {0:?} is already registered")]
    DuplicateId(ParticipantId),
}

/// The registry entry for one connected participant. The entry is the sole
/// owner of the participant's transport channel.
#[derive(Debug, Clone)]
pub struct ParticipantEntry {
    pub channel: ChannelHandle,
    pub context: ContextDescriptor,
    pub sample_count: u64,
    pub last_seen: SystemTime,
    pub rounds_participated: u64,
    /// The round this participant was last selected for, `0` if never.
    pub last_selected_round: u64,
}

impl ParticipantEntry {
    pub fn new(channel: ChannelHandle, context: ContextDescriptor, sample_count: u64) -> Self {
        Self {
            channel,
            context,
            sample_count,
            last_seen: SystemTime::now(),
            rounds_participated: 0,
            last_selected_round: 0,
        }
    }
}

/// An immutable view of one registered participant, as seen at snapshot time.
#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub channel: ChannelHandle,
    pub context: ContextDescriptor,
    pub sample_count: u64,
    pub last_selected_round: u64,
}

/// An atomic snapshot of the registry, sorted by participant id.
pub type RegistrySnapshot = Vec<ParticipantInfo>;

/// The participant registry. Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Arc<Mutex<HashMap<ParticipantId, ParticipantEntry>>>,
    count_tx: watch::Sender<usize>,
    count_rx: watch::Receiver<usize>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (count_tx, count_rx) = watch::channel(0);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            count_tx,
            count_rx,
        }
    }

    /// Registers a participant. Rejects an id that is already active; an id
    /// that reconnects after eviction is a fresh registration.
    pub fn register(
        &self,
        id: ParticipantId,
        entry: ParticipantEntry,
    ) -> Result<(), RegistrationError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&id) {
            return Err(RegistrationError::DuplicateId(id));
        }
        entries.insert(id, entry);
        let _ = self.count_tx.send(entries.len());
        Ok(())
    }

    /// Removes a participant. Idempotent; returns whether an entry existed.
    pub fn unregister(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.remove(id).is_some();
        let _ = self.count_tx.send(entries.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A watch of the registered-participant count. The registration window
    /// waits on this instead of polling.
    pub fn count_watch(&self) -> watch::Receiver<usize> {
        self.count_rx.clone()
    }

    /// Takes an atomic, id-sorted snapshot of the registry.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self.entries.lock().unwrap();
        let mut snapshot: RegistrySnapshot = entries
            .iter()
            .map(|(id, entry)| ParticipantInfo {
                id: id.clone(),
                channel: entry.channel.clone(),
                context: entry.context.clone(),
                sample_count: entry.sample_count,
                last_selected_round: entry.last_selected_round,
            })
            .collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Records that the given participants were selected for `round`.
    pub fn mark_selected<'a>(&self, ids: impl IntoIterator<Item = &'a ParticipantId>, round: u64) {
        let mut entries = self.entries.lock().unwrap();
        for id in ids {
            if let Some(entry) = entries.get_mut(id) {
                entry.last_selected_round = round;
                entry.rounds_participated += 1;
                entry.last_seen = SystemTime::now();
            }
        }
    }

    /// Removes every entry. Used on shutdown.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        let _ = self.count_tx.send(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::channel::tests::broken_handle;

    fn entry() -> ParticipantEntry {
        ParticipantEntry::new(broken_handle(), ContextDescriptor::default(), 10)
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = Registry::new();
        registry.register("a".into(), entry()).unwrap();
        assert!(matches!(
            registry.register("a".into(), entry()),
            Err(RegistrationError::DuplicateId(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregistration_after_eviction() {
        let registry = Registry::new();
        registry.register("a".into(), entry()).unwrap();
        assert!(registry.unregister("a"));
        registry.register("a".into(), entry()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = Registry::new();
        registry.register("a".into(), entry()).unwrap();
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted_and_isolated() {
        let registry = Registry::new();
        registry.register("b".into(), entry()).unwrap();
        registry.register("a".into(), entry()).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        // mutating the registry does not affect the snapshot
        registry.unregister("a");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_count_watch_tracks_registrations() {
        let registry = Registry::new();
        let watch = registry.count_watch();
        assert_eq!(*watch.borrow(), 0);
        registry.register("a".into(), entry()).unwrap();
        assert_eq!(*watch.borrow(), 1);
        registry.unregister("a");
        assert_eq!(*watch.borrow(), 0);
    }

    #[test]
    fn test_mark_selected() {
        let registry = Registry::new();
        registry.register("a".into(), entry()).unwrap();
        registry.mark_selected(&["a".to_string()], 3);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].last_selected_round, 3);
    }
}
