// ── Connection registry ──
//
// The device id -> live connection map. Only the engine touches it, always
// under the engine's registry mutex.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::events::ConnectionEvents;
use crate::error::CoreError;
use crate::model::{ConnectionState, DeviceId};

pub(crate) struct Entry<C> {
    pub generation: u64,
    pub connection: Arc<C>,
    pub events: ConnectionEvents,
    pub state: ConnectionState,
}

pub(crate) struct Registry<C> {
    entries: BTreeMap<DeviceId, Entry<C>>,
    next_generation: u64,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_generation: 1,
        }
    }
}

impl<C> Registry<C> {
    pub(crate) fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    pub(crate) fn contains(&self, device: &DeviceId) -> bool {
        self.entries.contains_key(device)
    }

    pub(crate) fn ids(&self) -> Vec<DeviceId> {
        self.entries.keys().copied().collect()
    }

    /// Register a new connection. A second registration for the same id is
    /// an invariant violation.
    pub(crate) fn insert(&mut self, device: DeviceId, entry: Entry<C>) -> Result<(), CoreError> {
        if let Some(existing) = self.entries.get(&device) {
            return Err(CoreError::Invariant(format!(
                "device {device} already registered (generation {}), refusing generation {}",
                existing.generation, entry.generation
            )));
        }
        self.entries.insert(device, entry);
        Ok(())
    }

    pub(crate) fn remove(&mut self, device: &DeviceId) -> Option<Entry<C>> {
        self.entries.remove(device)
    }

    /// Remove the entry only if it still belongs to `generation`.
    pub(crate) fn remove_generation(
        &mut self,
        device: &DeviceId,
        generation: u64,
    ) -> Option<Entry<C>> {
        match self.entries.get(device) {
            Some(entry) if entry.generation == generation => self.entries.remove(device),
            _ => None,
        }
    }

    /// Record a state transition. Returns `false` for stale generations and
    /// for transitions that change nothing.
    pub(crate) fn set_state(
        &mut self,
        device: &DeviceId,
        generation: u64,
        state: ConnectionState,
    ) -> bool {
        match self.entries.get_mut(device) {
            Some(entry) if entry.generation == generation && entry.state != state => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<(DeviceId, Entry<C>)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<DeviceId, ConnectionState> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn entry(registry: &mut Registry<()>, device: DeviceId) -> Entry<()> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let generation = registry.next_generation();
        Entry {
            generation,
            connection: Arc::new(()),
            events: ConnectionEvents::new(device, generation, tx),
            state: ConnectionState::Connecting,
        }
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = Registry::default();
        let device = DeviceId::new(Uuid::new_v4());

        let first = entry(&mut registry, device);
        assert!(registry.insert(device, first).is_ok());

        let second = entry(&mut registry, device);
        assert!(matches!(
            registry.insert(device, second),
            Err(CoreError::Invariant(_))
        ));
        assert_eq!(registry.ids(), vec![device]);
    }

    #[test]
    fn stale_generation_cannot_evict_or_update() {
        let mut registry = Registry::default();
        let device = DeviceId::new(Uuid::new_v4());

        let old = entry(&mut registry, device);
        let old_generation = old.generation;
        assert!(registry.insert(device, old).is_ok());
        assert!(registry.remove(&device).is_some());

        let new = entry(&mut registry, device);
        let new_generation = new.generation;
        assert!(registry.insert(device, new).is_ok());

        assert!(!registry.set_state(&device, old_generation, ConnectionState::Connected));
        assert!(registry.remove_generation(&device, old_generation).is_none());
        assert!(registry.set_state(&device, new_generation, ConnectionState::Connected));
        assert!(!registry.set_state(&device, new_generation, ConnectionState::Connected));
        assert_eq!(
            registry.snapshot().get(&device),
            Some(&ConnectionState::Connected)
        );
    }
}
