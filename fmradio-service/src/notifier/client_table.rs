//! Per-client wait slots and pending-event flags.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tokio::sync::oneshot;

use fmradio_protocol::{ClientId, EventCategory};

/// How an outstanding wait was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The awaited event fired.
    Fired(EventCategory),
    /// The client session ended.
    Cancelled,
    /// The notifier shut down.
    ShuttingDown,
}

/// Completion side of one outstanding wait.
pub type WaitToken = oneshot::Sender<WaitOutcome>;

/// Wait slots and pending flags for one client.
#[derive(Debug, Default)]
pub struct ClientState {
    waits: [Option<WaitToken>; EventCategory::COUNT],
    pending: [bool; EventCategory::COUNT],
}

impl ClientState {
    /// Whether a live wait is outstanding for `category`.
    ///
    /// A wait whose caller has gone away does not count.
    pub fn has_wait(&self, category: EventCategory) -> bool {
        self.waits[category.index()]
            .as_ref()
            .is_some_and(|token| !token.is_closed())
    }

    pub fn is_pending(&self, category: EventCategory) -> bool {
        self.pending[category.index()]
    }

    pub fn set_pending(&mut self, category: EventCategory) {
        self.pending[category.index()] = true;
    }

    /// Clear the pending flag, returning whether it was set.
    pub fn take_pending(&mut self, category: EventCategory) -> bool {
        std::mem::take(&mut self.pending[category.index()])
    }

    /// Store a wait, returning any previous (dead) token.
    pub fn set_wait(&mut self, category: EventCategory, token: WaitToken) -> Option<WaitToken> {
        self.waits[category.index()].replace(token)
    }

    pub fn take_wait(&mut self, category: EventCategory) -> Option<WaitToken> {
        self.waits[category.index()].take()
    }

    /// Remove every outstanding wait.
    pub fn take_all_waits(&mut self) -> impl Iterator<Item = WaitToken> + '_ {
        self.waits.iter_mut().filter_map(Option::take)
    }
}

/// All connected clients, keyed by id.
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: HashMap<ClientId, ClientState>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zero-initialized client. Returns false if the id is already present.
    pub fn insert(&mut self, id: ClientId) -> bool {
        match self.clients.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ClientState::default());
                true
            }
        }
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientState> {
        self.clients.remove(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientState> {
        self.clients.get_mut(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ClientId, &mut ClientState)> {
        self.clients.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Remove every client.
    pub fn drain(&mut self) -> impl Iterator<Item = (ClientId, ClientState)> + '_ {
        self.clients.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_exclusive() {
        let mut table = ClientTable::new();
        assert!(table.insert(ClientId(0)));
        assert!(!table.insert(ClientId(0)));
        assert_eq!(table.len(), 1);
        assert!(table.remove(ClientId(0)).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_pending_flag_coalesces() {
        let mut state = ClientState::default();
        state.set_pending(EventCategory::FrequencyChange);
        state.set_pending(EventCategory::FrequencyChange);
        assert!(state.take_pending(EventCategory::FrequencyChange));
        assert!(!state.take_pending(EventCategory::FrequencyChange));
        assert!(!state.is_pending(EventCategory::PlayStateChange));
    }

    #[test]
    fn test_closed_wait_is_not_outstanding() {
        let mut state = ClientState::default();
        let (tx, rx) = oneshot::channel();
        state.set_wait(EventCategory::PlayStateChange, tx);
        assert!(state.has_wait(EventCategory::PlayStateChange));

        drop(rx);
        assert!(!state.has_wait(EventCategory::PlayStateChange));
        assert!(state.take_wait(EventCategory::PlayStateChange).is_some());
    }

    #[test]
    fn test_take_all_waits() {
        let mut state = ClientState::default();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        state.set_wait(EventCategory::AntennaStatusChange, tx1);
        state.set_wait(EventCategory::PlayStateChange, tx2);
        assert_eq!(state.take_all_waits().count(), 2);
        assert!(!state.has_wait(EventCategory::AntennaStatusChange));
    }
}
