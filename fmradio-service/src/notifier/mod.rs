//! Event broker between the tuner and waiting clients.
//!
//! The hardware side raises one signal per category; the notifier fans it
//! out to every registered client. A client that has a wait outstanding for
//! that category is completed immediately. A client without one gets its
//! pending flag set, and its next wait for the category completes at once.
//! Pending flags coalesce: however many signals arrive between two waits,
//! the client sees one event and re-reads the current state.
//!
//! All state sits behind one synchronous lock that is never held across tuner
//! calls or `.await` points, so `signal` is safe from any thread, including
//! the tuner's own completion callbacks.

pub mod client_table;
pub mod registry;

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

use fmradio_protocol::{ClientId, ErrorCode, EventCategory};

use crate::tuner::TunerEventHandler;
use client_table::ClientTable;
pub use client_table::{WaitOutcome, WaitToken};
use registry::ContextToken;

/// Notifier errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifierError {
    /// The notifier has been shut down.
    #[error("Notifier is not running")]
    NotRunning,

    /// No client with this id is registered.
    #[error("Unknown client {0}")]
    UnknownClient(ClientId),

    /// The client already waits on this category.
    #[error("Client {client} already has a {category} wait outstanding")]
    WaitOutstanding {
        client: ClientId,
        category: EventCategory,
    },

    /// The client id is already registered.
    #[error("Client {0} is already registered")]
    DuplicateClient(ClientId),

    /// The wait ended because the client session was removed.
    #[error("Wait cancelled")]
    Cancelled,

    /// The wait ended because the notifier shut down.
    #[error("Server shutting down")]
    ShuttingDown,
}

impl NotifierError {
    /// Code reported to the remote caller.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            NotifierError::NotRunning => ErrorCode::NotRunning,
            NotifierError::UnknownClient(_) => ErrorCode::UnknownClient,
            NotifierError::WaitOutstanding { .. } => ErrorCode::WaitOutstanding,
            NotifierError::DuplicateClient(_) => ErrorCode::InvalidState,
            NotifierError::Cancelled => ErrorCode::Cancelled,
            NotifierError::ShuttingDown => ErrorCode::ShuttingDown,
        }
    }
}

#[derive(Debug)]
struct NotifierState {
    running: bool,
    clients: ClientTable,
}

/// Fans hardware events out to client waits.
#[derive(Debug)]
pub struct Notifier {
    state: Mutex<NotifierState>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState {
                running: true,
                clients: ClientTable::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Fail with [`NotifierError::NotRunning`] once shutdown has begun.
    pub fn ensure_running(&self) -> Result<(), NotifierError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(NotifierError::NotRunning)
        }
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Deliver one occurrence of `category` to every registered client.
    pub fn signal(&self, category: EventCategory) -> Result<(), NotifierError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(NotifierError::NotRunning);
        }

        let mut delivered = 0usize;
        let mut pended = 0usize;
        for (_, client) in state.clients.iter_mut() {
            let fired = match client.take_wait(category) {
                Some(token) => token.send(WaitOutcome::Fired(category)).is_ok(),
                None => false,
            };
            if fired {
                delivered += 1;
            } else {
                client.set_pending(category);
                pended += 1;
            }
        }

        debug!(
            "[Notifier] {} signalled: {} delivered, {} pending",
            category, delivered, pended
        );
        Ok(())
    }

    /// Register `token` to be completed by the next occurrence of `category`.
    ///
    /// Completes `token` before returning if an occurrence is already pending.
    pub fn request_wait(
        &self,
        client: ClientId,
        category: EventCategory,
        token: WaitToken,
    ) -> Result<(), NotifierError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(NotifierError::NotRunning);
        }
        let entry = state
            .clients
            .get_mut(client)
            .ok_or(NotifierError::UnknownClient(client))?;

        if entry.take_pending(category) {
            if token.send(WaitOutcome::Fired(category)).is_err() {
                // Caller already gone; keep the occurrence for the next wait.
                entry.set_pending(category);
            }
            trace!("[Notifier] Client {} took pending {}", client, category);
            return Ok(());
        }

        if entry.has_wait(category) {
            return Err(NotifierError::WaitOutstanding { client, category });
        }

        if entry.set_wait(category, token).is_some() {
            debug!("[Notifier] Client {} replaced an abandoned {} wait", client, category);
        }
        Ok(())
    }

    /// Wait for the next occurrence of `category` for `client`.
    pub async fn wait(
        &self,
        client: ClientId,
        category: EventCategory,
    ) -> Result<EventCategory, NotifierError> {
        let (tx, rx) = oneshot::channel();
        self.request_wait(client, category, tx)?;

        match rx.await {
            Ok(WaitOutcome::Fired(fired)) => Ok(fired),
            Ok(WaitOutcome::Cancelled) => Err(NotifierError::Cancelled),
            Ok(WaitOutcome::ShuttingDown) => Err(NotifierError::ShuttingDown),
            Err(_) => Err(NotifierError::Cancelled),
        }
    }

    /// Register a client with empty wait slots and no pending events.
    pub fn on_client_added(&self, client: ClientId) -> Result<(), NotifierError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(NotifierError::NotRunning);
        }
        if !state.clients.insert(client) {
            return Err(NotifierError::DuplicateClient(client));
        }
        info!("[Notifier] Client {} added ({} total)", client, state.clients.len());
        Ok(())
    }

    /// Drop a client, cancelling its outstanding waits.
    pub fn on_client_removed(&self, client: ClientId) -> Result<(), NotifierError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(NotifierError::NotRunning);
        }
        let mut entry = state
            .clients
            .remove(client)
            .ok_or(NotifierError::UnknownClient(client))?;

        let cancelled = entry
            .take_all_waits()
            .map(|token| token.send(WaitOutcome::Cancelled))
            .count();
        info!(
            "[Notifier] Client {} removed, {} wait(s) cancelled ({} remaining)",
            client,
            cancelled,
            state.clients.len()
        );
        Ok(())
    }

    /// Cancel every outstanding wait and refuse all further calls.
    ///
    /// Returns the number of waits cancelled. Calling it twice is harmless.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        if !state.running {
            return 0;
        }
        state.running = false;

        let mut cancelled = 0usize;
        for (_, mut entry) in state.clients.drain() {
            for token in entry.take_all_waits() {
                let _ = token.send(WaitOutcome::ShuttingDown);
                cancelled += 1;
            }
        }
        info!("[Notifier] Shut down, {} wait(s) cancelled", cancelled);
        cancelled
    }
}

impl TunerEventHandler for Notifier {
    fn on_tuner_event(&self, token: ContextToken) {
        let Some(category) = registry::category_for(token) else {
            warn!("[Notifier] Ignoring completion with unknown context {}", token);
            return;
        };
        if let Err(e) = self.signal(category) {
            debug!("[Notifier] Dropped {} from tuner: {}", category, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    const A: ClientId = ClientId(0);
    const B: ClientId = ClientId(1);

    fn notifier_with(clients: &[ClientId]) -> Notifier {
        let notifier = Notifier::new();
        for client in clients {
            notifier.on_client_added(*client).unwrap();
        }
        notifier
    }

    #[test]
    fn test_signal_fires_outstanding_wait() {
        let notifier = notifier_with(&[A]);
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::PlayStateChange, tx).unwrap();
        assert!(rx.try_recv().is_err());

        notifier.signal(EventCategory::PlayStateChange).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::PlayStateChange));
    }

    #[test]
    fn test_signal_without_wait_sets_pending() {
        let notifier = notifier_with(&[A]);
        notifier.signal(EventCategory::FrequencyChange).unwrap();

        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::FrequencyChange, tx).unwrap();
        // Completed synchronously, before any further signal
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::FrequencyChange));
    }

    #[test]
    fn test_repeated_signals_coalesce() {
        let notifier = notifier_with(&[A]);
        notifier.signal(EventCategory::AntennaStatusChange).unwrap();
        notifier.signal(EventCategory::AntennaStatusChange).unwrap();

        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::AntennaStatusChange, tx).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            WaitOutcome::Fired(EventCategory::AntennaStatusChange)
        );

        // Exactly once: the next wait stays outstanding
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::AntennaStatusChange, tx).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fanout_reaches_every_client() {
        let notifier = notifier_with(&[A, B]);
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::PlayStateChange, tx).unwrap();

        notifier.signal(EventCategory::PlayStateChange).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::PlayStateChange));

        // B had no wait, so the event is pending for it
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(B, EventCategory::PlayStateChange, tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::PlayStateChange));
    }

    #[test]
    fn test_categories_are_independent() {
        let notifier = notifier_with(&[A]);
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::FrequencyChange, tx).unwrap();

        notifier.signal(EventCategory::PlayStateChange).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_second_wait_is_rejected() {
        let notifier = notifier_with(&[A]);
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        notifier.request_wait(A, EventCategory::PlayStateChange, tx1).unwrap();

        let err = notifier
            .request_wait(A, EventCategory::PlayStateChange, tx2)
            .unwrap_err();
        assert_eq!(
            err,
            NotifierError::WaitOutstanding {
                client: A,
                category: EventCategory::PlayStateChange
            }
        );

        // First wait is untouched
        notifier.signal(EventCategory::PlayStateChange).unwrap();
        assert_eq!(rx1.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::PlayStateChange));
    }

    #[test]
    fn test_abandoned_wait_does_not_lose_event() {
        let notifier = notifier_with(&[A]);
        let (tx, rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::FrequencyChange, tx).unwrap();
        drop(rx);

        notifier.signal(EventCategory::FrequencyChange).unwrap();

        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::FrequencyChange, tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::FrequencyChange));
    }

    #[test]
    fn test_abandoned_wait_can_be_replaced() {
        let notifier = notifier_with(&[A]);
        let (tx, rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::PlayStateChange, tx).unwrap();
        drop(rx);

        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::PlayStateChange, tx).unwrap();
        notifier.signal(EventCategory::PlayStateChange).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::PlayStateChange));
    }

    #[test]
    fn test_unknown_client() {
        let notifier = notifier_with(&[A]);
        let (tx, _rx) = oneshot::channel();
        assert_eq!(
            notifier.request_wait(B, EventCategory::PlayStateChange, tx),
            Err(NotifierError::UnknownClient(B))
        );
        assert_eq!(notifier.on_client_removed(B), Err(NotifierError::UnknownClient(B)));
        assert_eq!(notifier.on_client_added(A), Err(NotifierError::DuplicateClient(A)));
    }

    #[test]
    fn test_removal_cancels_waits_once() {
        let notifier = notifier_with(&[A, B]);
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::FrequencyChange, tx).unwrap();

        notifier.on_client_removed(A).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Cancelled);

        // A later signal neither reaches the removed client nor fails
        notifier.signal(EventCategory::FrequencyChange).unwrap();
        assert_eq!(notifier.client_count(), 1);

        let (tx, _rx) = oneshot::channel();
        assert_eq!(
            notifier.request_wait(A, EventCategory::FrequencyChange, tx),
            Err(NotifierError::UnknownClient(A))
        );
    }

    #[test]
    fn test_shutdown_cancels_and_disables() {
        let notifier = notifier_with(&[A, B]);
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(B, EventCategory::FrequencyChange, tx).unwrap();
        assert_eq!(notifier.ensure_running(), Ok(()));

        assert_eq!(notifier.shutdown(), 1);
        assert_eq!(notifier.ensure_running(), Err(NotifierError::NotRunning));
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::ShuttingDown);
        assert!(!notifier.is_running());

        assert_eq!(notifier.signal(EventCategory::FrequencyChange), Err(NotifierError::NotRunning));
        let (tx, _rx) = oneshot::channel();
        assert_eq!(
            notifier.request_wait(A, EventCategory::FrequencyChange, tx),
            Err(NotifierError::NotRunning)
        );
        assert_eq!(notifier.on_client_added(ClientId(2)), Err(NotifierError::NotRunning));
        assert_eq!(notifier.shutdown(), 0);
    }

    #[test]
    fn test_tuner_completion_is_signalled() {
        let notifier = notifier_with(&[A]);
        notifier.on_tuner_event(registry::token_for(EventCategory::AntennaStatusChange));
        notifier.on_tuner_event(ContextToken::from_raw(99).unwrap());

        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(A, EventCategory::AntennaStatusChange, tx).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            WaitOutcome::Fired(EventCategory::AntennaStatusChange)
        );
    }

    #[tokio::test]
    async fn test_wait_suspends_until_signal() {
        let notifier = Arc::new(notifier_with(&[A]));
        let waiter = {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move { notifier.wait(A, EventCategory::PlayStateChange).await })
        };

        // Let the waiter register before signalling; a signal that wins the
        // race is still delivered through the pending flag.
        tokio::time::sleep(Duration::from_millis(20)).await;
        notifier.signal(EventCategory::PlayStateChange).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Ok(EventCategory::PlayStateChange));
    }

    #[tokio::test]
    async fn test_wait_reports_cancellation() {
        let notifier = Arc::new(notifier_with(&[A]));
        let waiter = {
            let notifier = Arc::clone(&notifier);
            tokio::spawn(async move { notifier.wait(A, EventCategory::FrequencyChange).await })
        };

        // Removing before the wait registers would surface as UnknownClient
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let registered = notifier
                .state
                .lock()
                .clients
                .get_mut(A)
                .is_some_and(|c| c.has_wait(EventCategory::FrequencyChange));
            if registered {
                break;
            }
        }
        notifier.on_client_removed(A).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(NotifierError::Cancelled));
    }

    #[test]
    fn test_concurrent_signals_lose_nothing() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let notifier = Arc::new(notifier_with(&[A, B]));
        let done = Arc::new(AtomicBool::new(false));

        let consumer = {
            let notifier = Arc::clone(&notifier);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut observed = 0u32;
                loop {
                    let (tx, rx) = oneshot::channel();
                    notifier.request_wait(A, EventCategory::FrequencyChange, tx).unwrap();
                    assert_eq!(
                        rx.blocking_recv().unwrap(),
                        WaitOutcome::Fired(EventCategory::FrequencyChange)
                    );
                    observed += 1;
                    if done.load(Ordering::SeqCst) {
                        return observed;
                    }
                }
            })
        };

        for _ in 0..1000 {
            notifier.signal(EventCategory::FrequencyChange).unwrap();
        }
        done.store(true, Ordering::SeqCst);
        // The consumer only exits after seeing an occurrence raised after this point
        notifier.signal(EventCategory::FrequencyChange).unwrap();

        let observed = consumer.join().unwrap();
        assert!(observed >= 1 && observed <= 1001);

        // B never waited: all 1001 occurrences coalesce into one
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(B, EventCategory::FrequencyChange, tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), WaitOutcome::Fired(EventCategory::FrequencyChange));
        let (tx, mut rx) = oneshot::channel();
        notifier.request_wait(B, EventCategory::FrequencyChange, tx).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
