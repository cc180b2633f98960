//! Client id assignment and per-client setup/teardown.

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use thiserror::Error;

use fmradio_protocol::{ClientId, ErrorCode, EventCategory};

use crate::notifier::{Notifier, NotifierError};

/// Session lifecycle errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Every client id has been handed out.
    #[error("Client ids exhausted")]
    ClientIdsExhausted,

    #[error(transparent)]
    Notifier(#[from] NotifierError),
}

impl SessionError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SessionError::ClientIdsExhausted => ErrorCode::ClientIdsExhausted,
            SessionError::Notifier(e) => e.error_code(),
        }
    }
}

/// Hands out client ids and seeds their initial notifications.
pub struct SessionLifecycle {
    /// Next id to issue; `None` once `u32::MAX` has been issued.
    next_id: Mutex<Option<u32>>,
    notifier: Arc<Notifier>,
}

impl SessionLifecycle {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self::starting_at(notifier, 0)
    }

    fn starting_at(notifier: Arc<Notifier>, first: u32) -> Self {
        Self {
            next_id: Mutex::new(Some(first)),
            notifier,
        }
    }

    /// Register a new client and queue its initial antenna status event.
    ///
    /// Ids are never reused; once exhausted every call fails.
    pub fn acquire_client_id(&self) -> Result<ClientId, SessionError> {
        let id = {
            let mut next = self.next_id.lock();
            let id = next.ok_or(SessionError::ClientIdsExhausted)?;
            // Register under the id lock so ids reach the notifier in order
            self.notifier.on_client_added(ClientId(id))?;
            *next = id.checked_add(1);
            ClientId(id)
        };

        self.notifier.signal(EventCategory::AntennaStatusChange)?;
        info!("Client {} acquired", id);
        Ok(id)
    }

    /// Raise synthetic frequency and play-state events so clients read the
    /// current state once.
    pub fn acquire_initial_state(&self) -> Result<(), SessionError> {
        self.notifier.signal(EventCategory::FrequencyChange)?;
        self.notifier.signal(EventCategory::PlayStateChange)?;
        Ok(())
    }

    /// Tear down a client whose session ended.
    pub fn release_client(&self, client: ClientId) -> Result<(), SessionError> {
        self.notifier.on_client_removed(client)?;
        info!("Client {} released", client);
        Ok(())
    }
}
