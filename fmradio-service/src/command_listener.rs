//! Composition root.
//!
//! [`CommandListener`] owns the notifier, the session lifecycle and the
//! command dispatcher for the lifetime of the process, and runs the TCP
//! server that routes remote calls into them.

use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;

use fmradio_protocol::{ClientId, EventCategory};

use crate::dispatcher::{CommandDispatcher, DispatchError};
use crate::lifecycle::{SessionError, SessionLifecycle};
use crate::notifier::{Notifier, NotifierError};
use crate::server::{Server, ServerConfig};
use crate::tuner::{RegionParams, TunerDevice, TunerError};

/// Bring the tuner into its serving state.
///
/// Each step returns only once the device has completed it.
pub fn initialize_tuner(
    tuner: &dyn TunerDevice,
    region: &RegionParams,
    initial_frequency: Option<u32>,
) -> Result<(), TunerError> {
    tuner.set_power(true)?;
    tuner.set_region_params(region)?;
    if let Some(frequency) = initial_frequency {
        tuner.set_frequency(frequency)?;
        info!("Tuned to initial frequency {} kHz", frequency);
    }
    Ok(())
}

/// Owns the notification and command services and the accept loop.
pub struct CommandListener {
    notifier: Arc<Notifier>,
    lifecycle: SessionLifecycle,
    dispatcher: CommandDispatcher,
    shutdown: CancellationToken,
}

impl CommandListener {
    /// Build the services around `tuner` and subscribe the notifier to its completions.
    pub fn new(tuner: Arc<dyn TunerDevice>) -> Self {
        let notifier = Arc::new(Notifier::new());
        tuner.subscribe(notifier.clone());

        Self {
            lifecycle: SessionLifecycle::new(Arc::clone(&notifier)),
            dispatcher: CommandDispatcher::new(tuner, Arc::clone(&notifier)),
            notifier,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Token cancelled when [`shutdown`](Self::shutdown) begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the listening socket without accepting yet.
    pub async fn bind(self: &Arc<Self>, config: ServerConfig) -> std::io::Result<Server> {
        Server::bind(config, Arc::clone(self)).await
    }

    /// Accept connections until shutdown and all sessions have finished.
    pub async fn listen(self: &Arc<Self>, config: ServerConfig) -> std::io::Result<()> {
        self.bind(config).await?.run().await
    }

    /// Stop accepting connections, then release every outstanding wait.
    ///
    /// Calling it again has no effect.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down command listener");
        self.shutdown.cancel();
        let cancelled = self.notifier.shutdown();
        info!("Command listener stopped ({} wait(s) cancelled)", cancelled);
    }

    pub fn acquire_client_id(&self) -> Result<ClientId, SessionError> {
        self.lifecycle.acquire_client_id()
    }

    pub fn acquire_initial_state(&self) -> Result<(), SessionError> {
        self.lifecycle.acquire_initial_state()
    }

    pub fn release_client(&self, client: ClientId) -> Result<(), SessionError> {
        self.lifecycle.release_client(client)
    }

    /// Suspend until `category` fires for `client`.
    pub async fn wait_for_event(
        &self,
        client: ClientId,
        category: EventCategory,
    ) -> Result<EventCategory, NotifierError> {
        self.notifier.wait(client, category).await
    }

    pub fn enable_radio(&self) -> Result<(), DispatchError> {
        self.dispatcher.enable_radio()
    }

    pub fn disable_radio(&self) -> Result<(), DispatchError> {
        self.dispatcher.disable_radio()
    }

    pub fn seek_forwards(&self) -> Result<(), DispatchError> {
        self.dispatcher.seek_forwards()
    }

    pub fn seek_backwards(&self) -> Result<(), DispatchError> {
        self.dispatcher.seek_backwards()
    }

    pub fn set_audio_endpoint(&self, endpoint: u32) -> Result<(), DispatchError> {
        self.dispatcher.set_audio_endpoint(endpoint)
    }

    pub fn set_frequency(&self, frequency: u32) -> Result<(), DispatchError> {
        self.dispatcher.set_frequency(frequency)
    }

    pub fn get_signal_quality(&self) -> Result<u32, DispatchError> {
        self.dispatcher.get_signal_quality()
    }
}
