//! Tuner command dispatch.
//!
//! Each verb forwards to the [`TunerDevice`] and, where the hardware gives
//! no completion of its own, raises the matching notification once the call
//! returned successfully. Every verb fails with `NotRunning` once the
//! service has shut down, before the hardware is touched.

use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use fmradio_protocol::{AudioEndpoint, ErrorCode, EventCategory};

use crate::notifier::{Notifier, NotifierError};
use crate::tuner::{SeekDirection, TunerDevice, TunerError};

/// Command dispatch errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Tuner error: {0}")]
    Tuner(#[from] TunerError),

    #[error(transparent)]
    Notifier(#[from] NotifierError),

    /// Endpoint value outside the known set.
    #[error("Invalid audio endpoint: {0}")]
    InvalidEndpoint(u32),
}

impl DispatchError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::Tuner(TunerError::InvalidFrequency(_)) => ErrorCode::InvalidParameter,
            DispatchError::Tuner(_) => ErrorCode::HardwareFailure,
            DispatchError::Notifier(e) => e.error_code(),
            DispatchError::InvalidEndpoint(_) => ErrorCode::InvalidParameter,
        }
    }
}

/// Forwards tuner commands and raises the events they imply.
///
/// All methods block on the hardware; call them off the async executor.
pub struct CommandDispatcher {
    tuner: Arc<dyn TunerDevice>,
    notifier: Arc<Notifier>,
}

impl CommandDispatcher {
    pub fn new(tuner: Arc<dyn TunerDevice>, notifier: Arc<Notifier>) -> Self {
        Self { tuner, notifier }
    }

    pub fn enable_radio(&self) -> Result<(), DispatchError> {
        self.set_power(true)
    }

    pub fn disable_radio(&self) -> Result<(), DispatchError> {
        self.set_power(false)
    }

    fn set_power(&self, on: bool) -> Result<(), DispatchError> {
        self.notifier.ensure_running()?;
        self.tuner.set_power(on).map_err(|e| {
            warn!("[Dispatch] Power {} failed: {}", if on { "on" } else { "off" }, e);
            e
        })?;
        self.notifier.signal(EventCategory::PlayStateChange)?;
        Ok(())
    }

    /// Seek up. The frequency event comes from the tuner's own completion.
    pub fn seek_forwards(&self) -> Result<(), DispatchError> {
        self.notifier.ensure_running()?;
        self.tuner.seek(SeekDirection::Up)?;
        Ok(())
    }

    /// Seek down. The frequency event comes from the tuner's own completion.
    pub fn seek_backwards(&self) -> Result<(), DispatchError> {
        self.notifier.ensure_running()?;
        self.tuner.seek(SeekDirection::Down)?;
        Ok(())
    }

    /// Route audio to a raw endpoint value received from a client.
    pub fn set_audio_endpoint(&self, endpoint: u32) -> Result<(), DispatchError> {
        self.notifier.ensure_running()?;
        let endpoint =
            AudioEndpoint::try_from(endpoint).map_err(DispatchError::InvalidEndpoint)?;
        self.tuner.set_endpoint(endpoint.endpoint_id())?;
        debug!("[Dispatch] Audio routed to {:?}", endpoint);
        Ok(())
    }

    pub fn set_frequency(&self, frequency: u32) -> Result<(), DispatchError> {
        self.notifier.ensure_running()?;
        self.tuner.set_frequency(frequency)?;
        Ok(())
    }

    pub fn get_signal_quality(&self) -> Result<u32, DispatchError> {
        self.notifier.ensure_running()?;
        Ok(self.tuner.signal_quality()?)
    }
}
