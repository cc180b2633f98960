//! Tuner hardware control facade.
//!
//! This module provides:
//! - [`TunerDevice`]: Blocking control surface of the FM tuner
//! - [`TunerEventHandler`]: Observer for asynchronous hardware completions
//! - [`RegionParams`]: Band limits and de-emphasis applied at startup
//! - [`SimulatedTuner`]: In-memory backend used when no vendor driver is wired in

pub mod simulated;

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::notifier::registry::ContextToken;

pub use simulated::SimulatedTuner;

/// Tuner-related errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TunerError {
    /// The tuner is powered off.
    #[error("Tuner is powered off")]
    PoweredOff,

    /// Frequency outside the configured band or off the spacing grid.
    #[error("Invalid frequency: {0} kHz")]
    InvalidFrequency(u32),

    /// Region parameters are inconsistent.
    #[error("Invalid region parameters: {0}")]
    InvalidRegion(String),

    /// The device or driver reported a failure.
    #[error("Device error: {0}")]
    Device(String),
}

/// FM de-emphasis time constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Emphasis {
    #[serde(rename = "50us")]
    Usec50,
    #[serde(rename = "75us")]
    Usec75,
}

/// Band plan programmed into the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegionParams {
    pub emphasis: Emphasis,
    /// Lowest tunable frequency (kHz).
    pub frequency_min: u32,
    /// Highest tunable frequency (kHz).
    pub frequency_max: u32,
    /// Channel raster (kHz).
    pub frequency_spacing: u32,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            emphasis: Emphasis::Usec75,
            frequency_min: 87_500,
            frequency_max: 108_000,
            frequency_spacing: 50,
        }
    }
}

impl RegionParams {
    /// Check that the band is non-empty and lies on its own raster.
    pub fn validate(&self) -> Result<(), TunerError> {
        if self.frequency_spacing == 0 {
            return Err(TunerError::InvalidRegion("spacing must be non-zero".to_string()));
        }
        if self.frequency_min >= self.frequency_max {
            return Err(TunerError::InvalidRegion(format!(
                "frequency_min {} must be below frequency_max {}",
                self.frequency_min, self.frequency_max
            )));
        }
        if (self.frequency_max - self.frequency_min) % self.frequency_spacing != 0 {
            return Err(TunerError::InvalidRegion(
                "band width is not a multiple of the spacing".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `frequency` is inside the band and on the raster.
    pub fn contains(&self, frequency: u32) -> bool {
        frequency >= self.frequency_min
            && frequency <= self.frequency_max
            && (frequency - self.frequency_min) % self.frequency_spacing == 0
    }
}

/// Seek direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    Up,
    Down,
}

/// Receives asynchronous completions from the tuner.
///
/// Implementations must not call back into the tuner.
pub trait TunerEventHandler: Send + Sync {
    fn on_tuner_event(&self, token: ContextToken);
}

/// Blocking control surface of an FM tuner.
///
/// Implementations serialize their own hardware access.
pub trait TunerDevice: Send + Sync {
    /// Switch the receiver on or off. Returns once the transition completed.
    fn set_power(&self, on: bool) -> Result<(), TunerError>;

    /// Seek to the next station in `direction`.
    fn seek(&self, direction: SeekDirection) -> Result<(), TunerError>;

    /// Tune to `frequency` (kHz).
    fn set_frequency(&self, frequency: u32) -> Result<(), TunerError>;

    /// Current signal quality, 0..=100.
    fn signal_quality(&self) -> Result<u32, TunerError>;

    /// Program the band plan.
    fn set_region_params(&self, params: &RegionParams) -> Result<(), TunerError>;

    /// Route audio to the backend endpoint id.
    fn set_endpoint(&self, endpoint_id: u32) -> Result<(), TunerError>;

    /// Register the handler for asynchronous completions, replacing any previous one.
    fn subscribe(&self, handler: Arc<dyn TunerEventHandler>);
}

#[cfg(test)]
pub mod testing {
    //! Recording tuner for unit tests.

    use parking_lot::{Condvar, Mutex};

    use super::*;

    /// A call observed by [`RecordingTuner`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TunerCall {
        SetPower(bool),
        Seek(SeekDirection),
        SetFrequency(u32),
        SignalQuality,
        SetRegionParams(RegionParams),
        SetEndpoint(u32),
    }

    /// Records every call and optionally fails them.
    #[derive(Default)]
    pub struct RecordingTuner {
        calls: Mutex<Vec<TunerCall>>,
        fail_with: Mutex<Option<TunerError>>,
        handler: Mutex<Option<Arc<dyn TunerEventHandler>>>,
        quality: Mutex<u32>,
        held: Mutex<bool>,
        released: Condvar,
    }

    impl RecordingTuner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<TunerCall> {
            self.calls.lock().clone()
        }

        pub fn fail_next(&self, error: TunerError) {
            *self.fail_with.lock() = Some(error);
        }

        pub fn set_quality(&self, quality: u32) {
            *self.quality.lock() = quality;
        }

        /// Block `signal_quality` callers until [`release`](Self::release).
        pub fn hold(&self) {
            *self.held.lock() = true;
        }

        pub fn release(&self) {
            *self.held.lock() = false;
            self.released.notify_all();
        }

        pub fn has_handler(&self) -> bool {
            self.handler.lock().is_some()
        }

        /// Fire a completion through the registered handler.
        pub fn emit(&self, token: ContextToken) {
            let handler = self.handler.lock().clone();
            if let Some(handler) = handler {
                handler.on_tuner_event(token);
            }
        }

        fn record(&self, call: TunerCall) -> Result<(), TunerError> {
            self.calls.lock().push(call);
            match self.fail_with.lock().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    impl TunerDevice for RecordingTuner {
        fn set_power(&self, on: bool) -> Result<(), TunerError> {
            self.record(TunerCall::SetPower(on))
        }

        fn seek(&self, direction: SeekDirection) -> Result<(), TunerError> {
            self.record(TunerCall::Seek(direction))
        }

        fn set_frequency(&self, frequency: u32) -> Result<(), TunerError> {
            self.record(TunerCall::SetFrequency(frequency))
        }

        fn signal_quality(&self) -> Result<u32, TunerError> {
            let mut held = self.held.lock();
            while *held {
                self.released.wait(&mut held);
            }
            drop(held);
            self.record(TunerCall::SignalQuality)?;
            Ok(*self.quality.lock())
        }

        fn set_region_params(&self, params: &RegionParams) -> Result<(), TunerError> {
            self.record(TunerCall::SetRegionParams(*params))
        }

        fn set_endpoint(&self, endpoint_id: u32) -> Result<(), TunerError> {
            self.record(TunerCall::SetEndpoint(endpoint_id))
        }

        fn subscribe(&self, handler: Arc<dyn TunerEventHandler>) {
            *self.handler.lock() = Some(handler);
        }
    }
}
