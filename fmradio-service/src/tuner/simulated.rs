//! In-memory tuner backend.
//!
//! Behaves like a receiver on a fixed band with a known set of stations:
//! seek jumps between stations, quality falls off with the distance to the
//! nearest one, and completions are reported through the subscribed handler.
//! The antenna can be flipped periodically to stand in for a cable being
//! plugged and unplugged.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use fmradio_protocol::EventCategory;

use crate::notifier::registry;
use crate::tuner::{RegionParams, SeekDirection, TunerDevice, TunerError, TunerEventHandler};

/// Quality lost per raster step away from a station.
const QUALITY_STEP: u32 = 20;

#[derive(Debug)]
struct TunerState {
    powered: bool,
    region: RegionParams,
    frequency: u32,
    endpoint_id: u32,
    antenna_connected: bool,
    stations: Vec<u32>,
}

/// Simulated FM receiver.
pub struct SimulatedTuner {
    state: Mutex<TunerState>,
    handler: Mutex<Option<Arc<dyn TunerEventHandler>>>,
}

impl SimulatedTuner {
    /// Create a powered-off tuner on the default band with the given station list (kHz).
    pub fn new(mut stations: Vec<u32>) -> Self {
        stations.sort_unstable();
        stations.dedup();
        let region = RegionParams::default();
        Self {
            state: Mutex::new(TunerState {
                powered: false,
                region,
                frequency: region.frequency_min,
                endpoint_id: 0,
                antenna_connected: true,
                stations,
            }),
            handler: Mutex::new(None),
        }
    }

    /// Currently tuned frequency (kHz).
    pub fn frequency(&self) -> u32 {
        self.state.lock().frequency
    }

    pub fn is_powered(&self) -> bool {
        self.state.lock().powered
    }

    pub fn endpoint_id(&self) -> u32 {
        self.state.lock().endpoint_id
    }

    pub fn antenna_connected(&self) -> bool {
        self.state.lock().antenna_connected
    }

    /// Plug or unplug the antenna. Reports a completion when the state changes.
    pub fn set_antenna_connected(&self, connected: bool) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.antenna_connected != connected;
            state.antenna_connected = connected;
            changed
        };
        if changed {
            info!("[Tuner] Antenna {}", if connected { "connected" } else { "disconnected" });
            self.emit(EventCategory::AntennaStatusChange);
        }
    }

    /// Flip the antenna every `period` until `shutdown` is cancelled.
    pub async fn toggle_antenna(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticks.tick() => {
                    let connected = !self.antenna_connected();
                    self.set_antenna_connected(connected);
                }
            }
        }
        debug!("[Tuner] Antenna toggle stopped");
    }

    fn emit(&self, category: EventCategory) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler.on_tuner_event(registry::token_for(category));
        }
    }

    fn next_frequency(state: &TunerState, direction: SeekDirection) -> u32 {
        let region = &state.region;
        let in_band: Vec<u32> = state
            .stations
            .iter()
            .copied()
            .filter(|f| region.contains(*f))
            .collect();

        if in_band.is_empty() {
            return match direction {
                SeekDirection::Up if state.frequency >= region.frequency_max => region.frequency_min,
                SeekDirection::Up => state.frequency + region.frequency_spacing,
                SeekDirection::Down if state.frequency <= region.frequency_min => region.frequency_max,
                SeekDirection::Down => state.frequency - region.frequency_spacing,
            };
        }

        match direction {
            SeekDirection::Up => in_band
                .iter()
                .copied()
                .find(|f| *f > state.frequency)
                .unwrap_or(in_band[0]),
            SeekDirection::Down => in_band
                .iter()
                .rev()
                .copied()
                .find(|f| *f < state.frequency)
                .unwrap_or(in_band[in_band.len() - 1]),
        }
    }
}

impl TunerDevice for SimulatedTuner {
    fn set_power(&self, on: bool) -> Result<(), TunerError> {
        let mut state = self.state.lock();
        state.powered = on;
        info!("[Tuner] Power {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn seek(&self, direction: SeekDirection) -> Result<(), TunerError> {
        {
            let mut state = self.state.lock();
            if !state.powered {
                return Err(TunerError::PoweredOff);
            }
            let target = Self::next_frequency(&state, direction);
            debug!("[Tuner] Seek {:?}: {} -> {} kHz", direction, state.frequency, target);
            state.frequency = target;
        }
        self.emit(EventCategory::FrequencyChange);
        Ok(())
    }

    fn set_frequency(&self, frequency: u32) -> Result<(), TunerError> {
        {
            let mut state = self.state.lock();
            if !state.powered {
                return Err(TunerError::PoweredOff);
            }
            if !state.region.contains(frequency) {
                return Err(TunerError::InvalidFrequency(frequency));
            }
            state.frequency = frequency;
        }
        self.emit(EventCategory::FrequencyChange);
        Ok(())
    }

    fn signal_quality(&self) -> Result<u32, TunerError> {
        let state = self.state.lock();
        if !state.powered {
            return Err(TunerError::PoweredOff);
        }
        if !state.antenna_connected {
            return Ok(0);
        }
        let nearest = state
            .stations
            .iter()
            .map(|s| s.abs_diff(state.frequency))
            .min();
        Ok(match nearest {
            Some(distance) => {
                let steps = distance / state.region.frequency_spacing;
                100u32.saturating_sub(steps.saturating_mul(QUALITY_STEP))
            }
            None => 0,
        })
    }

    fn set_region_params(&self, params: &RegionParams) -> Result<(), TunerError> {
        params.validate()?;
        let mut state = self.state.lock();
        state.region = *params;
        if !params.contains(state.frequency) {
            state.frequency = params.frequency_min;
        }
        info!(
            "[Tuner] Region set: {}-{} kHz, spacing {} kHz, emphasis {:?}",
            params.frequency_min, params.frequency_max, params.frequency_spacing, params.emphasis
        );
        Ok(())
    }

    fn set_endpoint(&self, endpoint_id: u32) -> Result<(), TunerError> {
        self.state.lock().endpoint_id = endpoint_id;
        debug!("[Tuner] Audio endpoint set to {}", endpoint_id);
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn TunerEventHandler>) {
        *self.handler.lock() = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::registry::ContextToken;

    #[derive(Default)]
    struct Collector(Mutex<Vec<ContextToken>>);

    impl TunerEventHandler for Collector {
        fn on_tuner_event(&self, token: ContextToken) {
            self.0.lock().push(token);
        }
    }

    fn powered_tuner(stations: Vec<u32>) -> SimulatedTuner {
        let tuner = SimulatedTuner::new(stations);
        tuner.set_power(true).unwrap();
        tuner
    }

    #[test]
    fn test_seek_between_stations() {
        let tuner = powered_tuner(vec![104_300, 89_100, 95_800]);
        tuner.seek(SeekDirection::Up).unwrap();
        assert_eq!(tuner.frequency(), 89_100);
        tuner.seek(SeekDirection::Up).unwrap();
        assert_eq!(tuner.frequency(), 95_800);
        tuner.seek(SeekDirection::Down).unwrap();
        assert_eq!(tuner.frequency(), 89_100);
        // Wraps at the band edge
        tuner.seek(SeekDirection::Down).unwrap();
        assert_eq!(tuner.frequency(), 104_300);
    }

    #[test]
    fn test_seek_without_stations_steps_raster() {
        let tuner = powered_tuner(Vec::new());
        tuner.seek(SeekDirection::Up).unwrap();
        assert_eq!(tuner.frequency(), 87_550);
        tuner.seek(SeekDirection::Down).unwrap();
        tuner.seek(SeekDirection::Down).unwrap();
        assert_eq!(tuner.frequency(), 108_000);
    }

    #[test]
    fn test_powered_off_rejects_tuning() {
        let tuner = SimulatedTuner::new(vec![89_100]);
        assert_eq!(tuner.seek(SeekDirection::Up), Err(TunerError::PoweredOff));
        assert_eq!(tuner.set_frequency(89_100), Err(TunerError::PoweredOff));
        assert_eq!(tuner.signal_quality(), Err(TunerError::PoweredOff));
        assert!(tuner.set_endpoint(1).is_ok());
        assert_eq!(tuner.endpoint_id(), 1);
    }

    #[test]
    fn test_set_frequency_validates_band() {
        let tuner = powered_tuner(vec![89_100]);
        assert_eq!(tuner.set_frequency(120_000), Err(TunerError::InvalidFrequency(120_000)));
        assert_eq!(tuner.set_frequency(89_120), Err(TunerError::InvalidFrequency(89_120)));
        tuner.set_frequency(89_100).unwrap();
        assert_eq!(tuner.signal_quality(), Ok(100));
        tuner.set_frequency(89_200).unwrap();
        assert_eq!(tuner.signal_quality(), Ok(60));
    }

    #[test]
    fn test_antenna_affects_quality_and_reports() {
        let tuner = powered_tuner(vec![89_100]);
        let collector = Arc::new(Collector::default());
        tuner.subscribe(collector.clone());

        tuner.set_frequency(89_100).unwrap();
        tuner.set_antenna_connected(false);
        tuner.set_antenna_connected(false);
        assert_eq!(tuner.signal_quality(), Ok(0));

        let seen = collector.0.lock().clone();
        assert_eq!(
            seen,
            vec![
                registry::token_for(EventCategory::FrequencyChange),
                registry::token_for(EventCategory::AntennaStatusChange),
            ]
        );
    }

    #[tokio::test]
    async fn test_antenna_toggle_until_cancelled() {
        let tuner = Arc::new(powered_tuner(vec![89_100]));
        let collector = Arc::new(Collector::default());
        tuner.subscribe(collector.clone());
        let shutdown = CancellationToken::new();

        let toggling = tokio::spawn(
            Arc::clone(&tuner).toggle_antenna(Duration::from_millis(10), shutdown.clone()),
        );
        tokio::time::timeout(Duration::from_secs(5), async {
            while collector.0.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        toggling.await.unwrap();
        let seen = collector.0.lock().clone();
        assert!(seen
            .iter()
            .all(|t| *t == registry::token_for(EventCategory::AntennaStatusChange)));
        // Each flip is a real change, so the state follows the event count
        assert_eq!(tuner.antenna_connected(), seen.len() % 2 == 0);
    }

    #[test]
    fn test_region_change_reclamps_frequency() {
        let tuner = powered_tuner(Vec::new());
        tuner.set_frequency(100_000).unwrap();
        let japan = RegionParams {
            emphasis: crate::tuner::Emphasis::Usec50,
            frequency_min: 76_000,
            frequency_max: 95_000,
            frequency_spacing: 100,
        };
        tuner.set_region_params(&japan).unwrap();
        assert_eq!(tuner.frequency(), 76_000);
    }
}
