//! fmradio-service: Network bridge for an FM radio tuner.
//!
//! Remote clients connect over TCP to drive the tuner (power, seek, tune,
//! audio routing, signal quality) and to wait for antenna, frequency and
//! play-state change notifications.

use std::sync::Arc;

use clap::Parser;
use log::{error, info};

mod command_listener;
mod config;
mod dispatcher;
mod lifecycle;
mod logging;
mod notifier;
mod server;
mod tuner;

use command_listener::{initialize_tuner, CommandListener};
use config::{Args, ConfigFile, DriverKind, ServiceConfig, DRIVER_ENV};
use tuner::{SimulatedTuner, TunerDevice};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let file_config = match config::config_path(&args) {
        Some(path) => match config::load_config(&path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    let config = ServiceConfig::resolve(&args, file_config, std::env::var(DRIVER_ENV).ok())?;

    let _log_guard = logging::init_logging(&config.logging)?;

    info!("fmradio-service starting...");
    info!("  Listen address: {}", config.server.listen_addr);
    info!("  Max connections: {}", config.server.max_connections);
    info!("  Max calls per session: {}", config.server.max_calls_per_session);
    info!("  Driver: {:?}", config.tuner.driver);

    let (tuner, simulated): (Arc<dyn TunerDevice>, Option<Arc<SimulatedTuner>>) =
        match config.tuner.driver {
            DriverKind::Simulated => {
                let simulated = Arc::new(SimulatedTuner::new(config.tuner.stations.clone()));
                (simulated.clone(), Some(simulated))
            }
        };

    // The notifier must be subscribed before the first completion can fire
    let listener = Arc::new(CommandListener::new(Arc::clone(&tuner)));

    if let Err(e) = initialize_tuner(
        tuner.as_ref(),
        &config.tuner.region,
        config.tuner.initial_frequency,
    ) {
        error!("Failed to initialize tuner: {}", e);
        return Err(e.into());
    }

    if let (Some(simulated), Some(period)) = (simulated, config.tuner.antenna_toggle) {
        info!("Simulated antenna toggles every {:?}", period);
        tokio::spawn(simulated.toggle_antenna(period, listener.shutdown_token()));
    }

    let signal_listener = Arc::clone(&listener);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal_listener.shutdown();
    });

    listener.listen(config.server.clone()).await?;
    info!("fmradio-service stopped");
    Ok(())
}
