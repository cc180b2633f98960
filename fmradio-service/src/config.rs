//! Command line and configuration file handling.
//!
//! Settings are merged with the precedence: command line > environment
//! (driver only) > configuration file > built-in defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::server::ServerConfig;
use crate::tuner::RegionParams;

/// Configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fmradio-service.toml";
/// Environment variable naming the tuner driver.
pub const DRIVER_ENV: &str = "FMRADIO_DRIVER";

const DEFAULT_LISTEN: &str = "0.0.0.0:12345";
const DEFAULT_MAX_CONNECTIONS: usize = 64;
const DEFAULT_MAX_CALLS_PER_SESSION: usize = 16;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid listen address: {0}")]
    InvalidListenAddress(String),

    /// No driver given on the command line, in the environment or in the file.
    #[error("No tuner driver configured (use --driver, {} or [tuner] driver)", DRIVER_ENV)]
    DriverNotConfigured,

    #[error("Unsupported tuner driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid [tuner.region]: {0}")]
    InvalidRegion(String),
}

/// fmradio-service - Network bridge for an FM radio tuner
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on [default: 0.0.0.0:12345]
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Tuner driver to load
    #[arg(short, long)]
    pub driver: Option<String>,

    /// Maximum concurrent connections [default: 64]
    #[arg(short = 'c', long)]
    pub max_connections: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory where log files are stored [default: logs]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Number of days to keep log files [default: 7]
    #[arg(long)]
    pub log_retention_days: Option<u64>,
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tuner: TunerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub listen: Option<String>,
    pub max_connections: Option<usize>,
    /// Calls one connection may have in flight.
    pub max_calls_per_session: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TunerSection {
    pub driver: Option<String>,
    /// Frequency (kHz) tuned after power-up.
    pub initial_frequency: Option<u32>,
    /// Station list for the simulated driver (kHz).
    #[serde(default)]
    pub stations: Vec<u32>,
    #[serde(default)]
    pub region: RegionParams,
    /// Flip the simulated antenna every this many seconds. 0 or absent disables it.
    pub antenna_toggle_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

/// Known tuner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// In-memory tuner.
    Simulated,
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(DriverKind::Simulated),
            _ => Err(ConfigError::UnsupportedDriver(s.to_string())),
        }
    }
}

/// Logging settings after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub verbose: bool,
    pub level: Option<String>,
}

/// Tuner settings after merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunerConfig {
    pub driver: DriverKind,
    pub region: RegionParams,
    pub initial_frequency: Option<u32>,
    pub stations: Vec<u32>,
    pub antenna_toggle: Option<Duration>,
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub tuner: TunerConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Merge command line, environment and file settings.
    pub fn resolve(
        args: &Args,
        file: ConfigFile,
        env_driver: Option<String>,
    ) -> Result<Self, ConfigError> {
        let listen_addr = match (args.listen, file.server.listen.as_deref()) {
            (Some(addr), _) => addr,
            (None, Some(addr)) => parse_addr(addr)?,
            (None, None) => parse_addr(DEFAULT_LISTEN)?,
        };
        let max_connections = args
            .max_connections
            .or(file.server.max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let max_calls_per_session = file
            .server
            .max_calls_per_session
            .unwrap_or(DEFAULT_MAX_CALLS_PER_SESSION)
            .max(1);

        let driver = args
            .driver
            .clone()
            .or(env_driver.filter(|d| !d.trim().is_empty()))
            .or(file.tuner.driver)
            .ok_or(ConfigError::DriverNotConfigured)?;
        let driver = driver.parse::<DriverKind>()?;

        let region = file.tuner.region;
        region
            .validate()
            .map_err(|e| ConfigError::InvalidRegion(e.to_string()))?;

        let log_dir = args
            .log_dir
            .clone()
            .or_else(|| file.logging.log_dir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let retention_days = args
            .log_retention_days
            .or(file.logging.retention_days)
            .unwrap_or(DEFAULT_RETENTION_DAYS);

        Ok(Self {
            server: ServerConfig {
                listen_addr,
                max_connections,
                max_calls_per_session,
            },
            tuner: TunerConfig {
                driver,
                region,
                initial_frequency: file.tuner.initial_frequency,
                stations: file.tuner.stations,
                antenna_toggle: file
                    .tuner
                    .antenna_toggle_secs
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
            },
            logging: LoggingConfig {
                log_dir,
                retention_days,
                verbose: args.verbose,
                level: file.logging.level,
            },
        })
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|_| ConfigError::InvalidListenAddress(addr.to_string()))
}

/// Config file to use: explicit path > auto-detect > none.
pub fn config_path(args: &Args) -> Option<PathBuf> {
    args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    })
}

pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}
