//! Configuration management for flowline-server
//!
//! Two tiers:
//! 1. **TOML bootstrap**: database path, port, logging — static for
//!    the life of the process.
//! 2. **Database runtime**: heartbeat, queue, bus, and reconnect
//!    parameters from the `settings` table, seeded with defaults on
//!    first run. Malformed values log a warning and fall back to the
//!    built-in default rather than failing startup.

use clap::Parser;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::{info, warn};

use flowline_common::{Error, Result};

use crate::db::settings::get_setting;
use crate::notify::{HubSettings, ReconnectPolicy};

/// Command-line arguments for flowline-server
#[derive(Parser, Debug, Default)]
#[command(name = "flowline-server")]
#[command(about = "Flow-reading validation workflow and alerting service")]
#[command(version)]
pub struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "FLOWLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "FLOWLINE_PORT")]
    pub port: Option<u16>,

    /// Path to SQLite database file (overrides config file)
    #[arg(short, long, env = "FLOWLINE_DATABASE")]
    pub database: Option<PathBuf>,
}

/// Bootstrap configuration loaded from a TOML file
///
/// Minimal by design: runtime behavior lives in the settings table.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            port: default_port(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (stderr when unset)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("flowline.db")
}

fn default_port() -> u16 {
    5750
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Load the bootstrap config.
    ///
    /// Search order: explicit path (CLI/env), `./flowline.toml`, the
    /// platform config dir. A missing file means pure defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(explicit: Option<&PathBuf>) -> Result<Self> {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from("flowline.toml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("flowline").join("flowline.toml"));
                }
                paths
            }
        };

        for path in &candidates {
            if path.exists() {
                let contents = std::fs::read_to_string(path)?;
                let config: TomlConfig = toml::from_str(&contents).map_err(|e| {
                    Error::Config(format!("failed to parse {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
        }

        if explicit.is_some() {
            // An explicitly named file that does not exist is an error;
            // the implicit search quietly falls back to defaults
            return Err(Error::Config(format!(
                "config file {} not found",
                candidates[0].display()
            )));
        }

        info!("No configuration file found, using defaults");
        Ok(TomlConfig::default())
    }
}

/// Runtime settings loaded from the database settings table
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_miss_limit: u32,
    pub session_queue_capacity: usize,
    pub event_bus_capacity: usize,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            heartbeat_miss_limit: 3,
            session_queue_capacity: 64,
            event_bus_capacity: 256,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl RuntimeSettings {
    /// Load runtime settings, falling back to defaults on missing or
    /// malformed values
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        async fn parsed<T: std::str::FromStr + Copy>(
            pool: &SqlitePool,
            key: &str,
            default: T,
        ) -> Result<T> {
            match get_setting(pool, key).await? {
                Some(raw) => match raw.parse() {
                    Ok(value) => Ok(value),
                    Err(_) => {
                        warn!(key, raw, "Malformed setting value, using default");
                        Ok(default)
                    }
                },
                None => Ok(default),
            }
        }

        let settings = Self {
            heartbeat_interval_secs: parsed(
                pool,
                "heartbeat_interval_secs",
                defaults.heartbeat_interval_secs,
            )
            .await?,
            heartbeat_miss_limit: parsed(
                pool,
                "heartbeat_miss_limit",
                defaults.heartbeat_miss_limit,
            )
            .await?,
            session_queue_capacity: parsed(
                pool,
                "session_queue_capacity",
                defaults.session_queue_capacity,
            )
            .await?,
            event_bus_capacity: parsed(pool, "event_bus_capacity", defaults.event_bus_capacity)
                .await?,
            reconnect_base_delay_ms: parsed(
                pool,
                "reconnect_base_delay_ms",
                defaults.reconnect_base_delay_ms,
            )
            .await?,
            reconnect_max_delay_ms: parsed(
                pool,
                "reconnect_max_delay_ms",
                defaults.reconnect_max_delay_ms,
            )
            .await?,
        };

        info!("Loaded runtime settings from database");
        Ok(settings)
    }

    /// Hub configuration derived from these settings
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            heartbeat_miss_limit: self.heartbeat_miss_limit,
            session_queue_capacity: self.session_queue_capacity,
            reconnect: ReconnectPolicy {
                base_delay_ms: self.reconnect_base_delay_ms,
                max_delay_ms: self.reconnect_max_delay_ms,
            },
        }
    }
}

/// Complete application configuration: bootstrap plus runtime
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub port: u16,
    pub logging: LoggingConfig,
    pub runtime: RuntimeSettings,
}

impl Config {
    /// Merge CLI arguments over the TOML bootstrap file
    pub fn bootstrap(args: &Args) -> Result<Self> {
        let toml_config = TomlConfig::load(args.config.as_ref())?;
        Ok(Self {
            database_path: args
                .database
                .clone()
                .unwrap_or(toml_config.database_path),
            port: args.port.unwrap_or(toml_config.port),
            logging: toml_config.logging,
            runtime: RuntimeSettings::default(),
        })
    }
}
