//! Main application configuration
//!
//! This module defines the configuration structures for the matchroom service,
//! loaded from a TOML file or from environment variables, plus validation.

use crate::error::MatchmakingError;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub matchmaking: MatchmakingSettings,
    pub game_server: GameServerSettings,
}

/// Service-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the HTTP status endpoints
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Lobby timing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingSettings {
    /// Seconds a lobby waits to fill before allocating with whoever joined
    pub allocation_timeout_seconds: u64,
    /// Seconds between allocation retries after the pool ran dry (0 disables)
    pub allocation_retry_seconds: u64,
    /// Seconds after which a finalized match is reclaimed
    pub max_match_duration_seconds: u64,
    /// Seconds between expiry sweeps
    pub sweep_interval_seconds: u64,
}

/// Game server endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameServerSettings {
    /// Host advertised to clients
    pub host: String,
    /// First port of the allocation pool
    pub port_range_start: u16,
    /// Last port of the allocation pool, inclusive
    pub port_range_end: u16,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "matchroom".to_string(),
            log_level: "info".to_string(),
            http_port: 10000,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            allocation_timeout_seconds: 60,
            allocation_retry_seconds: 5,
            max_match_duration_seconds: 3600, // 1 hour
            sweep_interval_seconds: 60,
        }
    }
}

impl Default for GameServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_range_start: 7778,
            port_range_end: 7779,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, environment-variable style
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Service settings
        if let Some(name) = lookup("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Some(log_level) = lookup("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Some(port) = lookup("PORT") {
            config.service.http_port = parse_value("PORT", &port)?;
        }
        if let Some(timeout) = lookup("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds =
                parse_value("SHUTDOWN_TIMEOUT_SECONDS", &timeout)?;
        }

        // Matchmaking settings
        if let Some(timeout) = lookup("MATCH_TIMEOUT_SECONDS") {
            config.matchmaking.allocation_timeout_seconds =
                parse_value("MATCH_TIMEOUT_SECONDS", &timeout)?;
        }
        if let Some(retry) = lookup("ALLOCATION_RETRY_SECONDS") {
            config.matchmaking.allocation_retry_seconds =
                parse_value("ALLOCATION_RETRY_SECONDS", &retry)?;
        }
        if let Some(duration) = lookup("MAX_MATCH_DURATION_SECONDS") {
            config.matchmaking.max_match_duration_seconds =
                parse_value("MAX_MATCH_DURATION_SECONDS", &duration)?;
        }
        if let Some(sweep) = lookup("SWEEP_INTERVAL_SECONDS") {
            config.matchmaking.sweep_interval_seconds =
                parse_value("SWEEP_INTERVAL_SECONDS", &sweep)?;
        }

        // Game server settings
        if let Some(host) = lookup("GAME_SERVER_HOST").or_else(|| lookup("GAME_SERVER_IP")) {
            config.game_server.host = host;
        }
        if let Some(start) = lookup("ALLOCATION_PORT_START") {
            config.game_server.port_range_start = parse_value("ALLOCATION_PORT_START", &start)?;
        }
        if let Some(end) = lookup("ALLOCATION_PORT_END") {
            config.game_server.port_range_end = parse_value("ALLOCATION_PORT_END", &end)?;
        }

        config.normalize();
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.normalize();
        validate_config(&config)?;
        Ok(config)
    }

    /// Clamp a port range whose end lies below its start
    pub fn normalize(&mut self) {
        let game_server = &mut self.game_server;
        if game_server.port_range_end < game_server.port_range_start {
            warn!(
                "ALLOCATION_PORT_END {} is below ALLOCATION_PORT_START {}, using a single port",
                game_server.port_range_end, game_server.port_range_start
            );
            game_server.port_range_end = game_server.port_range_start;
        }
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    pub fn allocation_timeout(&self) -> Duration {
        Duration::from_secs(self.matchmaking.allocation_timeout_seconds)
    }

    /// Retry delay after pool exhaustion, `None` when retries are disabled
    pub fn allocation_retry_interval(&self) -> Option<Duration> {
        match self.matchmaking.allocation_retry_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        }
    }

    pub fn max_match_duration(&self) -> Duration {
        Duration::from_secs(self.matchmaking.max_match_duration_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.matchmaking.sweep_interval_seconds)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {} value: {}", key, value))
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => {
            return Err(invalid(format!(
                "Invalid log level: {}",
                config.service.log_level
            )))
        }
    }

    if config.service.http_port == 0 {
        return Err(invalid("HTTP port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(invalid("Shutdown timeout must be greater than 0"));
    }

    // Validate matchmaking settings
    if config.matchmaking.allocation_timeout_seconds == 0 {
        return Err(invalid("Allocation timeout must be greater than 0"));
    }
    if config.matchmaking.max_match_duration_seconds == 0 {
        return Err(invalid("Max match duration must be greater than 0"));
    }
    if config.matchmaking.sweep_interval_seconds == 0 {
        return Err(invalid("Sweep interval must be greater than 0"));
    }

    // Validate game server settings
    if config.game_server.host.trim().is_empty() {
        return Err(invalid("Game server host cannot be empty"));
    }
    if config.game_server.port_range_start == 0 {
        return Err(invalid("Allocation port range cannot start at 0"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    MatchmakingError::ConfigurationError {
        message: message.into(),
    }
    .into()
}
