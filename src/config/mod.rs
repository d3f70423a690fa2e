//! Configuration management for the matchroom service
//!
//! This module handles configuration loading from environment variables or a
//! TOML file, validation, and default values.

pub mod app;

// Re-export commonly used types
pub use app::{
    validate_config, AppConfig, GameServerSettings, MatchmakingSettings, ServiceSettings,
};
