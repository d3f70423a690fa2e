//! Service layer for the matchroom service
//!
//! This module contains the main application state, service wiring,
//! and background task management for the production service.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthStatus};
