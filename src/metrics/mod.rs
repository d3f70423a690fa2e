//! Metrics and monitoring for the matchroom service
//!
//! This module provides Prometheus metrics collection and the HTTP server
//! exposing health, metrics and lobby status endpoints.

pub mod collector;
pub mod health;

pub use collector::{AllocationMetrics, ConnectionMetrics, LobbyMetrics, MetricsCollector};
pub use health::{HealthServer, HealthServerConfig};
