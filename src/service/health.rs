//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the matchroom service,
//! including readiness and liveness probes. A drained port pool degrades the
//! service: lobbies keep forming but nothing can be allocated.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional detail when not healthy
    pub message: Option<String>,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Lobbies currently registered
    pub active_lobbies: usize,
    /// Lobbies still waiting for members or a server
    pub forming_lobbies: usize,
    /// Lobbies playing on a leased port
    pub finalized_lobbies: usize,
    /// Connections sitting in forming lobbies
    pub players_waiting: usize,
    /// Ports free to lease
    pub ports_available: usize,
    /// Ports currently leased
    pub ports_leased: usize,
    /// Seconds since the service state was created
    pub uptime_seconds: i64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(&app_state).await;
        if service_check.status != HealthStatus::Healthy {
            overall_status = HealthStatus::Unhealthy;
        }
        checks.push(service_check);

        let pool_check = Self::check_port_pool(&app_state);
        if pool_check.status == HealthStatus::Degraded && overall_status == HealthStatus::Healthy {
            overall_status = HealthStatus::Degraded;
        }
        checks.push(pool_check);

        let stats = Self::gather_service_stats(&app_state);

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - running, and degraded while no port can be leased
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_port_pool(&app_state).status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
        }
    }

    fn check_port_pool(app_state: &AppState) -> ComponentCheck {
        let pool = app_state.coordinator().allocator().stats();

        let (status, message) = if pool.available == 0 {
            (
                HealthStatus::Degraded,
                Some(format!(
                    "All {} game server ports ({}-{}) are leased",
                    pool.leased, pool.range_start, pool.range_end
                )),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        ComponentCheck {
            name: "port_pool".to_string(),
            status,
            message,
        }
    }

    fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let stats = app_state.coordinator().stats();

        ServiceStats {
            active_lobbies: stats.lobbies.active_lobbies,
            forming_lobbies: stats.lobbies.forming_lobbies,
            finalized_lobbies: stats.lobbies.finalized_lobbies,
            players_waiting: stats.lobbies.waiting_members,
            ports_available: stats.pool.available,
            ports_leased: stats.pool.leased,
            uptime_seconds: (chrono::Utc::now() - app_state.started_at()).num_seconds(),
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
