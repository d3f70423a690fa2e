//! Main application state and service coordination
//!
//! This module contains the production AppState that builds the matchmaking
//! components from configuration and owns the background tasks.

use crate::allocator::PortAllocator;
use crate::config::AppConfig;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::session::{CoordinatorSettings, DispatchSink, SessionCoordinator, TokioScheduler};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Lobby and allocation operations
    coordinator: SessionCoordinator,

    metrics_collector: Arc<MetricsCollector>,

    /// HTTP status server, present while started
    health_server: Mutex<Option<Arc<HealthServer>>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: RwLock<bool>,

    started_at: DateTime<Utc>,
}

impl AppState {
    /// Build every component from configuration. Must run inside a tokio
    /// runtime, which drives the allocation timers.
    pub async fn new(config: AppConfig, sink: Arc<dyn DispatchSink>) -> Result<Self, ServiceError> {
        info!("Initializing matchroom service");
        info!(
            "Configuration: service={}, game_server={}, ports={}-{}",
            config.service.name,
            config.game_server.host,
            config.game_server.port_range_start,
            config.game_server.port_range_end
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let scheduler = TokioScheduler::current().map_err(|e| ServiceError::Initialization {
            message: format!("Failed to create allocation scheduler: {}", e),
        })?;

        let allocator = Arc::new(PortAllocator::new(
            config.game_server.port_range_start,
            config.game_server.port_range_end,
        ));

        let coordinator = SessionCoordinator::new(
            CoordinatorSettings::from(&config),
            allocator,
            Arc::new(scheduler),
            sink,
            metrics_collector.clone(),
        );

        Ok(Self {
            config,
            coordinator,
            metrics_collector,
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: RwLock::new(false),
            started_at: Utc::now(),
        })
    }

    /// Start the HTTP status server and the match expiry sweep
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting matchroom service");

        if self.is_running().await {
            return Err(ServiceError::Initialization {
                message: "Service is already running".to_string(),
            });
        }

        self.set_running(true).await;

        self.start_health_server().await?;
        self.start_background_tasks().await;

        info!("Matchroom service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of matchroom service");

        self.set_running(false).await;

        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            }
        }

        self.stop_background_tasks().await;

        let final_stats = self.coordinator.stats();
        if final_stats.pool.leased > 0 {
            warn!(
                "Shutting down with {} game server ports still leased",
                final_stats.pool.leased
            );
        }

        info!("Final service statistics: {:?}", final_stats);
        info!("Matchroom service shutdown completed");

        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub(crate) async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    async fn start_health_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.http_port;
        info!("Starting health and status endpoints on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );

        let task = {
            let server = server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Health server failed: {}", e);
                } else {
                    info!("Health server task completed");
                }
            })
        };

        *self.health_server.lock().await = Some(server);
        self.background_tasks.lock().await.push(task);
        Ok(())
    }

    async fn start_background_tasks(&self) {
        let sweep_interval = self.config.sweep_interval();
        info!(
            "Starting match expiry sweep ({}s interval, {}s max match duration)...",
            sweep_interval.as_secs(),
            self.config.matchmaking.max_match_duration_seconds
        );

        let sweep_task = self.coordinator.start_expiry_sweep(sweep_interval);
        self.background_tasks.lock().await.push(sweep_task);
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("All {} background tasks stopped", task_count);
    }
}
