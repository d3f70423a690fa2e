//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the matchroom service using
//! Prometheus metrics.

use crate::types::AllocationTrigger;
use anyhow::Result;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Lobby-related metrics
    lobby_metrics: LobbyMetrics,

    /// Port pool and allocation metrics
    allocation_metrics: AllocationMetrics,

    /// Connection-related metrics
    connection_metrics: ConnectionMetrics,
}

/// Lobby-related metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Number of registered lobbies
    pub active_lobbies: IntGauge,

    /// Total lobbies created
    pub lobbies_created_total: IntCounter,

    /// Total lobbies removed, by reason (emptied, completed, expired)
    pub lobbies_removed_total: IntCounterVec,

    /// Join attempts by result (joined, rejected)
    pub joins_total: IntCounterVec,
}

/// Port pool and allocation metrics
#[derive(Clone)]
pub struct AllocationMetrics {
    /// Allocation attempts by outcome (allocated, exhausted, lost_race)
    pub allocations_total: IntCounterVec,

    /// Ports currently leased
    pub leased_ports: IntGauge,

    /// Time from lobby creation to allocation, by trigger
    pub time_to_allocation_seconds: HistogramVec,
}

/// Connection-related metrics
#[derive(Clone)]
pub struct ConnectionMetrics {
    /// Clients currently connected
    pub connected_clients: IntGauge,

    /// Total connections seen
    pub connections_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let allocation_metrics = AllocationMetrics::new(&registry)?;
        let connection_metrics = ConnectionMetrics::new(&registry)?;

        Ok(Self {
            registry,
            lobby_metrics,
            allocation_metrics,
            connection_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    pub fn allocation(&self) -> &AllocationMetrics {
        &self.allocation_metrics
    }

    pub fn connection(&self) -> &ConnectionMetrics {
        &self.connection_metrics
    }

    /// Record a lobby being created
    pub fn record_lobby_created(&self) {
        self.lobby_metrics.lobbies_created_total.inc();
        self.lobby_metrics.active_lobbies.inc();
    }

    /// Record a lobby leaving the registry
    pub fn record_lobby_removed(&self, reason: &str) {
        self.lobby_metrics
            .lobbies_removed_total
            .with_label_values(&[reason])
            .inc();
        self.lobby_metrics.active_lobbies.dec();
    }

    /// Record the result of a join attempt
    pub fn record_join(&self, accepted: bool) {
        let result = if accepted { "joined" } else { "rejected" };
        self.lobby_metrics
            .joins_total
            .with_label_values(&[result])
            .inc();
    }

    /// Record a lobby receiving its endpoint
    pub fn record_allocation(&self, trigger: AllocationTrigger, since_creation: Duration) {
        self.allocation_metrics
            .allocations_total
            .with_label_values(&["allocated"])
            .inc();
        self.allocation_metrics
            .time_to_allocation_seconds
            .with_label_values(&[trigger.as_str()])
            .observe(since_creation.as_secs_f64());
    }

    /// Record an attempt that found the pool empty
    pub fn record_pool_exhausted(&self) {
        self.allocation_metrics
            .allocations_total
            .with_label_values(&["exhausted"])
            .inc();
    }

    /// Record an attempt that leased a port but lost the finalize race
    pub fn record_finalize_lost(&self) {
        self.allocation_metrics
            .allocations_total
            .with_label_values(&["lost_race"])
            .inc();
    }

    pub fn set_leased_ports(&self, leased: usize) {
        self.allocation_metrics.leased_ports.set(leased as i64);
    }

    pub fn record_connected(&self) {
        self.connection_metrics.connections_total.inc();
        self.connection_metrics.connected_clients.inc();
    }

    pub fn record_disconnected(&self) {
        self.connection_metrics.connected_clients.dec();
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_lobbies =
            IntGauge::new("matchroom_active_lobbies", "Number of registered lobbies")?;
        registry.register(Box::new(active_lobbies.clone()))?;

        let lobbies_created_total =
            IntCounter::new("matchroom_lobbies_created_total", "Total lobbies created")?;
        registry.register(Box::new(lobbies_created_total.clone()))?;

        let lobbies_removed_total = IntCounterVec::new(
            Opts::new("matchroom_lobbies_removed_total", "Total lobbies removed"),
            &["reason"],
        )?;
        registry.register(Box::new(lobbies_removed_total.clone()))?;

        let joins_total = IntCounterVec::new(
            Opts::new("matchroom_joins_total", "Lobby join attempts"),
            &["result"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        Ok(Self {
            active_lobbies,
            lobbies_created_total,
            lobbies_removed_total,
            joins_total,
        })
    }
}

impl AllocationMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let allocations_total = IntCounterVec::new(
            Opts::new(
                "matchroom_allocations_total",
                "Game server allocation attempts",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(allocations_total.clone()))?;

        let leased_ports =
            IntGauge::new("matchroom_leased_ports", "Game server ports currently leased")?;
        registry.register(Box::new(leased_ports.clone()))?;

        let time_to_allocation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "matchroom_time_to_allocation_seconds",
                "Time from lobby creation to endpoint allocation",
            )
            .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["trigger"],
        )?;
        registry.register(Box::new(time_to_allocation_seconds.clone()))?;

        Ok(Self {
            allocations_total,
            leased_ports,
            time_to_allocation_seconds,
        })
    }
}

impl ConnectionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let connected_clients =
            IntGauge::new("matchroom_connected_clients", "Clients currently connected")?;
        registry.register(Box::new(connected_clients.clone()))?;

        let connections_total =
            IntCounter::new("matchroom_connections_total", "Total client connections")?;
        registry.register(Box::new(connections_total.clone()))?;

        Ok(Self {
            connected_clients,
            connections_total,
        })
    }
}
