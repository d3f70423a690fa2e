//! Session coordinator driving lobby membership and game-server allocation
//!
//! This is the operation surface a real-time connection layer calls into.
//! Every operation returns the dispatches it produced so the transport can
//! push them; timer-driven work delivers through the configured sink.

use crate::allocator::{PoolStats, PortAllocator};
use crate::config::AppConfig;
use crate::error::{MatchmakingError, Result};
use crate::lobby::instance::Lobby;
use crate::lobby::registry::{LobbyRegistry, RegistryStats};
use crate::metrics::MetricsCollector;
use crate::session::dispatch::{Dispatch, DispatchSink};
use crate::session::scheduler::{AllocationJob, AllocationScheduler, TimerHandle};
use crate::types::{
    AllocationTrigger, LobbyEvent, LobbyId, LobbyStatus, MatchAllocated, MatchStatus,
    MatchmakingResult,
};
use crate::utils::lobby_group_name;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Message pushed to a lobby when the port pool has nothing to lease
pub const POOL_EXHAUSTED_MESSAGE: &str = "No available game server ports";

/// Tunables for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// How long a lobby that never fills waits before allocating anyway
    pub allocation_timeout: Duration,
    /// Delay before retrying after the pool was exhausted. With `None` the next
    /// join retries instead, and a lobby that is already full retries once the
    /// allocation timeout passes again.
    pub retry_interval: Option<Duration>,
    /// Age after which a finalized match is considered over
    pub max_match_duration: Duration,
    /// Host handed to clients together with the leased port
    pub game_server_host: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            allocation_timeout: Duration::from_secs(60),
            retry_interval: Some(Duration::from_secs(5)),
            max_match_duration: Duration::from_secs(3600),
            game_server_host: "127.0.0.1".to_string(),
        }
    }
}

impl From<&AppConfig> for CoordinatorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            allocation_timeout: config.allocation_timeout(),
            retry_interval: config.allocation_retry_interval(),
            max_match_duration: config.max_match_duration(),
            game_server_host: config.game_server.host.clone(),
        }
    }
}

/// Reply to a successful FindOrCreateLobby plus the pushes it caused
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub result: MatchmakingResult,
    pub dispatches: Vec<Dispatch>,
}

/// Combined registry and pool counters
#[derive(Debug, Clone, Serialize)]
pub struct MatchmakingStats {
    pub lobbies: RegistryStats,
    pub pool: PoolStats,
}

/// Orchestrates matching and allocation for one service instance
#[derive(Clone)]
pub struct SessionCoordinator {
    settings: CoordinatorSettings,
    registry: Arc<LobbyRegistry>,
    allocator: Arc<PortAllocator>,
    scheduler: Arc<dyn AllocationScheduler>,
    sink: Arc<dyn DispatchSink>,
    metrics: Arc<MetricsCollector>,
}

impl SessionCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        allocator: Arc<PortAllocator>,
        scheduler: Arc<dyn AllocationScheduler>,
        sink: Arc<dyn DispatchSink>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            settings,
            registry: Arc::new(LobbyRegistry::new()),
            allocator,
            scheduler,
            sink,
            metrics,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &LobbyRegistry {
        &self.registry
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn stats(&self) -> MatchmakingStats {
        MatchmakingStats {
            lobbies: self.registry.stats(),
            pool: self.allocator.stats(),
        }
    }

    /// A client connected; nothing changes until it asks for a lobby
    pub fn on_connect(&self, connection_id: &str) {
        info!("Client connected: {}", connection_id);
        self.metrics.record_connected();
    }

    /// A client went away. Drops it from whichever forming lobby it was in.
    pub fn on_disconnect(&self, connection_id: &str) -> Vec<Dispatch> {
        info!("Client disconnected: {}", connection_id);
        self.metrics.record_disconnected();

        let (lobby, remaining) = match self.registry.remove_member_everywhere(connection_id) {
            Some(found) => found,
            None => return Vec::new(),
        };

        info!("Removed {} from lobby {}", connection_id, lobby.id());
        let mut dispatches = vec![Dispatch::Unsubscribe {
            connection_id: connection_id.to_string(),
            group: lobby_group_name(lobby.id()),
        }];

        if remaining == 0 {
            // The registry already dropped the emptied lobby
            lobby.cancel_allocation_timer();
            self.release_endpoint(&lobby);
            self.metrics.record_lobby_removed("emptied");
        } else {
            dispatches.push(status_broadcast(&lobby));
        }

        dispatches
    }

    /// Place a connection into an open lobby, creating one when none exists.
    /// A lobby that fills up is allocated immediately.
    pub fn find_or_create_lobby(
        &self,
        connection_id: &str,
        max_players: usize,
    ) -> Result<JoinOutcome> {
        info!(
            "{} requested FindOrCreateLobby (maxPlayers: {})",
            connection_id, max_players
        );

        if max_players == 0 {
            return Err(MatchmakingError::InvalidRequest {
                reason: "maxPlayers must be at least 1".to_string(),
            }
            .into());
        }

        let lobby = match self.registry.find_available() {
            Some(lobby) => lobby,
            None => {
                let lobby = self.registry.create(max_players);
                self.metrics.record_lobby_created();
                self.arm_allocation_timer(&lobby);
                lobby
            }
        };

        let (accepted, remaining) = lobby.try_add_member(connection_id);
        self.metrics.record_join(accepted);

        if !accepted {
            warn!("Failed to add {} to lobby {}", connection_id, lobby.id());
            return Err(MatchmakingError::JoinFailed {
                lobby_id: lobby.id(),
            }
            .into());
        }

        info!(
            "{} joined lobby {} ({}/{})",
            connection_id,
            lobby.id(),
            lobby.max_players() - remaining,
            lobby.max_players()
        );

        let mut dispatches = vec![
            Dispatch::Subscribe {
                connection_id: connection_id.to_string(),
                group: lobby_group_name(lobby.id()),
            },
            status_broadcast(&lobby),
        ];

        if remaining == 0 {
            dispatches.extend(self.attempt_allocation(&lobby, AllocationTrigger::Full));
        } else if lobby.elapsed() >= self.settings.allocation_timeout {
            // Timer already fired without finding a free port
            dispatches.extend(self.attempt_allocation(&lobby, AllocationTrigger::Timeout));
        }

        let result = match lobby.endpoint() {
            Some(endpoint) => MatchmakingResult {
                lobby_id: lobby.id(),
                status: MatchStatus::Allocated,
                endpoint: Some(endpoint),
            },
            None => MatchmakingResult {
                lobby_id: lobby.id(),
                status: MatchStatus::Pending,
                endpoint: None,
            },
        };

        Ok(JoinOutcome { result, dispatches })
    }

    pub fn get_lobby_status(&self, lobby_id: LobbyId) -> Result<LobbyStatus> {
        self.registry
            .get(lobby_id)
            .map(|lobby| lobby.status())
            .ok_or_else(|| MatchmakingError::LobbyNotFound { lobby_id }.into())
    }

    /// Take a connection out of a forming lobby. Unknown and finalized lobbies
    /// are ignored.
    pub fn leave_lobby(&self, connection_id: &str, lobby_id: LobbyId) -> Vec<Dispatch> {
        info!("{} requested LeaveLobby ({})", connection_id, lobby_id);

        let lobby = match self.registry.get(lobby_id) {
            Some(lobby) => lobby,
            None => {
                debug!("Ignoring leave of unknown lobby {}", lobby_id);
                return Vec::new();
            }
        };

        if lobby.is_finalized() {
            debug!("Ignoring leave of finalized lobby {}", lobby_id);
            return Vec::new();
        }

        let (removed, remaining) = lobby.try_remove_member(connection_id);
        if !removed {
            return Vec::new();
        }

        let mut dispatches = vec![Dispatch::Unsubscribe {
            connection_id: connection_id.to_string(),
            group: lobby_group_name(lobby_id),
        }];

        if remaining == 0 {
            lobby.cancel_allocation_timer();
            self.release_endpoint(&lobby);
            if self.registry.remove(lobby_id) {
                self.metrics.record_lobby_removed("emptied");
            }
        }

        dispatches.push(status_broadcast(&lobby));
        dispatches
    }

    /// The match on a finalized lobby ended: give its port back and forget it
    pub fn complete_match(&self, lobby_id: LobbyId) -> Vec<Dispatch> {
        info!("Completing match for lobby {}", lobby_id);

        match self.registry.get(lobby_id) {
            Some(lobby) if lobby.is_finalized() => self.teardown_finalized(&lobby, "completed"),
            _ => {
                debug!("Lobby {} has no allocated match to complete", lobby_id);
                Vec::new()
            }
        }
    }

    /// Entry point for an expired allocation timer
    pub async fn handle_allocation_timer(&self, lobby_id: LobbyId, trigger: AllocationTrigger) {
        let lobby = match self.registry.get(lobby_id) {
            Some(lobby) => lobby,
            None => {
                debug!("Allocation timer fired for removed lobby {}", lobby_id);
                return;
            }
        };

        let dispatches = self.attempt_allocation(&lobby, trigger);
        self.deliver(dispatches).await;
    }

    /// Complete every finalized match older than the configured maximum
    /// duration. Returns how many were reclaimed.
    pub async fn sweep_expired_matches(&self) -> usize {
        let mut dispatches = Vec::new();
        let mut reclaimed = 0;

        for lobby in self.registry.snapshot() {
            let expired = lobby
                .finalized_at()
                .map(|at| at.elapsed() >= self.settings.max_match_duration)
                .unwrap_or(false);

            if expired {
                let torn_down = self.teardown_finalized(&lobby, "expired");
                if !torn_down.is_empty() {
                    warn!(
                        "Lobby {} exceeded the maximum match duration, reclaiming its port",
                        lobby.id()
                    );
                    reclaimed += 1;
                    dispatches.extend(torn_down);
                }
            }
        }

        self.deliver(dispatches).await;
        reclaimed
    }

    /// Run the expiry sweep periodically on the current runtime
    pub fn start_expiry_sweep(&self, every: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();

        let handle = tokio::spawn(async move {
            let mut sweep_interval = tokio::time::interval(every);

            loop {
                sweep_interval.tick().await;

                let reclaimed = coordinator.sweep_expired_matches().await;
                if reclaimed > 0 {
                    info!("Expiry sweep reclaimed {} matches", reclaimed);
                }
            }
        });

        info!("Started match expiry sweep every {:?}", every);
        handle
    }

    /// Shared by the full, timeout and retry triggers
    fn attempt_allocation(&self, lobby: &Arc<Lobby>, trigger: AllocationTrigger) -> Vec<Dispatch> {
        if lobby.is_finalized() || lobby.is_empty() {
            return Vec::new();
        }

        if !lobby.is_full() && lobby.elapsed() < self.settings.allocation_timeout {
            debug!(
                "Lobby {} not full and timeout not reached ({:?} elapsed)",
                lobby.id(),
                lobby.elapsed()
            );
            return Vec::new();
        }

        if !lobby.try_begin_allocation() {
            debug!(
                "Allocation for lobby {} already in flight or no longer possible",
                lobby.id()
            );
            return Vec::new();
        }

        let group = lobby_group_name(lobby.id());

        let port = match self.allocator.try_allocate() {
            Some(port) => port,
            None => {
                lobby.abort_allocation();
                self.metrics.record_pool_exhausted();
                warn!(
                    "No game server ports available for lobby {} ({} trigger)",
                    lobby.id(),
                    trigger
                );
                self.schedule_retry(lobby);

                return vec![Dispatch::Broadcast {
                    group,
                    event: LobbyEvent::MatchmakingError {
                        message: POOL_EXHAUSTED_MESSAGE.to_string(),
                    },
                }];
            }
        };

        if !lobby.try_finalize(&self.settings.game_server_host, port) {
            self.allocator.release(port);
            lobby.abort_allocation();
            self.metrics.record_finalize_lost();
            debug!(
                "Lobby {} was finalized or closed concurrently, returned port {}",
                lobby.id(),
                port
            );
            return Vec::new();
        }

        lobby.cancel_allocation_timer();
        self.metrics.record_allocation(trigger, lobby.elapsed());
        self.metrics.set_leased_ports(self.allocator.leased_count());

        info!(
            "Allocated game server {}:{} for lobby {} ({} members, {} trigger)",
            self.settings.game_server_host,
            port,
            lobby.id(),
            lobby.member_count(),
            trigger
        );

        vec![Dispatch::Broadcast {
            group,
            event: LobbyEvent::MatchAllocated(MatchAllocated {
                lobby_id: lobby.id(),
                host: self.settings.game_server_host.clone(),
                port,
            }),
        }]
    }

    fn arm_allocation_timer(&self, lobby: &Arc<Lobby>) {
        let handle = self.schedule_allocation(
            lobby.id(),
            self.settings.allocation_timeout,
            AllocationTrigger::Timeout,
        );

        if !lobby.try_arm_allocation_timer(handle) {
            debug!("Allocation timer for lobby {} already armed", lobby.id());
        }
    }

    fn schedule_retry(&self, lobby: &Arc<Lobby>) {
        let interval = match self.settings.retry_interval {
            Some(interval) => interval,
            // A full lobby takes no more joins, so nothing else would retry it
            None if lobby.is_full() => self.settings.allocation_timeout,
            None => return,
        };

        let handle = self.schedule_allocation(lobby.id(), interval, AllocationTrigger::Retry);
        if lobby.replace_allocation_timer(handle) {
            debug!("Retrying allocation for lobby {} in {:?}", lobby.id(), interval);
        }
    }

    fn schedule_allocation(
        &self,
        lobby_id: LobbyId,
        delay: Duration,
        trigger: AllocationTrigger,
    ) -> TimerHandle {
        let coordinator = self.clone();
        let job: AllocationJob = Box::pin(async move {
            coordinator.handle_allocation_timer(lobby_id, trigger).await;
        });

        self.scheduler.schedule(delay, job)
    }

    /// Deregister a finalized lobby and return its port. Only the caller that
    /// actually removes the lobby releases the port.
    fn teardown_finalized(&self, lobby: &Arc<Lobby>, reason: &str) -> Vec<Dispatch> {
        if !self.registry.remove(lobby.id()) {
            return Vec::new();
        }

        self.release_endpoint(lobby);
        self.metrics.record_lobby_removed(reason);

        vec![Dispatch::Disband {
            group: lobby_group_name(lobby.id()),
        }]
    }

    fn release_endpoint(&self, lobby: &Lobby) {
        if let Some(endpoint) = lobby.endpoint() {
            if self.allocator.release(endpoint.port) {
                info!("Released port {} from lobby {}", endpoint.port, lobby.id());
            }
            self.metrics.set_leased_ports(self.allocator.leased_count());
        }
    }

    async fn deliver(&self, dispatches: Vec<Dispatch>) {
        if dispatches.is_empty() {
            return;
        }

        if let Err(e) = self.sink.dispatch(dispatches).await {
            error!("Failed to deliver lobby dispatches: {}", e);
        }
    }
}

fn status_broadcast(lobby: &Lobby) -> Dispatch {
    Dispatch::Broadcast {
        group: lobby_group_name(lobby.id()),
        event: LobbyEvent::LobbyUpdated(lobby.status()),
    }
}
