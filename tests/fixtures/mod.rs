//! Test fixtures and helpers for integration testing
#![allow(dead_code)]

use matchroom::allocator::PortAllocator;
use matchroom::metrics::MetricsCollector;
use matchroom::session::{
    AllocationJob, AllocationScheduler, CoordinatorSettings, Dispatch, DispatchSink,
    ManualScheduler, RecordingDispatchSink, SessionCoordinator, TimerHandle, TokioScheduler,
};
use matchroom::types::{LobbyEvent, LobbyId, MatchAllocated};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const GAME_SERVER_HOST: &str = "10.0.0.42";

/// Settings used by most integration tests
pub fn test_settings(allocation_timeout: Duration) -> CoordinatorSettings {
    CoordinatorSettings {
        allocation_timeout,
        retry_interval: Some(Duration::from_secs(5)),
        max_match_duration: Duration::from_secs(3600),
        game_server_host: GAME_SERVER_HOST.to_string(),
    }
}

/// Build a coordinator around any scheduler and sink
pub fn build_coordinator(
    settings: CoordinatorSettings,
    ports: (u16, u16),
    scheduler: Arc<dyn AllocationScheduler>,
    sink: Arc<dyn DispatchSink>,
) -> SessionCoordinator {
    SessionCoordinator::new(
        settings,
        Arc::new(PortAllocator::new(ports.0, ports.1)),
        scheduler,
        sink,
        Arc::new(MetricsCollector::new().expect("Failed to create collector")),
    )
}

/// Coordinator on tokio timers, recording everything delivered out of band.
/// Must be called inside a tokio runtime.
pub fn create_test_system(
    ports: (u16, u16),
    allocation_timeout: Duration,
) -> (SessionCoordinator, Arc<RecordingDispatchSink>) {
    let sink = Arc::new(RecordingDispatchSink::new());
    let scheduler = Arc::new(TokioScheduler::current().expect("tests run inside a runtime"));

    let coordinator = build_coordinator(
        test_settings(allocation_timeout),
        ports,
        scheduler,
        sink.clone(),
    );
    (coordinator, sink)
}

/// Coordinator whose timers only fire when the test says so
pub fn create_manual_system(
    ports: (u16, u16),
    allocation_timeout: Duration,
) -> (
    SessionCoordinator,
    Arc<ManualScheduler>,
    Arc<RecordingDispatchSink>,
) {
    let sink = Arc::new(RecordingDispatchSink::new());
    let scheduler = Arc::new(ManualScheduler::new());

    let coordinator = build_coordinator(
        test_settings(allocation_timeout),
        ports,
        scheduler.clone(),
        sink.clone(),
    );
    (coordinator, scheduler, sink)
}

/// Tokio scheduler that counts how many timers were requested
pub struct CountingScheduler {
    inner: TokioScheduler,
    scheduled: AtomicUsize,
}

impl CountingScheduler {
    pub fn new() -> Self {
        Self {
            inner: TokioScheduler::current().expect("tests run inside a runtime"),
            scheduled: AtomicUsize::new(0),
        }
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }
}

impl AllocationScheduler for CountingScheduler {
    fn schedule(&self, delay: Duration, job: AllocationJob) -> TimerHandle {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.inner.schedule(delay, job)
    }
}

/// Every MatchAllocated carried by a list of dispatches
pub fn allocations(dispatches: &[Dispatch]) -> Vec<MatchAllocated> {
    dispatches
        .iter()
        .filter_map(|d| match d.event() {
            Some(LobbyEvent::MatchAllocated(allocated)) => Some(allocated.clone()),
            _ => None,
        })
        .collect()
}

/// Error messages broadcast to a lobby's group
pub fn errors_for(dispatches: &[Dispatch], lobby_id: LobbyId) -> Vec<String> {
    let group = matchroom::utils::lobby_group_name(lobby_id);
    dispatches
        .iter()
        .filter(|d| d.group() == group)
        .filter_map(|d| match d.event() {
            Some(LobbyEvent::MatchmakingError { message }) => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Let timers due within `duration` fire and their jobs run
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    tokio::task::yield_now().await;
}
