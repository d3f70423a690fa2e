//! Integration tests for the matchroom service
//!
//! These tests drive the coordinator through complete lobby lifecycles:
//! - Filling, timing out and allocating lobbies
//! - Pool exhaustion, retries and match completion
//! - Disconnects and leaves
//! - Out-of-band delivery through the dispatch sink

mod fixtures;

use async_trait::async_trait;
use matchroom::config::AppConfig;
use matchroom::error::{MatchmakingError, Result};
use matchroom::lobby::LobbyState;
use matchroom::session::{
    ChannelDispatchSink, CoordinatorSettings, Dispatch, DispatchSink, ManualScheduler,
    TokioScheduler, POOL_EXHAUSTED_MESSAGE,
};
use matchroom::types::{Endpoint, LobbyEvent, MatchStatus};
use matchroom::utils::lobby_group_name;
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;

use fixtures::{
    advance, allocations, build_coordinator, create_manual_system, create_test_system,
    errors_for, test_settings, CountingScheduler, GAME_SERVER_HOST,
};

const TIMEOUT: Duration = Duration::from_secs(60);

mock! {
    pub Sink {}

    #[async_trait]
    impl DispatchSink for Sink {
        async fn dispatch(&self, dispatches: Vec<Dispatch>) -> Result<()>;
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_port_pool_lifecycle() {
    let (coordinator, sink) = create_test_system((7778, 7779), TIMEOUT);

    // Two clients fill lobby A
    let a1 = coordinator.find_or_create_lobby("client-1", 2).unwrap();
    let a2 = coordinator.find_or_create_lobby("client-2", 2).unwrap();
    let lobby_a = a1.result.lobby_id;

    assert_eq!(a2.result.lobby_id, lobby_a);
    assert_eq!(a2.result.status, MatchStatus::Allocated);
    let allocated = allocations(&a2.dispatches);
    assert_eq!(allocated.len(), 1);
    assert_eq!(allocated[0].lobby_id, lobby_a);
    assert_eq!(allocated[0].host, GAME_SERVER_HOST);
    assert_eq!(allocated[0].port, 7778);

    // A third client opens lobby B and waits out the timeout alone
    let b1 = coordinator.find_or_create_lobby("client-3", 2).unwrap();
    let lobby_b = b1.result.lobby_id;
    assert_ne!(lobby_b, lobby_a);
    assert_eq!(b1.result.status, MatchStatus::Pending);

    advance(TIMEOUT + Duration::from_millis(1)).await;

    let lobby = coordinator.registry().get(lobby_b).unwrap();
    assert!(lobby.is_finalized());
    assert!(!lobby.is_full());
    assert_eq!(lobby.member_count(), 1);
    assert_eq!(lobby.endpoint(), Some(Endpoint::new(GAME_SERVER_HOST, 7779)));

    // A fourth client opens lobby C; the pool is empty by the time it times out
    let c1 = coordinator.find_or_create_lobby("client-4", 2).unwrap();
    let lobby_c = c1.result.lobby_id;
    sink.clear();

    advance(TIMEOUT + Duration::from_millis(1)).await;

    assert_eq!(
        errors_for(&sink.recorded(), lobby_c),
        vec![POOL_EXHAUSTED_MESSAGE.to_string()]
    );
    let lobby = coordinator.registry().get(lobby_c).unwrap();
    assert_eq!(lobby.state(), LobbyState::Forming);
    assert_eq!(coordinator.allocator().leased_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_before_fill_removes_lobby() {
    let (coordinator, sink) = create_test_system((7778, 7779), TIMEOUT);

    let joined = coordinator.find_or_create_lobby("client-1", 4).unwrap();
    let lobby_id = joined.result.lobby_id;

    let dispatches = coordinator.on_disconnect("client-1");
    assert_eq!(
        dispatches,
        vec![Dispatch::Unsubscribe {
            connection_id: "client-1".to_string(),
            group: lobby_group_name(lobby_id),
        }]
    );

    assert!(coordinator.registry().get(lobby_id).is_none());
    assert!(coordinator.registry().find_available().is_none());

    // The cancelled timer never allocates
    advance(TIMEOUT * 2).await;
    assert!(sink.recorded().is_empty());
    assert_eq!(coordinator.allocator().leased_count(), 0);

    // A newcomer gets a fresh lobby with a new id
    let next = coordinator.find_or_create_lobby("client-2", 4).unwrap();
    assert!(next.result.lobby_id > lobby_id);
}

#[tokio::test(start_paused = true)]
async fn test_complete_match_returns_port_to_pool() {
    let (coordinator, _sink) = create_test_system((7778, 7778), TIMEOUT);

    let first = coordinator.find_or_create_lobby("client-1", 1).unwrap();
    assert_eq!(
        first.result.endpoint,
        Some(Endpoint::new(GAME_SERVER_HOST, 7778))
    );

    let dispatches = coordinator.complete_match(first.result.lobby_id);
    assert_eq!(
        dispatches,
        vec![Dispatch::Disband {
            group: lobby_group_name(first.result.lobby_id)
        }]
    );
    assert!(coordinator
        .registry()
        .get(first.result.lobby_id)
        .is_none());

    // The same port is leased again
    let second = coordinator.find_or_create_lobby("client-2", 1).unwrap();
    assert_eq!(
        second.result.endpoint,
        Some(Endpoint::new(GAME_SERVER_HOST, 7778))
    );
    assert_ne!(second.result.lobby_id, first.result.lobby_id);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_at_configured_delay() {
    let (coordinator, sink) = create_test_system((7778, 7779), TIMEOUT);

    let joined = coordinator.find_or_create_lobby("client-1", 3).unwrap();
    coordinator.find_or_create_lobby("client-2", 3).unwrap();

    advance(TIMEOUT - Duration::from_secs(1)).await;
    assert!(allocations(&sink.recorded()).is_empty());

    advance(Duration::from_secs(2)).await;
    let allocated = allocations(&sink.recorded());
    assert_eq!(allocated.len(), 1);
    assert_eq!(allocated[0].lobby_id, joined.result.lobby_id);

    let status = coordinator
        .get_lobby_status(joined.result.lobby_id)
        .unwrap();
    assert_eq!(status.current_players, 2);
    assert!(!status.is_full);
}

#[tokio::test(start_paused = true)]
async fn test_single_timer_per_lobby() {
    let scheduler = Arc::new(CountingScheduler::new());
    let sink = Arc::new(matchroom::session::RecordingDispatchSink::new());
    let coordinator = build_coordinator(
        test_settings(TIMEOUT),
        (7778, 7779),
        scheduler.clone(),
        sink,
    );

    coordinator.find_or_create_lobby("client-1", 4).unwrap();
    coordinator.find_or_create_lobby("client-2", 4).unwrap();
    coordinator.find_or_create_lobby("client-3", 4).unwrap();
    assert_eq!(scheduler.scheduled(), 1);

    // A leave and rejoin does not arm a second timer
    let lobby_id = coordinator.registry().snapshot()[0].id();
    coordinator.leave_lobby("client-3", lobby_id);
    coordinator.find_or_create_lobby("client-3", 4).unwrap();
    assert_eq!(scheduler.scheduled(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_timer_respects_timeout() {
    let (coordinator, scheduler, sink) = create_manual_system((7778, 7779), TIMEOUT);

    let joined = coordinator.find_or_create_lobby("client-1", 2).unwrap();
    assert_eq!(scheduler.delays(), vec![TIMEOUT]);

    tokio::time::advance(TIMEOUT).await;
    assert_eq!(scheduler.fire_all().await, 1);

    let lobby = coordinator.registry().get(joined.result.lobby_id).unwrap();
    assert!(lobby.is_finalized());
    assert_eq!(allocations(&sink.recorded()).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_early_timer_does_not_allocate_partial_lobby() {
    let (coordinator, scheduler, sink) = create_manual_system((7778, 7779), TIMEOUT);

    let joined = coordinator.find_or_create_lobby("client-1", 2).unwrap();
    assert_eq!(scheduler.fire_all().await, 1);

    let lobby = coordinator.registry().get(joined.result.lobby_id).unwrap();
    assert_eq!(lobby.state(), LobbyState::Forming);
    assert!(sink.recorded().is_empty());
    assert_eq!(coordinator.allocator().leased_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_lobby_retries_until_port_frees() {
    let (coordinator, scheduler, sink) = create_manual_system((7778, 7778), TIMEOUT);

    let first = coordinator.find_or_create_lobby("client-1", 1).unwrap();
    let second = coordinator.find_or_create_lobby("client-2", 1).unwrap();
    assert_eq!(
        errors_for(&second.dispatches, second.result.lobby_id),
        vec![POOL_EXHAUSTED_MESSAGE.to_string()]
    );

    // The initial timeout was replaced by a retry
    assert_eq!(scheduler.active_count(), 1);
    assert!(scheduler.delays().contains(&Duration::from_secs(5)));

    // Still exhausted: reports again and re-arms
    assert_eq!(scheduler.fire_all().await, 1);
    assert_eq!(
        errors_for(&sink.recorded(), second.result.lobby_id).len(),
        1
    );
    assert_eq!(scheduler.active_count(), 1);

    coordinator.complete_match(first.result.lobby_id);
    assert_eq!(scheduler.fire_all().await, 1);

    let allocated = allocations(&sink.recorded());
    assert_eq!(allocated.len(), 1);
    assert_eq!(allocated[0].lobby_id, second.result.lobby_id);
    assert_eq!(scheduler.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_next_join_retries_when_retry_disabled() {
    let sink = Arc::new(matchroom::session::RecordingDispatchSink::new());
    let settings = CoordinatorSettings {
        retry_interval: None,
        ..test_settings(TIMEOUT)
    };
    let coordinator = build_coordinator(
        settings,
        (7778, 7778),
        Arc::new(TokioScheduler::current().unwrap()),
        sink.clone(),
    );

    let first = coordinator.find_or_create_lobby("client-1", 1).unwrap();
    let waiting = coordinator.find_or_create_lobby("client-2", 3).unwrap();

    advance(TIMEOUT + Duration::from_millis(1)).await;
    assert_eq!(
        errors_for(&sink.recorded(), waiting.result.lobby_id).len(),
        1
    );

    // Nothing retries on its own
    coordinator.complete_match(first.result.lobby_id);
    advance(TIMEOUT * 2).await;
    assert!(allocations(&sink.recorded()).is_empty());

    // The next join is the trigger
    let joined = coordinator.find_or_create_lobby("client-3", 3).unwrap();
    assert_eq!(joined.result.lobby_id, waiting.result.lobby_id);
    assert_eq!(joined.result.status, MatchStatus::Allocated);
    assert_eq!(allocations(&joined.dispatches).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_full_lobby_retries_after_timeout_when_retry_disabled() {
    let sink = Arc::new(matchroom::session::RecordingDispatchSink::new());
    let scheduler = Arc::new(ManualScheduler::new());
    let settings = CoordinatorSettings {
        retry_interval: None,
        ..test_settings(TIMEOUT)
    };
    let coordinator = build_coordinator(settings, (7778, 7778), scheduler.clone(), sink.clone());

    let first = coordinator.find_or_create_lobby("client-1", 1).unwrap();
    let waiting = coordinator.find_or_create_lobby("client-2", 2).unwrap();
    let lobby_id = waiting.result.lobby_id;

    // Initial timeout finds the pool empty and arms nothing
    tokio::time::advance(TIMEOUT).await;
    assert_eq!(scheduler.fire_all().await, 1);
    assert_eq!(errors_for(&sink.recorded(), lobby_id).len(), 1);
    assert_eq!(scheduler.active_count(), 0);

    // Filling it fails too, but a full lobby cannot wait for another join
    let filled = coordinator.find_or_create_lobby("client-3", 2).unwrap();
    assert_eq!(filled.result.lobby_id, lobby_id);
    assert_eq!(filled.result.status, MatchStatus::Pending);
    assert_eq!(
        errors_for(&filled.dispatches, lobby_id),
        vec![POOL_EXHAUSTED_MESSAGE.to_string()]
    );
    assert_eq!(scheduler.active_count(), 1);
    assert_eq!(scheduler.delays(), vec![TIMEOUT]);

    coordinator.complete_match(first.result.lobby_id);
    assert_eq!(scheduler.fire_all().await, 1);

    let allocated = allocations(&sink.recorded());
    assert_eq!(allocated.len(), 1);
    assert_eq!(allocated[0].lobby_id, lobby_id);
    assert!(coordinator.registry().get(lobby_id).unwrap().is_finalized());
}

#[tokio::test(start_paused = true)]
async fn test_leave_broadcasts_to_remaining_members() {
    let (coordinator, _sink) = create_test_system((7778, 7779), TIMEOUT);

    let joined = coordinator.find_or_create_lobby("client-1", 3).unwrap();
    coordinator.find_or_create_lobby("client-2", 3).unwrap();
    let lobby_id = joined.result.lobby_id;

    let dispatches = coordinator.leave_lobby("client-1", lobby_id);
    assert_eq!(dispatches.len(), 2);
    match dispatches[1].event() {
        Some(LobbyEvent::LobbyUpdated(status)) => {
            assert_eq!(status.current_players, 1);
            assert_eq!(status.max_players, 3);
        }
        other => panic!("expected LobbyUpdated, got {:?}", other),
    }

    // Leaving twice changes nothing
    assert!(coordinator.leave_lobby("client-1", lobby_id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lobby_not_found() {
    let (coordinator, _sink) = create_test_system((7778, 7779), TIMEOUT);

    let err = coordinator.get_lobby_status(12345).unwrap_err();
    match err.downcast_ref::<MatchmakingError>() {
        Some(MatchmakingError::LobbyNotFound { lobby_id }) => assert_eq!(*lobby_id, 12345),
        other => panic!("expected LobbyNotFound, got {:?}", other),
    }

    assert!(coordinator.complete_match(12345).is_empty());
    assert!(coordinator.leave_lobby("client-1", 12345).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timer_dispatches_reach_mock_sink() {
    let mut sink = MockSink::new();
    sink.expect_dispatch()
        .withf(|dispatches| allocations(dispatches).len() == 1)
        .times(1)
        .returning(|_| Ok(()));

    let coordinator = build_coordinator(
        test_settings(TIMEOUT),
        (7778, 7779),
        Arc::new(TokioScheduler::current().unwrap()),
        Arc::new(sink),
    );

    coordinator.find_or_create_lobby("client-1", 2).unwrap();
    advance(TIMEOUT + Duration::from_millis(1)).await;

    assert_eq!(coordinator.allocator().leased_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_does_not_undo_allocation() {
    let mut sink = MockSink::new();
    sink.expect_dispatch()
        .times(1)
        .returning(|_| Err(anyhow::anyhow!("transport unavailable")));

    let coordinator = build_coordinator(
        test_settings(TIMEOUT),
        (7778, 7779),
        Arc::new(TokioScheduler::current().unwrap()),
        Arc::new(sink),
    );

    let joined = coordinator.find_or_create_lobby("client-1", 2).unwrap();
    advance(TIMEOUT + Duration::from_millis(1)).await;

    let lobby = coordinator.registry().get(joined.result.lobby_id).unwrap();
    assert!(lobby.is_finalized());
}

#[tokio::test(start_paused = true)]
async fn test_channel_sink_receives_timer_pushes() {
    let (sink, mut receiver) = ChannelDispatchSink::new();
    let coordinator = build_coordinator(
        test_settings(TIMEOUT),
        (7778, 7779),
        Arc::new(TokioScheduler::current().unwrap()),
        Arc::new(sink),
    );

    let joined = coordinator.find_or_create_lobby("client-1", 2).unwrap();
    advance(TIMEOUT + Duration::from_millis(1)).await;

    match receiver.recv().await {
        Some(Dispatch::Broadcast {
            group,
            event: LobbyEvent::MatchAllocated(allocated),
        }) => {
            assert_eq!(group, lobby_group_name(joined.result.lobby_id));
            assert_eq!(allocated.port, 7778);
        }
        other => panic!("expected MatchAllocated broadcast, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_expired_matches_are_swept() {
    let (coordinator, sink) = create_test_system((7778, 7779), TIMEOUT);

    let joined = coordinator.find_or_create_lobby("client-1", 1).unwrap();
    let sweep = coordinator.start_expiry_sweep(Duration::from_secs(60));

    advance(Duration::from_secs(3600 + 61)).await;

    assert!(coordinator
        .registry()
        .get(joined.result.lobby_id)
        .is_none());
    assert_eq!(coordinator.allocator().leased_count(), 0);
    assert!(sink.recorded().contains(&Dispatch::Disband {
        group: lobby_group_name(joined.result.lobby_id)
    }));

    sweep.abort();
}

#[tokio::test(start_paused = true)]
async fn test_settings_from_config() {
    let config = AppConfig::from_lookup(|key| match key {
        "MATCH_TIMEOUT_SECONDS" => Some("10".to_string()),
        "ALLOCATION_PORT_START" => Some("9100".to_string()),
        "ALLOCATION_PORT_END" => Some("9000".to_string()),
        "GAME_SERVER_IP" => Some("172.16.0.9".to_string()),
        _ => None,
    })
    .unwrap();

    let settings = CoordinatorSettings::from(&config);
    assert_eq!(settings.allocation_timeout, Duration::from_secs(10));
    assert_eq!(settings.game_server_host, "172.16.0.9");

    let sink = Arc::new(matchroom::session::RecordingDispatchSink::new());
    let coordinator = build_coordinator(
        settings,
        (
            config.game_server.port_range_start,
            config.game_server.port_range_end,
        ),
        Arc::new(TokioScheduler::current().unwrap()),
        sink,
    );

    // Inverted range collapses to the start port
    assert_eq!(coordinator.allocator().capacity(), 1);
    let joined = coordinator.find_or_create_lobby("client-1", 1).unwrap();
    assert_eq!(
        joined.result.endpoint,
        Some(Endpoint::new("172.16.0.9", 9100))
    );
}
