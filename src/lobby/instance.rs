//! Lobby instance implementation and lifecycle management
//!
//! A lobby is shared between concurrent request handlers and its allocation
//! timer, so every piece of mutable state sits behind one mutex and each
//! public operation is a single critical section.

use crate::session::scheduler::TimerHandle;
use crate::types::{ConnectionId, Endpoint, LobbyId, LobbyStatus, Port};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Possible states of a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyState {
    /// Accepting members, no endpoint yet
    Forming,
    /// An allocation attempt is in flight; joins and leaves behave as in Forming
    Finalizing,
    /// Endpoint fixed and membership frozen (terminal state)
    Finalized,
}

#[derive(Debug)]
struct LobbyInner {
    members: HashSet<ConnectionId>,
    state: LobbyState,
    endpoint: Option<Endpoint>,
    finalized_at: Option<Instant>,
    /// Set when a forming lobby loses its last member; a closed lobby is on
    /// its way out of the registry and never accepts members again.
    closed: bool,
    timer_armed: bool,
    timer: Option<TimerHandle>,
}

/// A match in formation
#[derive(Debug)]
pub struct Lobby {
    id: LobbyId,
    max_players: usize,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    inner: Mutex<LobbyInner>,
}

impl Lobby {
    pub fn new(id: LobbyId, max_players: usize) -> Self {
        Self {
            id,
            max_players,
            created_at: Instant::now(),
            created_at_utc: current_timestamp(),
            inner: Mutex::new(LobbyInner {
                members: HashSet::new(),
                state: LobbyState::Forming,
                endpoint: None,
                finalized_at: None,
                closed: false,
                timer_armed: false,
                timer: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, LobbyInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> LobbyId {
        self.id
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        self.created_at_utc
    }

    /// Time since the lobby was created
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.created_at)
    }

    /// Add a member. Returns whether the member was accepted and how many
    /// slots remain afterwards.
    pub fn try_add_member(&self, connection_id: &str) -> (bool, usize) {
        let mut inner = self.inner();
        let remaining = self.max_players.saturating_sub(inner.members.len());

        if inner.state == LobbyState::Finalized || inner.closed || remaining == 0 {
            return (false, remaining);
        }

        let added = inner.members.insert(connection_id.to_string());
        (added, self.max_players - inner.members.len())
    }

    /// Remove a member. Returns whether the member was present and how many
    /// members remain. Membership of a finalized lobby is frozen.
    pub fn try_remove_member(&self, connection_id: &str) -> (bool, usize) {
        let mut inner = self.inner();

        if inner.state == LobbyState::Finalized {
            return (false, inner.members.len());
        }

        let removed = inner.members.remove(connection_id);
        if removed && inner.members.is_empty() {
            inner.closed = true;
        }
        (removed, inner.members.len())
    }

    pub fn members(&self) -> Vec<ConnectionId> {
        self.inner().members.iter().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.inner().members.len()
    }

    pub fn is_full(&self) -> bool {
        self.inner().members.len() >= self.max_players
    }

    pub fn is_empty(&self) -> bool {
        self.inner().members.is_empty()
    }

    pub fn state(&self) -> LobbyState {
        self.inner().state
    }

    pub fn is_finalized(&self) -> bool {
        self.inner().state == LobbyState::Finalized
    }

    pub fn is_closed(&self) -> bool {
        self.inner().closed
    }

    /// Whether a new member could currently be placed here
    pub fn is_joinable(&self) -> bool {
        let inner = self.inner();
        inner.state != LobbyState::Finalized
            && !inner.closed
            && inner.members.len() < self.max_players
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner().endpoint.clone()
    }

    pub fn finalized_at(&self) -> Option<Instant> {
        self.inner().finalized_at
    }

    /// Consistent occupancy snapshot
    pub fn status(&self) -> LobbyStatus {
        let inner = self.inner();
        LobbyStatus {
            id: self.id,
            current_players: inner.members.len(),
            max_players: self.max_players,
            is_full: inner.members.len() >= self.max_players,
        }
    }

    /// Install the initial allocation timer. Succeeds once per lobby; a
    /// rejected handle is cancelled immediately.
    pub fn try_arm_allocation_timer(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner();

        if inner.timer_armed || inner.state == LobbyState::Finalized {
            drop(inner);
            handle.cancel();
            return false;
        }

        inner.timer_armed = true;
        inner.timer = Some(handle);
        true
    }

    /// Install a follow-up timer after the initial one, cancelling whatever
    /// timer was still held. Rejected once the lobby is finalized or closed.
    pub fn replace_allocation_timer(&self, handle: TimerHandle) -> bool {
        let mut inner = self.inner();

        if inner.state == LobbyState::Finalized || inner.closed {
            drop(inner);
            handle.cancel();
            return false;
        }

        inner.timer_armed = true;
        let previous = inner.timer.replace(handle);
        drop(inner);

        if let Some(previous) = previous {
            previous.cancel();
        }
        true
    }

    pub fn is_timer_armed(&self) -> bool {
        self.inner().timer_armed
    }

    pub fn take_allocation_timer(&self) -> Option<TimerHandle> {
        self.inner().timer.take()
    }

    /// Cancel the pending allocation timer, if any
    pub fn cancel_allocation_timer(&self) -> bool {
        match self.take_allocation_timer() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Move from Forming to Finalizing. Fails when another attempt is already
    /// in flight, the lobby is finalized, or it has no members.
    pub fn try_begin_allocation(&self) -> bool {
        let mut inner = self.inner();

        if inner.state != LobbyState::Forming || inner.closed || inner.members.is_empty() {
            return false;
        }

        inner.state = LobbyState::Finalizing;
        true
    }

    /// Fall back from Finalizing to Forming after a failed attempt
    pub fn abort_allocation(&self) {
        let mut inner = self.inner();
        if inner.state == LobbyState::Finalizing {
            inner.state = LobbyState::Forming;
        }
    }

    /// Fix the endpoint and freeze membership. Only the first call wins; a
    /// lobby that was closed while the attempt was in flight cannot be
    /// finalized either.
    pub fn try_finalize(&self, host: &str, port: Port) -> bool {
        let mut inner = self.inner();

        if inner.state == LobbyState::Finalized || inner.closed {
            return false;
        }

        inner.state = LobbyState::Finalized;
        inner.endpoint = Some(Endpoint::new(host, port));
        inner.finalized_at = Some(Instant::now());
        true
    }
}
