//! Lobby registry for discovering and tearing down lobby instances
//!
//! The registry owns the id-to-lobby map. Lobbies are handed out as `Arc`s so
//! callers can work on a lobby without holding the map lock; all membership
//! changes go through the lobby's own critical section.

use crate::lobby::instance::{Lobby, LobbyState};
use crate::types::LobbyId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Counts over the live lobbies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Lobbies currently registered
    pub active_lobbies: usize,
    /// Lobbies still forming (including ones with an attempt in flight)
    pub forming_lobbies: usize,
    /// Lobbies holding a leased endpoint
    pub finalized_lobbies: usize,
    /// Members of lobbies that are still forming
    pub waiting_members: usize,
}

/// Registry of live lobbies
///
/// Ids come from a monotonic counter and are never reused, so an id a client
/// still holds can only ever name the lobby it was issued for.
#[derive(Debug)]
pub struct LobbyRegistry {
    lobbies: RwLock<HashMap<LobbyId, Arc<Lobby>>>,
    next_id: AtomicU32,
}

impl Default for LobbyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LobbyRegistry {
    pub fn new() -> Self {
        Self {
            lobbies: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<LobbyId, Arc<Lobby>>> {
        self.lobbies.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<LobbyId, Arc<Lobby>>> {
        self.lobbies.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Any lobby that can take another member. Which one is returned when
    /// several qualify is unspecified.
    pub fn find_available(&self) -> Option<Arc<Lobby>> {
        self.read()
            .values()
            .find(|lobby| lobby.is_joinable())
            .cloned()
    }

    /// Register a fresh forming lobby
    pub fn create(&self, max_players: usize) -> Arc<Lobby> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let lobby = Arc::new(Lobby::new(id, max_players));

        self.write().insert(id, lobby.clone());
        info!("Created lobby {} (capacity {})", id, max_players);
        lobby
    }

    pub fn get(&self, lobby_id: LobbyId) -> Option<Arc<Lobby>> {
        self.read().get(&lobby_id).cloned()
    }

    /// Deregister a lobby; returns whether it was present
    pub fn remove(&self, lobby_id: LobbyId) -> bool {
        let removed = self.write().remove(&lobby_id).is_some();
        if removed {
            info!("Removed lobby {}", lobby_id);
        }
        removed
    }

    /// Remove a connection from whichever forming lobby holds it, returning
    /// the lobby and how many members this removal left behind. A lobby left
    /// empty by the removal is deregistered before returning.
    pub fn remove_member_everywhere(&self, connection_id: &str) -> Option<(Arc<Lobby>, usize)> {
        for lobby in self.snapshot() {
            if lobby.is_finalized() {
                continue;
            }

            let (removed, remaining) = lobby.try_remove_member(connection_id);
            if removed {
                debug!(
                    "Removed {} from lobby {} ({} remaining)",
                    connection_id,
                    lobby.id(),
                    remaining
                );
                if remaining == 0 {
                    self.remove(lobby.id());
                }
                return Some((lobby, remaining));
            }
        }

        None
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All registered lobbies at this moment
    pub fn snapshot(&self) -> Vec<Arc<Lobby>> {
        self.read().values().cloned().collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let lobbies = self.snapshot();
        let mut stats = RegistryStats {
            active_lobbies: lobbies.len(),
            ..RegistryStats::default()
        };

        for lobby in &lobbies {
            match lobby.state() {
                LobbyState::Finalized => stats.finalized_lobbies += 1,
                LobbyState::Forming | LobbyState::Finalizing => {
                    stats.forming_lobbies += 1;
                    stats.waiting_members += lobby.member_count();
                }
            }
        }

        stats
    }
}
