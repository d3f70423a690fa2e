//! Utility functions for the matchmaking service

use crate::types::LobbyId;
use chrono::{DateTime, Utc};

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Name of the broadcast group that carries a lobby's pushes
pub fn lobby_group_name(lobby_id: LobbyId) -> String {
    format!("lobby_{}", lobby_id)
}
