//! Common types used throughout the matchmaking service

use serde::{Deserialize, Serialize};

/// Opaque identifier assigned to a client by the transport layer
pub type ConnectionId = String;

/// Unique identifier for lobbies
pub type LobbyId = u32;

/// A leasable game-server port
pub type Port = u16;

/// Network endpoint of a dedicated game server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: Port,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: Port) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Snapshot of a lobby's occupancy, pushed as `LobbyUpdated` and returned by status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStatus {
    pub id: LobbyId,
    pub current_players: usize,
    pub max_players: usize,
    pub is_full: bool,
}

/// Whether a joined lobby already has a game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Allocated,
}

/// Direct reply to a FindOrCreateLobby request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingResult {
    pub lobby_id: LobbyId,
    pub status: MatchStatus,
    pub endpoint: Option<Endpoint>,
}

/// Pushed to a lobby group once its game server is leased
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAllocated {
    pub lobby_id: LobbyId,
    pub host: String,
    pub port: Port,
}

/// Server to client pushes delivered to a lobby's broadcast group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyEvent {
    LobbyUpdated(LobbyStatus),
    MatchAllocated(MatchAllocated),
    MatchmakingError { message: String },
}

impl LobbyEvent {
    /// Event name used by the transport when pushing to clients
    pub fn name(&self) -> &'static str {
        match self {
            LobbyEvent::LobbyUpdated(_) => "LobbyUpdated",
            LobbyEvent::MatchAllocated(_) => "MatchAllocated",
            LobbyEvent::MatchmakingError { .. } => "MatchmakingError",
        }
    }
}

/// What caused an allocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationTrigger {
    /// The lobby reached capacity
    Full,
    /// The initial allocation timer fired
    Timeout,
    /// A retry after the pool was exhausted
    Retry,
}

impl AllocationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationTrigger::Full => "full",
            AllocationTrigger::Timeout => "timeout",
            AllocationTrigger::Retry => "retry",
        }
    }
}

impl std::fmt::Display for AllocationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
