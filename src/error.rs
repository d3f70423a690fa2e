//! Error types for the matchmaking service
//!
//! Fallible operations return the anyhow-based [`Result`] alias; callers that
//! need to react to a specific failure recover it with `downcast_ref`.

use crate::types::LobbyId;

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Failed to join lobby {lobby_id}")]
    JoinFailed { lobby_id: LobbyId },

    #[error("Lobby {lobby_id} not found")]
    LobbyNotFound { lobby_id: LobbyId },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Message suitable for returning to a client over the transport
    pub fn client_message(&self) -> String {
        match self {
            MatchmakingError::JoinFailed { .. } => "Failed to join lobby".to_string(),
            other => other.to_string(),
        }
    }
}
