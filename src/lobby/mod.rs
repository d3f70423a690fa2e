//! Lobby management for the matchmaking service
//!
//! A [`Lobby`] guards its own membership and allocation state; the
//! [`LobbyRegistry`] maps ids to live lobbies.

pub mod instance;
pub mod registry;

// Re-export commonly used types
pub use instance::{Lobby, LobbyState};
pub use registry::{LobbyRegistry, RegistryStats};
