//! Matchroom - lobby matchmaking and game-server port allocation
//!
//! Clients ask for a lobby of a given size; the service groups them, and once
//! a lobby fills up or its timer runs out it leases a port from a fixed pool
//! and announces the game server endpoint to every member.

pub mod allocator;
pub mod config;
pub mod error;
pub mod lobby;
pub mod metrics;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use allocator::PortAllocator;
pub use lobby::{Lobby, LobbyRegistry};
pub use session::{Dispatch, DispatchSink, SessionCoordinator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
