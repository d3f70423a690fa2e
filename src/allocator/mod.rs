//! Game-server port allocation
//!
//! A fixed range of ports is leased to finalized lobbies so that no two live
//! matches are ever pointed at the same dedicated server endpoint.

pub mod pool;

pub use pool::{PoolStats, PortAllocator};
