//! Port pool implementation
//!
//! Every port of the configured range lives in exactly one of two sets,
//! `available` or `leased`, and both sets are only touched under one lock so a
//! port can never be observed in neither (or both).

use crate::types::Port;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug)]
struct PoolState {
    available: VecDeque<Port>,
    leased: HashSet<Port>,
}

/// Point-in-time view of the pool, used for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub range_start: Port,
    pub range_end: Port,
    pub available: usize,
    pub leased: usize,
}

/// Leases unique ports out of a fixed inclusive range
#[derive(Debug)]
pub struct PortAllocator {
    start: Port,
    end: Port,
    state: Mutex<PoolState>,
}

impl PortAllocator {
    /// Create a pool covering `[start, end]`. An `end` below `start` is clamped
    /// up to `start`, giving a single-port pool.
    pub fn new(start: Port, end: Port) -> Self {
        let end = end.max(start);
        info!("Port pool initialized with range {}-{}", start, end);

        Self {
            start,
            end,
            state: Mutex::new(PoolState {
                available: (start..=end).collect(),
                leased: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        // The critical sections never leave the two sets inconsistent, so a
        // panic elsewhere while holding the lock does not invalidate them.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lease the next free port, or `None` when the pool is exhausted
    pub fn try_allocate(&self) -> Option<Port> {
        let mut state = self.state();

        while let Some(candidate) = state.available.pop_front() {
            if state.leased.insert(candidate) {
                debug!(
                    "Leased port {} ({} still available)",
                    candidate,
                    state.available.len()
                );
                return Some(candidate);
            }
        }

        None
    }

    /// Return a leased port to the pool. Releasing a port that is not
    /// currently leased (including a double release) does nothing.
    pub fn release(&self, port: Port) -> bool {
        let mut state = self.state();

        if state.leased.remove(&port) {
            state.available.push_back(port);
            debug!("Released port {}", port);
            true
        } else {
            debug!("Ignoring release of port {} which is not leased", port);
            false
        }
    }

    /// Whether the port is currently leased
    pub fn is_leased(&self, port: Port) -> bool {
        self.state().leased.contains(&port)
    }

    pub fn available_count(&self) -> usize {
        self.state().available.len()
    }

    pub fn leased_count(&self) -> usize {
        self.state().leased.len()
    }

    /// The inclusive port range managed by this pool
    pub fn range(&self) -> RangeInclusive<Port> {
        self.start..=self.end
    }

    /// Total number of ports in the range
    pub fn capacity(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state();
        PoolStats {
            range_start: self.start,
            range_end: self.end,
            available: state.available.len(),
            leased: state.leased.len(),
        }
    }
}
