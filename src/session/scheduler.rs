//! Cancellable delayed jobs for lobby allocation timers
//!
//! The coordinator never sleeps itself. It hands a future to an
//! [`AllocationScheduler`] together with a delay and keeps the returned
//! [`TimerHandle`] so the job can be called off early. Cancellation is
//! advisory: a job that already started runs to completion.

use crate::error::{MatchmakingError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

/// Work to run once a timer expires
pub type AllocationJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Cancels a scheduled job. Dropping the handle leaves the job scheduled.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle for a job that cannot be cancelled
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Capability to run a job after a delay
pub trait AllocationScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, job: AllocationJob) -> TimerHandle;
}

/// Scheduler backed by tokio timers
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is running on
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| MatchmakingError::InternalError {
            message: format!("No tokio runtime available for allocation timers: {}", e),
        })?;
        Ok(Self::new(handle))
    }
}

impl AllocationScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: AllocationJob) -> TimerHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        self.handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => job.await,
                Ok(()) = cancel_rx => {
                    debug!("Allocation timer cancelled before expiry");
                }
            }
        });

        TimerHandle::new(move || {
            let _ = cancel_tx.send(());
        })
    }
}

struct PendingJob {
    delay: Duration,
    job: AllocationJob,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler that only runs jobs when told to, for driving timers by hand
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<PendingJob>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs scheduled and not yet fired, cancelled ones included
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Number of pending jobs that have not been cancelled
    pub fn active_count(&self) -> usize {
        self.pending
            .lock()
            .map(|p| {
                p.iter()
                    .filter(|job| !job.cancelled.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Delays of the pending jobs, in scheduling order
    pub fn delays(&self) -> Vec<Duration> {
        self.pending
            .lock()
            .map(|p| p.iter().map(|job| job.delay).collect())
            .unwrap_or_default()
    }

    /// Run every pending job that was not cancelled and return how many ran.
    /// Jobs scheduled while firing stay pending for the next call.
    pub async fn fire_all(&self) -> usize {
        let jobs: Vec<PendingJob> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return 0,
        };

        let mut fired = 0;
        for pending in jobs {
            if pending.cancelled.load(Ordering::SeqCst) {
                continue;
            }
            pending.job.await;
            fired += 1;
        }
        fired
    }
}

impl AllocationScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: AllocationJob) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));

        if let Ok(mut pending) = self.pending.lock() {
            pending.push(PendingJob {
                delay,
                job,
                cancelled: cancelled.clone(),
            });
        }

        TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}
