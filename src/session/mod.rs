//! Session coordination: the operations clients invoke, the pushes they
//! cause, and the timers that drive allocation

pub mod coordinator;
pub mod dispatch;
pub mod scheduler;

pub use coordinator::{
    CoordinatorSettings, JoinOutcome, MatchmakingStats, SessionCoordinator,
    POOL_EXHAUSTED_MESSAGE,
};
pub use dispatch::{
    ChannelDispatchSink, Dispatch, DispatchSink, LoggingDispatchSink, RecordingDispatchSink,
};
pub use scheduler::{AllocationJob, AllocationScheduler, ManualScheduler, TimerHandle, TokioScheduler};
