//! Side effects the transport layer must carry out
//!
//! Coordinator operations never push to clients themselves. Each one returns
//! the [`Dispatch`] list it produced; work that happens outside a request (a
//! timer firing, a retry, the expiry sweep) hands its list to a
//! [`DispatchSink`] instead.

use crate::error::{MatchmakingError, Result};
use crate::types::{ConnectionId, LobbyEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::info;

/// One instruction for the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Dispatch {
    /// Add a connection to a broadcast group
    Subscribe {
        connection_id: ConnectionId,
        group: String,
    },
    /// Remove a connection from a broadcast group
    Unsubscribe {
        connection_id: ConnectionId,
        group: String,
    },
    /// Push an event to every member of a group
    Broadcast { group: String, event: LobbyEvent },
    /// Drop a group and all its subscriptions
    Disband { group: String },
}

impl Dispatch {
    pub fn group(&self) -> &str {
        match self {
            Dispatch::Subscribe { group, .. }
            | Dispatch::Unsubscribe { group, .. }
            | Dispatch::Broadcast { group, .. }
            | Dispatch::Disband { group } => group,
        }
    }

    /// The event carried by a broadcast, if this is one
    pub fn event(&self) -> Option<&LobbyEvent> {
        match self {
            Dispatch::Broadcast { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Receives dispatches produced outside a request/response cycle
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn dispatch(&self, dispatches: Vec<Dispatch>) -> Result<()>;
}

/// Forwards dispatches over a tokio channel to an embedding transport
#[derive(Debug, Clone)]
pub struct ChannelDispatchSink {
    sender: mpsc::UnboundedSender<Dispatch>,
}

impl ChannelDispatchSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Dispatch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DispatchSink for ChannelDispatchSink {
    async fn dispatch(&self, dispatches: Vec<Dispatch>) -> Result<()> {
        for dispatch in dispatches {
            self.sender
                .send(dispatch)
                .map_err(|_| MatchmakingError::InternalError {
                    message: "Dispatch receiver has been dropped".to_string(),
                })?;
        }
        Ok(())
    }
}

/// Logs dispatches; used when no transport is attached
#[derive(Debug, Default, Clone)]
pub struct LoggingDispatchSink;

#[async_trait]
impl DispatchSink for LoggingDispatchSink {
    async fn dispatch(&self, dispatches: Vec<Dispatch>) -> Result<()> {
        for dispatch in dispatches {
            match &dispatch {
                Dispatch::Broadcast { group, event } => {
                    info!("Broadcast {} to {}: {:?}", event.name(), group, event)
                }
                other => info!("Dispatch: {:?}", other),
            }
        }
        Ok(())
    }
}

/// Keeps every dispatch it receives, for inspection in tests
#[derive(Debug, Default)]
pub struct RecordingDispatchSink {
    recorded: Mutex<Vec<Dispatch>>,
}

impl RecordingDispatchSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Dispatch> {
        self.recorded
            .lock()
            .map(|recorded| recorded.clone())
            .unwrap_or_default()
    }

    /// Recorded broadcast events, in order
    pub fn events(&self) -> Vec<LobbyEvent> {
        self.recorded()
            .iter()
            .filter_map(|d| d.event().cloned())
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.clear();
        }
    }
}

#[async_trait]
impl DispatchSink for RecordingDispatchSink {
    async fn dispatch(&self, dispatches: Vec<Dispatch>) -> Result<()> {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.extend(dispatches);
        }
        Ok(())
    }
}
