//! Session types for relay connections

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::Error;

/// Outbound queue depth per session
pub const OUTBOUND_CAPACITY: usize = 32;

/// Role of a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The embedded bioreactor controller
    Controller,
    /// A dashboard or operator endpoint
    Client,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many client sessions may be registered at once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientPolicy {
    /// Last registration wins, like the controller slot
    Single,
    #[default]
    Multiple,
}

impl FromStr for ClientPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "single" | "one" => Ok(Self::Single),
            "multiple" | "many" => Ok(Self::Multiple),
            other => Err(Error::Config(format!("unknown client policy '{other}'"))),
        }
    }
}

/// Why a send to a session did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("session was invalidated")]
    Invalidated,
    #[error("session writer has gone away")]
    Closed,
    #[error("send timed out")]
    Timeout,
}

/// Send-capable handle to one relay connection
///
/// Clones refer to the same connection. Once invalidated a handle never
/// accepts another message, and [`SessionHandle::closed`] resolves for
/// every clone regardless of how full the text queue is.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    role: Role,
    connected_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
    closed: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Create a handle and the receiving end its socket writer drains
    #[must_use]
    pub fn new(role: Role) -> (Self, mpsc::Receiver<String>) {
        Self::with_capacity(role, OUTBOUND_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(role: Role, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            id: Uuid::new_v4(),
            role,
            connected_at: Utc::now(),
            tx,
            closed: Arc::new(watch::Sender::new(false)),
        };
        (handle, rx)
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        !*self.closed.borrow() && !self.tx.is_closed()
    }

    /// Mark the handle not-sendable and signal its writer to close
    pub fn invalidate(&self) {
        if !self.closed.send_replace(true) {
            tracing::debug!(role = %self.role, session_id = %self.id, "session invalidated");
        }
    }

    /// Resolve once the handle has been invalidated
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so the wait cannot fail
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Queue a text frame, waiting at most `timeout` for queue space
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the handle is invalidated, its writer is
    /// gone, or the queue stayed full for the whole timeout
    pub async fn send(&self, text: impl Into<String>, timeout: Duration) -> Result<(), SendError> {
        if *self.closed.borrow() {
            return Err(SendError::Invalidated);
        }

        match tokio::time::timeout(timeout, self.tx.send(text.into())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout),
        }
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}
