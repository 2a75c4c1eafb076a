//! Registry of live relay sessions

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{ClientPolicy, Role, SessionHandle};

/// Default bound on a single send to a session
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared registry handle
pub type SharedRegistry = Arc<ConnectionRegistry>;

#[derive(Debug, Default)]
struct Slots {
    controller: Option<SessionHandle>,
    clients: Vec<SessionHandle>,
}

impl Slots {
    fn handles(&self, role: Role) -> Vec<&SessionHandle> {
        match role {
            Role::Controller => self.controller.iter().collect(),
            Role::Client => self.clients.iter().collect(),
        }
    }

    fn remove(&mut self, id: Uuid) -> Option<SessionHandle> {
        if self.controller.as_ref().is_some_and(|c| c.id() == id) {
            return self.controller.take();
        }
        let pos = self.clients.iter().position(|c| c.id() == id)?;
        Some(self.clients.remove(pos))
    }
}

/// Outcome of a fan-out send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Handles a send was attempted on
    pub attempted: usize,
    /// Handles that accepted the message
    pub delivered: usize,
}

impl Delivery {
    /// Whether at least one handle accepted the message
    #[must_use]
    pub const fn any(&self) -> bool {
        self.delivered > 0
    }

    #[must_use]
    pub const fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Connection summary for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub controller_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_since: Option<DateTime<Utc>>,
    pub clients: usize,
}

/// Tracks the controller session and the client sessions
///
/// The controller slot holds at most one handle; registering a new
/// controller invalidates the previous one. All access is serialized by a
/// single lock, including sends, so eviction never races a delivery.
#[derive(Debug)]
pub struct ConnectionRegistry {
    slots: Mutex<Slots>,
    client_policy: ClientPolicy,
    send_timeout: Duration,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(ClientPolicy::default(), DEFAULT_SEND_TIMEOUT)
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(client_policy: ClientPolicy, send_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            client_policy,
            send_timeout,
        }
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    #[must_use]
    pub const fn client_policy(&self) -> ClientPolicy {
        self.client_policy
    }

    /// Register a handle under its role
    ///
    /// Returns the handles evicted by this registration, already invalidated.
    pub async fn register(&self, handle: SessionHandle) -> Vec<SessionHandle> {
        let mut slots = self.slots.lock().await;
        let role = handle.role();
        let id = handle.id();

        let evicted: Vec<SessionHandle> = match (role, self.client_policy) {
            (Role::Controller, _) => slots.controller.replace(handle).into_iter().collect(),
            (Role::Client, ClientPolicy::Single) => {
                std::mem::replace(&mut slots.clients, vec![handle])
            }
            (Role::Client, ClientPolicy::Multiple) => {
                slots.clients.push(handle);
                Vec::new()
            }
        };

        for old in &evicted {
            old.invalidate();
            tracing::info!(role = %role, session_id = %old.id(), "session evicted by newer registration");
        }
        tracing::info!(role = %role, session_id = %id, "session registered");

        evicted
    }

    /// Remove a handle from whichever role holds it
    ///
    /// Returns false if it was already gone.
    pub async fn deregister(&self, id: Uuid) -> bool {
        let removed = self.slots.lock().await.remove(id);
        match removed {
            Some(handle) => {
                handle.invalidate();
                tracing::info!(role = %handle.role(), session_id = %id, "session deregistered");
                true
            }
            None => false,
        }
    }

    /// Live handles currently registered for `role`
    pub async fn lookup(&self, role: Role) -> Vec<SessionHandle> {
        let slots = self.slots.lock().await;
        slots
            .handles(role)
            .into_iter()
            .filter(|h| h.is_live())
            .cloned()
            .collect()
    }

    /// Whether a live controller session is registered
    pub async fn has_controller(&self) -> bool {
        self.slots
            .lock()
            .await
            .controller
            .as_ref()
            .is_some_and(SessionHandle::is_live)
    }

    /// Send `message` to every handle of `role`
    ///
    /// A handle that fails is deregistered; the others still receive the
    /// message.
    pub async fn send(&self, role: Role, message: &str) -> Delivery {
        let mut slots = self.slots.lock().await;
        let targets: Vec<SessionHandle> = slots.handles(role).into_iter().cloned().collect();

        let mut delivery = Delivery::default();
        for handle in targets {
            delivery.attempted += 1;
            match handle.send(message, self.send_timeout).await {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        role = %role,
                        session_id = %handle.id(),
                        error = %e,
                        "send failed, dropping session"
                    );
                    if let Some(dropped) = slots.remove(handle.id()) {
                        dropped.invalidate();
                    }
                }
            }
        }

        delivery
    }

    /// Connection summary
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let slots = self.slots.lock().await;
        let controller = slots.controller.as_ref().filter(|c| c.is_live());
        RegistrySnapshot {
            controller_connected: controller.is_some(),
            controller_since: controller.map(SessionHandle::connected_at),
            clients: slots.clients.iter().filter(|c| c.is_live()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::types::SendError;

    fn registry(policy: ClientPolicy) -> ConnectionRegistry {
        ConnectionRegistry::new(policy, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn second_controller_evicts_first() {
        let reg = registry(ClientPolicy::Multiple);
        let (first, mut first_rx) = SessionHandle::new(Role::Controller);
        let (second, mut second_rx) = SessionHandle::new(Role::Controller);

        assert!(reg.register(first.clone()).await.is_empty());
        let evicted = reg.register(second.clone()).await;
        assert_eq!(evicted, vec![first.clone()]);

        // The old handle is dead and its writer was told to close
        assert_eq!(
            first.send("hi", reg.send_timeout()).await,
            Err(SendError::Invalidated)
        );
        tokio::time::timeout(reg.send_timeout(), first.closed())
            .await
            .unwrap();

        let delivery = reg.send(Role::Controller, "cmd").await;
        assert_eq!(delivery, Delivery { attempted: 1, delivered: 1 });
        assert_eq!(second_rx.recv().await, Some("cmd".to_string()));
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn evicted_session_cannot_remove_successor() {
        let reg = registry(ClientPolicy::Multiple);
        let (first, _first_rx) = SessionHandle::new(Role::Controller);
        let (second, _second_rx) = SessionHandle::new(Role::Controller);

        reg.register(first.clone()).await;
        reg.register(second.clone()).await;

        assert!(!reg.deregister(first.id()).await);
        assert!(reg.has_controller().await);
        assert_eq!(reg.lookup(Role::Controller).await, vec![second]);
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let reg = registry(ClientPolicy::Multiple);
        let (client, _rx) = SessionHandle::new(Role::Client);
        reg.register(client.clone()).await;

        assert!(reg.deregister(client.id()).await);
        assert!(!reg.deregister(client.id()).await);
        assert!(reg.lookup(Role::Client).await.is_empty());
        assert!(!client.is_live());
    }

    #[tokio::test]
    async fn multiple_clients_all_receive() {
        let reg = registry(ClientPolicy::Multiple);
        let (a, mut a_rx) = SessionHandle::new(Role::Client);
        let (b, mut b_rx) = SessionHandle::new(Role::Client);
        reg.register(a).await;
        reg.register(b).await;

        let delivery = reg.send(Role::Client, "reading").await;
        assert_eq!(delivery.delivered, 2);
        assert_eq!(a_rx.recv().await, Some("reading".to_string()));
        assert_eq!(b_rx.recv().await, Some("reading".to_string()));
    }

    #[tokio::test]
    async fn single_client_policy_evicts() {
        let reg = registry(ClientPolicy::Single);
        let (a, _a_rx) = SessionHandle::new(Role::Client);
        let (b, _b_rx) = SessionHandle::new(Role::Client);
        reg.register(a.clone()).await;

        let evicted = reg.register(b.clone()).await;
        assert_eq!(evicted, vec![a.clone()]);
        assert!(!a.is_live());
        assert_eq!(reg.lookup(Role::Client).await, vec![b]);
    }

    #[tokio::test]
    async fn failed_send_drops_only_that_handle() {
        let reg = registry(ClientPolicy::Multiple);
        let (dead, dead_rx) = SessionHandle::new(Role::Client);
        let (alive, mut alive_rx) = SessionHandle::new(Role::Client);
        reg.register(dead.clone()).await;
        reg.register(alive.clone()).await;
        drop(dead_rx);

        let delivery = reg.send(Role::Client, "x").await;
        assert_eq!(delivery, Delivery { attempted: 2, delivered: 1 });
        assert_eq!(delivery.failed(), 1);
        assert_eq!(alive_rx.recv().await, Some("x".to_string()));
        assert_eq!(reg.lookup(Role::Client).await, vec![alive]);
    }

    #[tokio::test]
    async fn send_without_controller_delivers_nothing() {
        let reg = registry(ClientPolicy::Multiple);
        let delivery = reg.send(Role::Controller, "cmd").await;
        assert!(!delivery.any());
        assert_eq!(delivery.attempted, 0);
    }

    #[tokio::test]
    async fn snapshot_reports_sessions() {
        let reg = registry(ClientPolicy::Multiple);
        let (controller, _c_rx) = SessionHandle::new(Role::Controller);
        let (client, _k_rx) = SessionHandle::new(Role::Client);
        reg.register(controller).await;
        reg.register(client).await;

        let snap = reg.snapshot().await;
        assert!(snap.controller_connected);
        assert!(snap.controller_since.is_some());
        assert_eq!(snap.clients, 1);
    }
}
