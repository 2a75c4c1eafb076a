//! Message relay between the controller and client sessions

use super::registry::{ConnectionRegistry, Delivery};
use super::types::{Role, SessionHandle};

/// Sent to clients when a controller session registers
pub const CONTROLLER_CONNECTED: &str = r#"{"type":"ESP32","status":"connected"}"#;

/// Sent to clients when the controller session goes away
pub const CONTROLLER_DISCONNECTED: &str = r#"{"type":"ESP32","status":"disconnected"}"#;

/// Acknowledgement returned to the sender of every relayed message
#[must_use]
pub fn ack(text: &str) -> String {
    format!("Message received: {text}")
}

/// Forward `text` from `from` to the opposite role, then acknowledge it
///
/// Controller traffic goes to every client. Client traffic goes to the
/// controller; when that fails the client is told the controller is gone.
/// An invalidated sender relays nothing.
pub async fn relay(registry: &ConnectionRegistry, from: &SessionHandle, text: &str) -> Delivery {
    if !from.is_live() {
        tracing::debug!(role = %from.role(), session_id = %from.id(), "dropping message from closed session");
        return Delivery::default();
    }

    let delivery = match from.role() {
        Role::Controller => registry.send(Role::Client, text).await,
        Role::Client => {
            let delivery = registry.send(Role::Controller, text).await;
            if !delivery.any() {
                tracing::warn!(session_id = %from.id(), "client message not delivered, no controller");
                if let Err(e) = from.send(CONTROLLER_DISCONNECTED, registry.send_timeout()).await {
                    tracing::debug!(session_id = %from.id(), error = %e, "could not notify client");
                }
            }
            delivery
        }
    };

    tracing::debug!(
        role = %from.role(),
        session_id = %from.id(),
        delivered = delivery.delivered,
        "relayed message"
    );

    if let Err(e) = from.send(ack(text), registry.send_timeout()).await {
        tracing::debug!(role = %from.role(), session_id = %from.id(), error = %e, "ack not sent");
    }
    delivery
}

/// Tell every client about a controller state change
pub async fn notify_clients(registry: &ConnectionRegistry, notice: &str) {
    let delivery = registry.send(Role::Client, notice).await;
    tracing::debug!(notice, delivered = delivery.delivered, "clients notified");
}
