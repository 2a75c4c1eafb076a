//! WebSocket relay between the controller and dashboards

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;

use crate::sessions::{
    CONTROLLER_CONNECTED, CONTROLLER_DISCONNECTED, Role, SessionHandle, SharedRegistry,
    notify_clients, relay,
};

/// Header the controller firmware sets on its upgrade request
pub const CLIENT_TYPE_HEADER: &str = "x-client-type";

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    pub role: Option<String>,
}

/// Build relay router
pub fn router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(registry)
}

/// Decide the peer role from the upgrade request
#[must_use]
pub fn role_from_request(headers: &HeaderMap, query: &RelayQuery) -> Role {
    let from_header = headers
        .get(CLIENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    let claims_controller = |value: &str| {
        value.eq_ignore_ascii_case("esp32") || value.eq_ignore_ascii_case("controller")
    };

    if from_header.is_some_and(claims_controller) || query.role.as_deref().is_some_and(claims_controller) {
        Role::Controller
    } else {
        Role::Client
    }
}

async fn ws_upgrade(
    State(registry): State<SharedRegistry>,
    headers: HeaderMap,
    Query(query): Query<RelayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let role = role_from_request(&headers, &query);
    ws.on_upgrade(move |socket| handle_socket(socket, registry, role))
}

async fn handle_socket(socket: WebSocket, registry: SharedRegistry, role: Role) {
    let (sender, receiver) = socket.split();
    run_session(sender, receiver, registry, role).await;
}

/// Run one relay session until either side of the connection ends
///
/// `sink` and `stream` are the two halves of the peer's socket. The session
/// is deregistered on every exit path; a session that was evicted by a newer
/// controller leaves without notifying clients.
pub async fn run_session<W, R, E>(mut sink: W, mut stream: R, registry: SharedRegistry, role: Role)
where
    W: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let (handle, mut outbound) = SessionHandle::new(role);
    let session_id = handle.id();

    tracing::info!(role = %role, session_id = %session_id, "relay session connected");

    let evicted = registry.register(handle.clone()).await;
    if role == Role::Controller {
        if !evicted.is_empty() {
            notify_clients(&registry, CONTROLLER_DISCONNECTED).await;
        }
        notify_clients(&registry, CONTROLLER_CONNECTED).await;
    }

    // Writer: drain the handle queue into the socket until invalidated
    let writer_handle = handle.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = writer_handle.closed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                frame = outbound.recv() => {
                    let Some(text) = frame else { break };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: relay every text frame to the other role
    let recv_registry = Arc::clone(&registry);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            if !handle.is_live() {
                break;
            }
            match msg {
                Message::Text(text) => {
                    relay(&recv_registry, &handle, text.as_str()).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Deregistering an evicted session is a no-op and must not notify
    if registry.deregister(session_id).await && role == Role::Controller {
        notify_clients(&registry, CONTROLLER_DISCONNECTED).await;
    }

    tracing::info!(role = %role, session_id = %session_id, "relay session closed");
}
