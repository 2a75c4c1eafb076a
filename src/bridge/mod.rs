//! MQTT bridge to the controller
//!
//! Secondary transport used when the controller has no live WebSocket
//! session. A background task owns the broker connection and drives the
//! state machine:
//!
//! ```text
//! disconnected ──start──▶ connecting ──ConnAck──▶ connected
//!      ▲                      ▲                       │
//!      └──────── error ───────┴──── backoff ◀─────────┘
//! ```
//!
//! On every `ConnAck` the status and sensor topics are (re)subscribed.
//! Inbound publishes are handed to [`monitor::run_monitor`] over a channel.

pub mod monitor;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::{Error, Result};

pub use monitor::{InboundActivity, InboundMessage, run_monitor};

/// Base delay before reconnecting; doubles per consecutive failure
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Reconnect delay cap
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Request queue depth between the client handle and the event loop
const REQUEST_CAPACITY: usize = 16;

/// Inbound message queue depth
const INBOUND_CAPACITY: usize = 64;

/// Seam between command routing and the broker transport
#[async_trait]
pub trait BrokerLink: Send + Sync {
    /// Whether the broker has acknowledged the current connection
    fn is_connected(&self) -> bool;

    /// Publish a rendered command to the commands topic
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the publish could not be queued
    async fn publish_command(&self, payload: &serde_json::Value) -> Result<()>;
}

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
}

/// Broker bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Start the bridge at all
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Prefix for the `commands`, `status` and `sensors` topics
    pub topic_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 1883,
            client_id: format!("bioreactor-gateway-{}", &suffix[..8]),
            keep_alive: Duration::from_secs(60),
            topic_prefix: "bioreactor".to_string(),
        }
    }
}

/// Fully qualified topic names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub commands: String,
    pub status: String,
    pub sensors: String,
}

impl Topics {
    #[must_use]
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            commands: format!("{prefix}/commands"),
            status: format!("{prefix}/status"),
            sensors: format!("{prefix}/sensors"),
        }
    }
}

/// Delay before reconnect attempt number `attempt` (zero-based)
#[must_use]
pub fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RECONNECT_MAX_DELAY)
}

/// Running MQTT bridge
pub struct MqttBridge {
    client: AsyncClient,
    topics: Topics,
    state: watch::Receiver<BridgeState>,
    stop: watch::Sender<bool>,
    activity: InboundActivity,
}

impl MqttBridge {
    /// Spawn the connection task and the inbound monitor
    ///
    /// Returns immediately in the `connecting` state; connection failures
    /// are retried in the background.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Broker`] if the broker address or client id is empty
    pub fn start(config: &BridgeConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(Error::Broker("broker host is empty".to_string()));
        }
        if config.client_id.trim().is_empty() {
            return Err(Error::Broker("client id is empty".to_string()));
        }

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let topics = Topics::with_prefix(&config.topic_prefix);
        let (state_tx, state) = watch::channel(BridgeState::Connecting);
        let (stop, stop_rx) = watch::channel(false);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let activity = InboundActivity::new();
        tokio::spawn(run_monitor(inbound_rx, activity.clone()));

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "starting MQTT bridge"
        );

        tokio::spawn(connection_loop(
            client.clone(),
            eventloop,
            topics.clone(),
            state_tx,
            inbound_tx,
            stop_rx,
        ));

        Ok(Self {
            client,
            topics,
            state,
            stop,
            activity,
        })
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state.clone()
    }

    #[must_use]
    pub const fn topics(&self) -> &Topics {
        &self.topics
    }

    #[must_use]
    pub const fn activity(&self) -> &InboundActivity {
        &self.activity
    }

    /// Disconnect from the broker and stop the background tasks
    ///
    /// The inbound monitor stops on its own once the connection task exits.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);

        // The connection task drops its state sender on exit
        let mut state = self.state.clone();
        let stopped = tokio::time::timeout(Duration::from_secs(2), async {
            while state.changed().await.is_ok() {}
        })
        .await;

        if stopped.is_err() {
            tracing::warn!("MQTT bridge did not stop in time");
        } else {
            tracing::info!("MQTT bridge stopped");
        }
    }
}

#[async_trait]
impl BrokerLink for MqttBridge {
    fn is_connected(&self) -> bool {
        self.state() == BridgeState::Connected
    }

    async fn publish_command(&self, payload: &serde_json::Value) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("broker not connected".to_string()));
        }

        let bytes = serde_json::to_vec(payload)?;
        self.client
            .try_publish(&self.topics.commands, QoS::AtLeastOnce, false, bytes)
            .map_err(|e| Error::Transport(format!("publish to {} failed: {e}", self.topics.commands)))?;

        tracing::debug!(topic = %self.topics.commands, "command published");
        Ok(())
    }
}

/// Own the event loop until shutdown
async fn connection_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Topics,
    state: watch::Sender<BridgeState>,
    inbound: mpsc::Sender<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                failures = 0;
                state.send_replace(BridgeState::Connected);
                tracing::info!("connected to MQTT broker");

                for topic in [&topics.status, &topics.sensors] {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        tracing::warn!(topic = %topic, error = %e, "subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = InboundMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                    received_at: Utc::now(),
                };
                if inbound.try_send(msg).is_err() {
                    tracing::warn!("broker monitor lagging, inbound message dropped");
                }
            }
            Ok(_) => {}
            Err(e) => {
                let was = state.send_replace(BridgeState::Disconnected);
                let delay = reconnect_delay(failures);
                failures = failures.saturating_add(1);

                if was == BridgeState::Connected {
                    tracing::warn!(error = %e, "lost MQTT broker connection");
                } else {
                    tracing::debug!(error = %e, attempt = failures, "MQTT connect failed");
                }

                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                state.send_replace(BridgeState::Connecting);
            }
        }
    }

    disconnect(&client, &mut eventloop).await;
    state.send_replace(BridgeState::Disconnected);
}

/// Send DISCONNECT and give the event loop a moment to flush it
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_use_prefix() {
        let topics = Topics::with_prefix("bioreactor/");
        assert_eq!(topics.commands, "bioreactor/commands");
        assert_eq!(topics.status, "bioreactor/status");
        assert_eq!(topics.sensors, "bioreactor/sensors");
    }

    #[test]
    fn reconnect_delay_doubles_and_caps() {
        assert_eq!(reconnect_delay(0), Duration::from_millis(500));
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(10), RECONNECT_MAX_DELAY);
        assert_eq!(reconnect_delay(u32::MAX), RECONNECT_MAX_DELAY);
    }

    #[test]
    fn default_config_points_at_local_broker() {
        let config = BridgeConfig::default();
        assert!(config.enabled);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert!(config.client_id.starts_with("bioreactor-gateway-"));
    }

    #[tokio::test]
    async fn rejects_empty_client_id() {
        let config = BridgeConfig {
            client_id: String::new(),
            ..BridgeConfig::default()
        };
        assert!(matches!(MqttBridge::start(&config), Err(Error::Broker(_))));
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&BridgeState::Connected).unwrap();
        assert_eq!(json, "\"connected\"");
    }

    #[tokio::test]
    async fn unreachable_broker_never_reports_connected() {
        let config = BridgeConfig {
            host: "127.0.0.1".to_string(),
            // Nothing listens on the discard port in test environments
            port: 9,
            ..BridgeConfig::default()
        };
        let bridge = MqttBridge::start(&config).unwrap();

        assert!(!bridge.is_connected());
        let err = bridge
            .publish_command(&serde_json::json!({"program": "stop"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        bridge.shutdown().await;
    }
}
