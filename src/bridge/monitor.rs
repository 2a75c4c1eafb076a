//! Consumer for messages arriving from the broker

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};

/// A publish received on a subscribed topic
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Last time a message arrived, per topic
#[derive(Debug, Clone, Default)]
pub struct InboundActivity(Arc<RwLock<HashMap<String, DateTime<Utc>>>>);

impl InboundActivity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, topic: &str, at: DateTime<Utc>) {
        self.0.write().await.insert(topic.to_string(), at);
    }

    /// Copy of the per-topic timestamps
    pub async fn snapshot(&self) -> HashMap<String, DateTime<Utc>> {
        self.0.read().await.clone()
    }
}

/// Drain inbound broker messages until the sending side closes
///
/// Payloads are expected to be JSON mappings; they are logged and their
/// arrival recorded, nothing else.
pub async fn run_monitor(mut rx: mpsc::Receiver<InboundMessage>, activity: InboundActivity) {
    while let Some(msg) = rx.recv().await {
        activity.record(&msg.topic, msg.received_at).await;

        match serde_json::from_slice::<serde_json::Value>(&msg.payload) {
            Ok(payload) => {
                tracing::debug!(topic = %msg.topic, %payload, "broker message received");
            }
            Err(e) => {
                tracing::warn!(
                    topic = %msg.topic,
                    bytes = msg.payload.len(),
                    error = %e,
                    "malformed broker message"
                );
            }
        }
    }
    tracing::debug!("broker monitor stopped");
}
