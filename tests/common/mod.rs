//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bioreactor_gateway::{
    ApiServerBuilder, BrokerLink, ClientPolicy, ConnectionRegistry, EventLog, SchemaVersion,
    SharedRegistry,
};
use tempfile::TempDir;
use tower::ServiceExt;

/// Broker stand-in that records published commands
#[derive(Default)]
pub struct FakeBroker {
    pub connected: AtomicBool,
    pub published: Mutex<Vec<serde_json::Value>>,
}

impl FakeBroker {
    pub fn connected() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        })
    }

    pub fn published(&self) -> Vec<serde_json::Value> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerLink for FakeBroker {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_command(&self, payload: &serde_json::Value) -> bioreactor_gateway::Result<()> {
        self.published.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Router over a throwaway log file
pub struct TestApp {
    // Keeps the log directory alive
    _dir: TempDir,
    pub log: EventLog,
    pub registry: SharedRegistry,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_broker(broker: Arc<FakeBroker>) -> Self {
        Self::build(Some(broker))
    }

    fn build(broker: Option<Arc<FakeBroker>>) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let log = EventLog::open(dir.path().join("data.csv"), SchemaVersion::CURRENT)
            .expect("failed to open test log");
        let registry = Arc::new(ConnectionRegistry::new(
            ClientPolicy::Multiple,
            Duration::from_millis(100),
        ));

        let mut builder = ApiServerBuilder::new(log.clone(), Arc::clone(&registry));
        if let Some(broker) = broker {
            builder = builder.broker(broker);
        }
        let router = builder.build().router();

        Self {
            _dir: dir,
            log,
            registry,
            router,
        }
    }

    /// Send a request and decode the JSON body
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.post_raw(uri, body.to_string()).await
    }

    pub async fn post_raw(&self, uri: &str, body: String) -> (StatusCode, serde_json::Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}
