//! HTTP API server for the bioreactor gateway

pub mod commands;
mod error;
pub mod health;
pub mod relay;
pub mod telemetry;

pub use error::ApiError;

use std::future::Future;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bridge::{BrokerLink, InboundActivity};
use crate::commands::CommandRouter;
use crate::sessions::SharedRegistry;
use crate::store::EventLog;
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub log: EventLog,
    pub registry: SharedRegistry,
    pub commands: CommandRouter,
    /// Broker traffic monitor, present when the bridge runs
    pub activity: Option<InboundActivity>,
}

/// Builder for [`ApiServer`]
pub struct ApiServerBuilder {
    log: EventLog,
    registry: SharedRegistry,
    broker: Option<Arc<dyn BrokerLink>>,
    activity: Option<InboundActivity>,
    host: String,
    port: u16,
    cors_origins: Vec<String>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(log: EventLog, registry: SharedRegistry) -> Self {
        Self {
            log,
            registry,
            broker: None,
            activity: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
        }
    }

    /// Route commands through this broker when no controller session exists
    #[must_use]
    pub fn broker(mut self, broker: Arc<dyn BrokerLink>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn activity(mut self, activity: InboundActivity) -> Self {
        self.activity = Some(activity);
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Allowed CORS origins; empty or `*` allows any
    #[must_use]
    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let commands = CommandRouter::new(Arc::clone(&self.registry), self.broker);
        let state = Arc::new(ApiState {
            log: self.log,
            registry: self.registry,
            commands,
            activity: self.activity,
        });

        ApiServer {
            state,
            host: self.host,
            port: self.port,
            cors_origins: self.cors_origins,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
    cors_origins: Vec<String>,
}

impl ApiServer {
    #[must_use]
    pub fn state(&self) -> Arc<ApiState> {
        Arc::clone(&self.state)
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .nest("/execute", commands::router(self.state.clone()))
            .merge(telemetry::router(self.state.clone()))
            .merge(relay::router(self.state.registry.clone()))
            .merge(health::router(self.state.clone()))
            .layer(cors_layer(&self.cors_origins))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn<F>(self, shutdown: F) -> tokio::task::JoinHandle<Result<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

/// CORS layer for the dashboard origins
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    cors.allow_origin(AllowOrigin::list(allowed))
}
