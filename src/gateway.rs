//! Gateway - the main bioreactor service
//!
//! Opens the telemetry log, starts the broker bridge and serves the HTTP and
//! relay API until interrupted.

use std::sync::Arc;

use crate::api::ApiServerBuilder;
use crate::bridge::{BrokerLink, MqttBridge};
use crate::sessions::{ConnectionRegistry, SharedRegistry};
use crate::store::EventLog;
use crate::{Config, Result};

/// The bioreactor gateway
pub struct Gateway {
    config: Config,
    log: EventLog,
    registry: SharedRegistry,
}

impl Gateway {
    /// Create a gateway, opening (or creating) the telemetry log
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be created or its header belongs to
    /// another schema version
    pub fn new(config: Config) -> Result<Self> {
        let path = config.storage.log_path();
        let log = EventLog::open(&path, config.storage.schema)?;

        tracing::info!(
            path = %path.display(),
            schema = %config.storage.schema,
            "telemetry log ready"
        );

        let registry = Arc::new(ConnectionRegistry::new(
            config.sessions.clients,
            config.sessions.send_timeout,
        ));

        Ok(Self {
            config,
            log,
            registry,
        })
    }

    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.log
    }

    #[must_use]
    pub const fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Serve until Ctrl-C, then stop the bridge
    ///
    /// # Errors
    ///
    /// Returns error if the bridge cannot start or the server fails to bind
    pub async fn run(self) -> Result<()> {
        let bridge = if self.config.mqtt.enabled {
            Some(Arc::new(MqttBridge::start(&self.config.mqtt)?))
        } else {
            tracing::info!("MQTT bridge disabled");
            None
        };

        let mut builder = ApiServerBuilder::new(self.log, Arc::clone(&self.registry))
            .host(self.config.api_server.host.clone())
            .port(self.config.api_server.port)
            .cors_origins(self.config.api_server.cors_origins.clone());

        if let Some(bridge) = &bridge {
            builder = builder
                .broker(Arc::clone(bridge) as Arc<dyn BrokerLink>)
                .activity(bridge.activity().clone());
        }

        let served = builder.build().run(shutdown_signal()).await;

        if let Some(bridge) = bridge {
            bridge.shutdown().await;
        }

        tracing::info!("gateway stopped");
        served
    }
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
