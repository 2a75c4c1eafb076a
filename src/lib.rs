//! Bioreactor Gateway - telemetry and command hub for a bioreactor controller
//!
//! This library provides the core functionality for the gateway:
//! - Telemetry normalization into a versioned column layout
//! - An append-only telemetry log
//! - A WebSocket relay between the controller and dashboards
//! - Command routing over the relay or an MQTT broker
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                        │
//! │   HTTP  │  WebSocket relay  │  MQTT topics           │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Bioreactor Gateway                    │
//! │   Normalizer  │  Event log  │  Registry  │  Router   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Controller (ESP32)                     │
//! │   Sensors  │  Programs  │  Actuators                 │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod schema;
pub mod sessions;
pub mod store;
pub mod telemetry;

pub use api::{ApiServer, ApiServerBuilder, ApiState};
pub use bridge::{BridgeConfig, BridgeState, BrokerLink, MqttBridge};
pub use commands::{Channel, Command, CommandRouter, DispatchOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use schema::SchemaVersion;
pub use sessions::{ClientPolicy, ConnectionRegistry, Role, SessionHandle, SharedRegistry};
pub use store::EventLog;
pub use telemetry::{EventKind, NormalizedRecord, Telemetry, TelemetryEvent, normalize};
