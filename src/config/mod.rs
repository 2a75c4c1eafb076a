//! Configuration management for the bioreactor gateway
//!
//! Every setting resolves as environment variable, then config file, then
//! default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::BridgeConfig;
use crate::schema::SchemaVersion;
use crate::sessions::{ClientPolicy, DEFAULT_SEND_TIMEOUT};
use crate::store::DEFAULT_FILE_NAME;
use crate::Result;

use file::GatewayConfigFile;

/// Bioreactor gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Telemetry log configuration
    pub storage: StorageConfig,

    /// Relay session configuration
    pub sessions: SessionConfig,

    /// Broker bridge configuration
    pub mqtt: BridgeConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the telemetry log
    pub data_dir: PathBuf,
    pub file_name: String,
    pub schema: SchemaVersion,
}

impl StorageConfig {
    /// Full path of the telemetry log
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub clients: ClientPolicy,
    pub send_timeout: Duration,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an unrecognized value
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve settings from a parsed config file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting has an unrecognized value
    pub fn resolve<F>(fc: GatewayConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // API server config (env > toml > default)
        let api_server = ApiServerConfig {
            host: env("BIOREACTOR_HOST")
                .or(fc.server.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env("BIOREACTOR_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(8000),
            cors_origins: env("BIOREACTOR_CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .or(fc.server.cors_origins)
                .unwrap_or_default(),
        };

        // Data directory (~/.local/share/bioreactor/gateway on Linux)
        let data_dir = env("BIOREACTOR_DATA_DIR")
            .map(PathBuf::from)
            .or(fc.storage.data_dir)
            .unwrap_or_else(default_data_dir);

        let schema = match env("BIOREACTOR_SCHEMA").or(fc.storage.schema) {
            Some(raw) => raw.parse::<SchemaVersion>()?,
            None => SchemaVersion::CURRENT,
        };

        let storage = StorageConfig {
            data_dir,
            file_name: fc
                .storage
                .file_name
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
            schema,
        };

        let clients = match env("BIOREACTOR_CLIENTS") {
            Some(raw) => raw.parse()?,
            None => fc.sessions.clients.unwrap_or_default(),
        };
        let sessions = SessionConfig {
            clients,
            send_timeout: env("BIOREACTOR_SEND_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .or(fc.sessions.send_timeout_ms)
                .map_or(DEFAULT_SEND_TIMEOUT, Duration::from_millis),
        };

        // Broker config (env > toml > default)
        let defaults = BridgeConfig::default();
        let mqtt = BridgeConfig {
            enabled: env("BIOREACTOR_MQTT_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.mqtt.enabled)
                .unwrap_or(defaults.enabled),
            host: env("BIOREACTOR_MQTT_HOST")
                .or(fc.mqtt.host)
                .unwrap_or(defaults.host),
            port: env("BIOREACTOR_MQTT_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.mqtt.port)
                .unwrap_or(defaults.port),
            client_id: env("BIOREACTOR_MQTT_CLIENT_ID")
                .or(fc.mqtt.client_id)
                .unwrap_or(defaults.client_id),
            keep_alive: fc
                .mqtt
                .keep_alive_secs
                .map_or(defaults.keep_alive, Duration::from_secs),
            topic_prefix: env("BIOREACTOR_MQTT_PREFIX")
                .or(fc.mqtt.topic_prefix)
                .unwrap_or(defaults.topic_prefix),
        };

        Ok(Self {
            api_server,
            storage,
            sessions,
            mqtt,
        })
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("."),
        |d| d.data_dir().join("bioreactor").join("gateway"),
    )
}
