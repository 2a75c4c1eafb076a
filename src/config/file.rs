//! TOML configuration file loading
//!
//! Supports `~/.config/bioreactor/gateway/config.toml` (or `$BIOREACTOR_CONFIG`)
//! as a persistent config source. All fields are optional; the file is a
//! partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::sessions::ClientPolicy;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "BIOREACTOR_CONFIG";

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct GatewayConfigFile {
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Telemetry log location and layout
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// Relay session behaviour
    #[serde(default)]
    pub sessions: SessionsFileConfig,

    /// Broker bridge
    #[serde(default)]
    pub mqtt: MqttFileConfig,
}

/// HTTP server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Allowed dashboard origins
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    pub data_dir: Option<PathBuf>,
    pub file_name: Option<String>,
    /// Schema version (`v1` or `v2`)
    pub schema: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionsFileConfig {
    pub clients: Option<ClientPolicy>,
    /// Bound on a single send to a session, in milliseconds
    pub send_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MqttFileConfig {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub topic_prefix: Option<String>,
}

/// Load the config file, falling back to defaults if missing or invalid
#[must_use]
pub fn load_config_file() -> GatewayConfigFile {
    let Some(path) = config_file_path() else {
        return GatewayConfigFile::default();
    };

    if !path.exists() {
        return GatewayConfigFile::default();
    }

    match parse_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            GatewayConfigFile::default()
        }
    }
}

/// Read and parse one config file
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read and `Error::Toml` if it is
/// not a valid config file
pub fn parse_config_file(path: &Path) -> Result<GatewayConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Path of the config file
///
/// `$BIOREACTOR_CONFIG` wins over the platform config directory.
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(explicit));
    }
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("bioreactor")
            .join("gateway")
            .join("config.toml")
    })
}
