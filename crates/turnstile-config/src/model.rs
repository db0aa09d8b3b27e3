use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level application configuration, loaded from `turnstile.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayListenConfig,
    /// Directory holding the SQLite database. Defaults to `./data`.
    pub data_dir: Option<PathBuf>,
    /// Gateway id used for scans that don't name one.
    pub default_gateway_id: String,
}

/// Listen address for the HTTP gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayListenConfig::default(),
            data_dir: None,
            default_gateway_id: "GATEWAY-001".to_string(),
        }
    }
}
