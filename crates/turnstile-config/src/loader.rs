use std::path::Path;

use tracing::info;
use turnstile_common::{Error, Result};

use crate::model::AppConfig;

/// Loads `AppConfig` from a TOML file, falling back to defaults when the
/// file does not exist.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            info!(
                "no config file at {}, using built-in defaults",
                path.display()
            );
            return Ok(AppConfig::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

        info!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ConfigLoader::load(Path::new("/nonexistent/turnstile.toml")).unwrap();
        assert_eq!(config.gateway.port, 8000);
    }

    #[test]
    fn loads_values_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turnstile.toml");
        std::fs::write(
            &path,
            "default_gateway_id = \"GATE-EAST\"\n\n[gateway]\nhost = \"127.0.0.1\"\nport = 8080\n",
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.default_gateway_id, "GATE-EAST");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turnstile.toml");
        std::fs::write(&path, "gateway = 12").unwrap();

        let err = ConfigLoader::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
