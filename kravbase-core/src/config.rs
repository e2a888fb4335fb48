//! Engine configuration.
//!
//! Frontends ship a small JSON config file; environment variables override
//! individual fields for local development.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Environment variable overriding the API base path.
pub const ENV_API_BASE: &str = "KRAVBASE_API_BASE";
/// Environment variable overriding the default copy batch size.
pub const ENV_BATCH_SIZE: &str = "KRAVBASE_BATCH_SIZE";

/// Tunables of the synchronization engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix prepended to every request path.
    pub api_base: String,
    /// Default chunk size for cross-project bulk copies.
    pub batch_size: usize,
    /// Whether topic changes schedule an authoritative refresh of dependent
    /// entity lists.
    pub dependent_refresh: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            batch_size: 50,
            dependent_refresh: true,
        }
    }
}

impl EngineConfig {
    /// Loads the config from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Loads the config if the file exists, otherwise starts from defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Applies environment overrides. An override that is present but
    /// unparseable is an error, not a silent fallback.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(base) = env::var(ENV_API_BASE) {
            self.api_base = base;
        }
        if let Ok(size) = env::var(ENV_BATCH_SIZE) {
            self.batch_size = size
                .parse()
                .with_context(|| format!("Invalid {}: {:?}", ENV_BATCH_SIZE, size))?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.api_base, "");
        assert_eq!(config.batch_size, 50);
        assert!(config.dependent_refresh);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(
            &path,
            r#"{"api_base": "/api/v2", "batch_size": 25}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.api_base, "/api/v2");
        assert_eq!(config.batch_size, 25);
        // Unspecified fields keep their defaults.
        assert!(config.dependent_refresh);
    }

    #[test]
    fn test_load_missing_file_fails_with_context() {
        let dir = TempDir::new().unwrap();
        let result = EngineConfig::load(dir.path().join("absent.json"));
        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("Failed to read config file"));
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_config_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, "{not json").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
