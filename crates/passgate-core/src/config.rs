//! Engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::keystore::{KeyAlgorithm, KeyPolicy};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// First component of every key alias
    #[serde(default = "default_prefix")]
    pub key_alias_prefix: String,

    /// Cipher the scan key is generated for
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,

    /// Mismatches tolerated within one scan before it is failed.
    /// `None` leaves exhaustion entirely to the platform.
    #[serde(default = "default_max_unrecognized")]
    pub max_unrecognized_attempts: Option<u32>,
}

fn default_prefix() -> String {
    "passgate".to_string()
}

fn default_max_unrecognized() -> Option<u32> {
    Some(5)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_alias_prefix: default_prefix(),
            key_algorithm: KeyAlgorithm::default(),
            max_unrecognized_attempts: default_max_unrecognized(),
        }
    }
}

impl EngineConfig {
    /// Key policy derived from this configuration
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy::biometric(self.key_algorithm)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_alias_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("key_alias_prefix must not be empty".into()));
        }
        if self.max_unrecognized_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "max_unrecognized_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.json");

        let config = EngineConfig {
            key_alias_prefix: "lockscreen".into(),
            key_algorithm: KeyAlgorithm::XChaCha20Poly1305,
            max_unrecognized_attempts: None,
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());

        let config: EngineConfig =
            serde_json::from_str(r#"{"key_algorithm": "xchacha20-poly1305"}"#).unwrap();
        assert_eq!(config.key_algorithm, KeyAlgorithm::XChaCha20Poly1305);
    }

    #[test]
    fn test_validate() {
        assert!(EngineConfig::default().validate().is_ok());

        let config = EngineConfig {
            key_alias_prefix: " ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            max_unrecognized_attempts: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"max_unrecognized_attempts": 0}"#).unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
