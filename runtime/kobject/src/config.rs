//! Server configuration
//!
//! Loaded from TOML; every section and field is optional.
//!
//! ```toml
//! [handles]
//! max_per_process = 16384
//!
//! [namespace]
//! directories = ["\\BaseNamedObjects", "\\Sessions"]
//!
//! [completion]
//! max_pending_packets = 65536
//!
//! [log]
//! filter = "debug"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub handles: HandleConfig,
    pub namespace: NamespaceConfig,
    pub completion: CompletionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandleConfig {
    /// Open handles allowed per process, capped at `MAX_HANDLES`
    pub max_per_process: usize,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self { max_per_process: 16384 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamespaceConfig {
    /// Permanent directories created at startup, parents first
    pub directories: Vec<String>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            directories: vec!["\\BaseNamedObjects".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionConfig {
    /// Per-port packet limit; posts beyond it fail with an allocation error
    pub max_pending_packets: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `env_logger` filter used when `RUST_LOG` is not set
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.handles.max_per_process, 16384);
        assert_eq!(config.namespace.directories, vec!["\\BaseNamedObjects".to_string()]);
        assert_eq!(config.completion.max_pending_packets, None);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn test_partial_config() {
        let config = ServerConfig::from_toml_str(
            r#"
            [completion]
            max_pending_packets = 2

            [log]
            filter = "trace"
            "#,
        )
        .unwrap();
        assert_eq!(config.completion.max_pending_packets, Some(2));
        assert_eq!(config.log.filter, "trace");
        assert_eq!(config.handles, HandleConfig::default());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(matches!(
            ServerConfig::from_toml_str("[handles]\nmax = 3\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ServerConfig::load("/nonexistent/uk-server.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
