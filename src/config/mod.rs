//! Configuration module for mlpipe-rs
//!
//! Registry behaviour that is chosen per deployment rather than per call:
//! - Dispatch mode (inline or queued) and queue capacity
//! - Eager entry population at pipeline creation
//! - Logging filter, output format and optional log file
//!
//! # Config Location
//!
//! `load_or_default` looks in these places, first match wins:
//! 1. The path in the `MLPIPE_CONFIG` environment variable
//! 2. `registry.toml` in the platform config directory:
//!    - **Linux**: `~/.config/dev.mlpipe.registry/`
//!    - **macOS**: `~/Library/Application Support/dev.mlpipe.registry/`
//!    - **Windows**: `%APPDATA%\dev.mlpipe.registry\`
//!
//! Files ending in `.json` are read as JSON, everything else as TOML.
//!
//! # Example
//!
//! ```ignore
//! use mlpipe_rs::config::{DispatchMode, RegistryConfig};
//!
//! let mut config = RegistryConfig::load_or_default();
//! config.dispatch.mode = DispatchMode::Queued;
//! config.save("registry.toml")?;
//! ```

use crate::error::{MlPipeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.mlpipe.registry";

/// Config filename inside the config directory
pub const CONFIG_FILE: &str = "registry.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV_VAR: &str = "MLPIPE_CONFIG";

/// Current config format version
pub const CONFIG_VERSION: u32 = 1;

/// Default per-listener queue capacity in queued mode
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Platform config directory for this application
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Path `load_or_default` reads from, if one can be determined
pub fn default_config_path() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => config_dir().map(|p| p.join(CONFIG_FILE)),
    }
}

// ==================== Dispatch ====================

/// How engine events reach listeners
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Run listeners on the engine thread under the entry lock
    #[default]
    Inline,
    /// Hand payloads to a per-listener worker thread
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    /// Bounded queue length per listener (queued mode only)
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Inline,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// ==================== Logging ====================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
    pub format: LogFormat,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::Full,
            file: None,
        }
    }
}

// ==================== Registry Config ====================

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub version: u32,
    /// Register an entry for every controllable node at pipeline creation
    pub eager_entries: bool,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            eager_entries: false,
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

impl RegistryConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MlPipeError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                MlPipeError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                MlPipeError::Config(format!("Failed to parse config {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            tracing::warn!("Could not determine config path, using defaults");
            return Self::default();
        };
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to disk, TOML unless the path ends in `.json`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MlPipeError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| MlPipeError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| MlPipeError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            MlPipeError::Config(format!("Failed to write config {:?}: {}", path, e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.queue_capacity == 0 {
            return Err(MlPipeError::Config(
                "dispatch.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(MlPipeError::Config(
                "logging.filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch.mode = mode;
        self
    }

    pub fn with_eager_entries(mut self, eager: bool) -> Self {
        self.eager_entries = eager;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.dispatch.mode, DispatchMode::Inline);
        assert_eq!(config.dispatch.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert!(!config.eager_entries);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RegistryConfig = toml::from_str(
            r#"
            eager_entries = true

            [dispatch]
            mode = "queued"
            "#,
        )
        .unwrap();

        assert!(config.eager_entries);
        assert_eq!(config.dispatch.mode, DispatchMode::Queued);
        assert_eq!(config.dispatch.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = RegistryConfig::default();
        config.dispatch.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(MlPipeError::Config(_))));

        let mut config = RegistryConfig::default();
        config.logging.filter = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_detection() {
        assert!(is_json(Path::new("a/b.JSON")));
        assert!(!is_json(Path::new("registry.toml")));
        assert!(!is_json(Path::new("noext")));
    }
}
