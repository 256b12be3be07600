//! Configuration file loading and environment overrides.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::model::GatewayConfig;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_VAR: &str = "GATEWAY_CONFIG";

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("could not read configuration file {path}")]
    Read {
        /// File that failed to read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The file contents could not be parsed
    #[error("could not parse configuration: {detail}")]
    Parse {
        /// Parser failure detail
        detail: String,
    },

    /// The file extension names no supported format
    #[error("unsupported configuration format for {path}; expected .yaml, .yml, or .toml")]
    UnsupportedFormat {
        /// Offending path
        path: PathBuf,
    },

    /// A constraint check failed after parsing
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An environment override carried an unusable value
    #[error("invalid value in {var}: {detail}")]
    EnvOverride {
        /// Variable that failed to parse
        var: String,
        /// Parse failure detail
        detail: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

impl GatewayConfig {
    /// Load, override from the environment, and validate.
    ///
    /// Reads the file named by `GATEWAY_CONFIG` when set, otherwise runs
    /// on defaults. `GATEWAY_HOST`, `GATEWAY_PORT`, `GATEWAY_LOG_LEVEL`,
    /// and `GATEWAY_LOG_JSON` override their file counterparts.
    ///
    /// # Errors
    /// Returns error if the file cannot be loaded or a constraint fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                debug!("no configuration file set, using defaults");
                Self::default()
            }
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, dispatching on its extension.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(&text)?,
            Some("toml") => Self::from_toml(&text)?,
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };
        info!(
            path = %path.display(),
            providers = config.providers.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse a YAML document.
    ///
    /// # Errors
    /// Returns error if the document does not match the model.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|err| ConfigError::Parse {
            detail: err.to_string(),
        })
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns error if the document does not match the model.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse {
            detail: err.to_string(),
        })
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = get("GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("GATEWAY_PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::EnvOverride {
                var: "GATEWAY_PORT".to_string(),
                detail: format!("{port} is not a port number"),
            })?;
        }
        if let Some(level) = get("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = get("GATEWAY_LOG_JSON") {
            self.logging.json = json.parse().map_err(|_| ConfigError::EnvOverride {
                var: "GATEWAY_LOG_JSON".to_string(),
                detail: format!("{json} is not a boolean"),
            })?;
        }
        Ok(())
    }
}
