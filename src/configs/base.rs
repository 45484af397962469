use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    common::errors::{Error, Result},
    configs::*,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Loads `config.toml`, then `config.default.toml`, falling back to
    /// built-in defaults when neither exists.
    pub fn load() -> Result<Self> {
        for candidate in ["config.toml", "config.default.toml"] {
            if Path::new(candidate).exists() {
                return Self::load_from(candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml(&config_str)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).map_err(|e| Error::Config(e.to_string()))
    }
}
