//! Config file discovery

use std::env;
use std::path::PathBuf;

use tracing::info;

use super::{ConfigError, QueuesConfig};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

const CONFIG_PATHS: &[&str] = &["herald.toml", "./config/herald.toml", "/etc/herald/herald.toml"];

/// Finds and loads the queue configuration.
///
/// Search order: explicit path, `HERALD_CONFIG`, then the standard paths.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<QueuesConfig, ConfigError> {
        let path = self.find_config_file().ok_or(ConfigError::NotFound)?;
        info!(?path, "Loading queue configuration");
        QueuesConfig::load(&path)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        // An explicit path is used as-is so a typo surfaces as a read error.
        if let Some(path) = &self.config_path {
            return Some(path.clone());
        }

        if let Ok(path) = env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}
