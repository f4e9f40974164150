use super::schema::RelayConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "reprelay.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    /// The file that failed to load.
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Candidate files in lookup order: the working directory first, then
    /// `~/.reprelay/config.yaml`.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".").join(LOCAL_CONFIG_FILE)];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".reprelay").join("config.yaml"));
        }
        paths
    }

    /// Load the first existing file from [`ConfigLoader::search_paths`], or
    /// the built-in defaults when there is none.
    pub async fn load_default() -> Result<RelayConfig, ConfigError> {
        for path in Self::search_paths() {
            if path.exists() {
                return Self::load_from(&path).await;
            }
        }
        debug!("no config file found, using defaults");
        Ok(RelayConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<RelayConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: RelayConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), port = config.server.port, "loaded relay config");
        Ok(config)
    }
}
