//! Configuration file loader.

use std::path::{Path, PathBuf};

use super::RunnerConfig;

/// Name of the per-project configuration file.
pub const PROJECT_CONFIG_FILE: &str = ".engine-runner.toml";

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .engine-runner.toml
        search_paths.push(PathBuf::from(PROJECT_CONFIG_FILE));

        // 2. User config directory: ~/.config/engine-runner/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("engine-runner").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<RunnerConfig, ConfigError> {
        self.load_with_source().map(|loaded| loaded.config)
    }

    /// Like [`load`](Self::load), also reporting which file was used.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load_with_source(&self) -> Result<LoadedConfig, ConfigError> {
        let Some(path) = self.find_config_file() else {
            tracing::debug!(searched = ?self.search_paths, "No config file found, using defaults");
            return Ok(LoadedConfig {
                config: RunnerConfig::default(),
                source: None,
            });
        };

        tracing::debug!(path = %path.display(), "Loading config file");
        let config = Self::parse_file(&path)?;
        Ok(LoadedConfig {
            config,
            source: Some(path),
        })
    }

    fn parse_file(path: &Path) -> Result<RunnerConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Locations checked, in priority order.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First search path that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.is_file()).cloned()
    }
}

/// A parsed configuration and the file it came from.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub config: RunnerConfig,
    /// `None` when no file was found and defaults are in effect.
    pub source: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
