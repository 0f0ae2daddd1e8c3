//! Locating and reading the driver configuration file.

use std::path::{Path, PathBuf};

use super::DriverConfig;

/// Local file name checked in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".cli-driver.toml";

/// Where configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Probe these paths in order; defaults apply if none exists.
    Search(Vec<PathBuf>),
    /// A file the user named explicitly; it must exist.
    Explicit(PathBuf),
}

/// Resolves a [`ConfigSource`] into a [`DriverConfig`].
#[derive(Debug)]
pub struct ConfigLoader {
    source: ConfigSource,
}

impl ConfigLoader {
    /// Search `./.cli-driver.toml`, then `<config dir>/cli-driver/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("cli-driver").join("config.toml"));
        }
        Self {
            source: ConfigSource::Search(paths),
        }
    }

    /// Load only `path`, failing if it is missing.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            source: ConfigSource::Explicit(path),
        }
    }

    #[must_use]
    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// The file that `load` would read, if any.
    #[must_use]
    pub fn resolve(&self) -> Option<&Path> {
        match &self.source {
            ConfigSource::Explicit(path) => Some(path.as_path()),
            ConfigSource::Search(paths) => paths.iter().find(|p| p.is_file()).map(PathBuf::as_path),
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for an explicit path that does not
    /// exist, and `Read`/`Parse` errors for a file that cannot be used.
    pub fn load(&self) -> Result<DriverConfig, ConfigError> {
        let Some(path) = self.resolve() else {
            tracing::debug!("no config file found, using defaults");
            return Ok(DriverConfig::default());
        };
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        tracing::debug!(path = %path.display(), "loading config file");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
