//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How environment overrides combine with the inherited environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvPolicy {
    /// Inherit the caller's environment and apply overrides on top.
    #[default]
    Inherit,
    /// Start from an empty environment containing only the overrides.
    Replace,
}

/// How privileged runs are launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevationConfig {
    /// Program prepended to elevated command lines.
    #[serde(default = "default_elevation_program")]
    pub program: String,
    /// Arguments placed between the elevation program and the executable.
    #[serde(default = "default_elevation_args")]
    pub args: Vec<String>,
    /// Environment variable holding the password written to stdin.
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_elevation_program() -> String {
    "sudo".to_string()
}

fn default_elevation_args() -> Vec<String> {
    // -S: read the password from stdin instead of the terminal.
    vec!["-S".to_string()]
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            program: default_elevation_program(),
            args: default_elevation_args(),
            password_env: None,
        }
    }
}

impl ElevationConfig {
    /// Read the password from `password_env`, if configured and set.
    #[must_use]
    pub fn password(&self) -> Option<String> {
        let var = self.password_env.as_deref()?;
        match std::env::var(var) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(var, error = %e, "elevation password variable not available");
                None
            }
        }
    }
}

/// Configuration for driving one executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Path to the executable to drive.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Working directory for spawned processes.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Environment variable overrides.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub env_policy: EnvPolicy,
    #[serde(default)]
    pub elevation: ElevationConfig,
    /// Milliseconds between SIGTERM and SIGKILL when terminating.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
    /// Milliseconds output is still read after the process has exited.
    #[serde(default = "default_drain_window_ms")]
    pub drain_window_ms: u64,
}

fn default_terminate_grace_ms() -> u64 {
    5000
}

fn default_drain_window_ms() -> u64 {
    500
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            executable: None,
            working_dir: None,
            env: BTreeMap::new(),
            env_policy: EnvPolicy::default(),
            elevation: ElevationConfig::default(),
            terminate_grace_ms: default_terminate_grace_ms(),
            drain_window_ms: default_drain_window_ms(),
        }
    }
}

impl DriverConfig {
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    #[must_use]
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }
}
