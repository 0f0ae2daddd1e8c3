//! Interface error types.

use std::path::PathBuf;

use crate::process::SpawnError;

/// Errors returned synchronously by the [`Interface`](super::Interface).
#[derive(thiserror::Error, Debug)]
pub enum InterfaceError {
    /// No executable path was given.
    #[error("Executable path is empty")]
    EmptyPath,

    /// Nothing exists at the executable path.
    #[error("Executable not found: {0}")]
    NotFound(PathBuf),

    /// The path exists but is not a regular file.
    #[error("Not a file: {0}")]
    NotAFile(PathBuf),

    /// The file has no executable permission bit.
    #[error("Not executable: {0}")]
    NotExecutable(PathBuf),

    /// The child process could not be spawned.
    #[error("Failed to spawn process: {0}")]
    Spawn(#[from] SpawnError),

    /// The run ended without delivering a completion.
    #[error("Run finished without reporting completion")]
    CompletionLost,
}

/// Error decoded from what a finished run wrote to stderr.
///
/// Delivered alongside the decoded response, never instead of it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    Stderr(String),
}

impl CommandError {
    /// Build an error from stderr bytes; `None` when there is no text.
    #[must_use]
    pub fn from_stderr(bytes: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_end();
        if text.trim_start().is_empty() {
            None
        } else {
            Some(Self::Stderr(text.to_string()))
        }
    }

    /// The stderr text this error wraps.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Stderr(text) => text,
        }
    }
}
