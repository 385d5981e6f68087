//! Unified error type for the corral workspace.
//!
//! Setup failures are fatal by policy, so most variants carry enough context
//! (operation and path) to produce a single diagnostic line before exit.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation on a host path failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A kernel call used to build the isolation boundary failed.
    #[error("{operation} failed on {target}: {source}")]
    Syscall {
        /// Name of the failing operation (`mount-proc`, `pivot_root`, ...).
        operation: &'static str,
        /// Path or object the operation targeted.
        target: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// The parent/child readiness handshake broke down.
    #[error("readiness handshake failed: {message}")]
    Handshake {
        /// Description of the failure.
        message: String,
    },

    /// An external collaborator command exited unsuccessfully.
    #[error("{command} exited unsuccessfully ({status})")]
    Collaborator {
        /// Command that was run.
        command: String,
        /// Exit status as reported by the OS.
        status: String,
    },
}

impl CorralError {
    /// Shorthand for a [`CorralError::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`CorralError::Syscall`] error.
    pub fn syscall(
        operation: &'static str,
        target: impl std::fmt::Display,
        source: impl Into<std::io::Error>,
    ) -> Self {
        Self::Syscall {
            operation,
            target: target.to_string(),
            source: source.into(),
        }
    }

    /// Returns `true` for errors raised before any kernel state was touched.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;
