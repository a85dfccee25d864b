//! Error types for boardstack-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for boardstack-core operations.
pub type Result<T> = std::result::Result<T, StackError>;

/// Errors that abort the bootstrap sequence.
///
/// Failures of the orchestrator's `up` call are not represented here: the
/// launcher classifies those as [`LaunchFailure`](crate::LaunchFailure) and
/// retries them against another mirror.
#[derive(Debug, Error)]
pub enum StackError {
    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Downloading a binary or archive failed
    #[error("download of {url} failed: {reason}")]
    Download {
        /// Source URL
        url: String,
        /// Human-readable cause
        reason: String,
    },

    /// The runtime archive could not be unpacked
    #[error("failed to extract {archive}: {reason}")]
    Extract {
        /// Archive path on disk
        archive: PathBuf,
        /// Human-readable cause
        reason: String,
    },

    /// A binary is still missing after install
    #[error("binary not found after install: {0}")]
    BinaryMissing(PathBuf),

    /// A subprocess could not be spawned
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// `<binary> --version` exited non-zero
    #[error("version check for {binary} failed (exit code {exit_code}): {stderr}")]
    VersionCheck {
        /// Binary that was checked
        binary: PathBuf,
        /// Exit code reported by the process
        exit_code: i32,
        /// Captured stderr
        stderr: String,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
