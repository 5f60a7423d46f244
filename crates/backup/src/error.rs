//! Backup Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Failures from the storage, archive
//! and config crates are kept as children of the kind raised here.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A backup error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required provider setting is missing. Raised before any I/O; the
    /// user has to fix their settings.
    #[display("configuration error: {_0}")]
    Configuration(#[error(not(source))] String),
    /// The backup manifest is unreadable or structurally invalid.
    #[display("invalid backup manifest")]
    ManifestParse,
    /// Packing or unpacking the archive failed.
    #[display("archive error")]
    Archive,
    /// A single file could not be moved into place during restore. Files
    /// moved before the failure stay where they are.
    #[display("failed to move {} to {}", from.display(), to.display())]
    MoveFailed { from: PathBuf, to: PathBuf },
    /// The backup provider rejected an operation.
    #[display("storage error")]
    Storage,
    /// The external manifest generator failed or couldn't be found.
    #[display("manifest generator failed: {_0}")]
    Generator(#[error(not(source))] String),
    /// The user profile path for a Wine prefix couldn't be determined.
    #[display("could not resolve user profile")]
    Profile,
    /// The sidecar metadata couldn't be written.
    #[display("failed to write metadata: {}", _0.display())]
    Metadata(#[error(not(source))] PathBuf),
    /// Local filesystem work (staging directory) failed.
    #[display("I/O error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Metadata(_) | Self::Io(_))
    }
}
