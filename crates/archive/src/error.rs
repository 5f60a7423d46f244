//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// The underlying I/O or format error is kept as the child of the raised
/// kind, unchanged.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The directory to pack doesn't exist or isn't a directory.
    #[display("source is not a directory: {}", _0.display())]
    SourceNotDirectory(#[error(not(source))] PathBuf),
    /// The directory to unpack into doesn't exist or isn't a directory.
    #[display("destination is not a directory: {}", _0.display())]
    DestinationNotDirectory(#[error(not(source))] PathBuf),
    /// Writing the archive failed (disk full, permissions, upload failure).
    #[display("failed to create archive")]
    Create,
    /// Reading or unpacking the archive failed (corrupt data, permissions).
    #[display("failed to extract archive")]
    Extract,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Create)
    }
}
