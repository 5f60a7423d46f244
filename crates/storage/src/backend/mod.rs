//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, the single contract that
//! both backup providers (local filesystem and remote object store) present
//! to the catalog and orchestrator.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::file::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::{Read, Write};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;
pub type BoxSyncWrite = Box<dyn Write + Send + 'static>;

/// Unified interface for backup providers.
///
/// All operations are asynchronous so that network-backed providers and the
/// local filesystem can be driven from the same flows. Archives are large
/// and produced/consumed by blocking tar code, so [`reader`](Self::reader)
/// and [`writer`](Self::writer) hand out synchronous streams meant to be
/// moved into [`spawn_blocking`](tokio::task::spawn_blocking).
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use savestash_storage::{backend::StorageBackend, error::Result};
///
/// async fn sidecar_size(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = Path::new("steam-42-1700000000000.tar.meta.json");
///     if backend.exists(path).await? {
///         Ok(backend.stat(path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging and to tag
    /// artifacts with the provider they were found in.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream)
    /// into a [`Vec`].
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// If a prefix is provided, only files whose paths start with the prefix
    /// (component-wise) are returned. Listing a prefix that doesn't exist
    /// yields an empty stream rather than an error.
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Open a file for streaming reads.
    ///
    /// Returns a `'static` boxed [`Read`](std::io::Read) suitable for use
    /// inside [`spawn_blocking`](tokio::task::spawn_blocking). The async
    /// setup (opening the file or fetching the object) happens before
    /// returning.
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Write file contents, creating or overwriting.
    ///
    /// Implementations create parent directories as needed.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Open a file for streaming writes.
    ///
    /// Returns a `'static` boxed [`Write`](std::io::Write) suitable for use
    /// inside [`spawn_blocking`](tokio::task::spawn_blocking).
    ///
    /// # Notes
    /// - Callers must call `flush()` before dropping. Remote backends buffer
    ///   everything and only upload on `flush()`.
    /// - `flush()` on remote backends blocks on the runtime, so it must not be
    ///   called from inside an async task.
    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Rename/move a file within the same backend, overwriting the
    /// destination.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
