//! Storage backends for backup artifacts.
//!
//! A backup provider is anything implementing [`StorageBackend`]: the local
//! filesystem ([`LocalBackend`](backend::LocalBackend)), an S3-compatible
//! object store ([`S3Backend`](backend::S3Backend), behind the `s3` feature),
//! or an in-memory map for tests ([`MockBackend`](backend::MockBackend),
//! behind the `mock` feature). Archives and their sidecars are addressed by
//! paths relative to the backend root.

pub mod backend;
pub mod error;
pub mod file;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
