//! In-memory storage backend for testing.

use super::{BoxSyncRead, BoxSyncWrite, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

type Storage = Arc<RwLock<HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>>>;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Stands in for a
/// remote provider in tests that shouldn't touch the network.
///
/// # Examples
///
/// ```
/// use savestash_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("steam-42-1700000000000.tar", b"archive"),
/// ]);
/// assert!(backend.exists(Path::new("steam-42-1700000000000.tar")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: Storage,
}

/// Buffers writes and commits them to the map on `flush()`, mirroring how
/// remote backends only upload once the archive is complete.
struct MockWriter {
    storage: Storage,
    path: PathBuf,
    buffer: Vec<u8>,
}
impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Writers are only ever driven from blocking threads.
        let mut guard = self.storage.blocking_write();
        guard.insert(self.path.clone(), (OffsetDateTime::now_utc(), self.buffer.clone()));
        Ok(())
    }
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: Arc::new(RwLock::new(map)),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the modification time of a stored file.
    ///
    /// Panics if the file doesn't exist.
    pub async fn set_modified(&self, path: impl AsRef<Path>, modified: OffsetDateTime) {
        let path = path.as_ref();
        let mut guard = self.storage.write().await;
        let Some(entry) = guard.get_mut(path) else {
            panic!("MockBackend::set_modified: no such file {}", path.display());
        };
        entry.0 = modified;
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, (modified, data))| FileInfo::new(path.clone(), data.len() as u64, *modified))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_modified, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        Ok(Box::new(Cursor::new(self.read(path).await?)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.insert(path, (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let path = validate_path(path)?;
        Ok(Box::new(MockWriter {
            storage: Arc::clone(&self.storage),
            path,
            buffer: Vec::new(),
        }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.storage.write().await;
        let data = guard.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        guard.insert(to, data);
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (modified, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use time::Duration;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("a.tar.meta.json"), b"{}").await.unwrap();
        assert_eq!(backend.read(Path::new("a.tar.meta.json")).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_writer_commits_on_flush() {
        let backend = MockBackend::default();
        let mut writer = backend.writer(Path::new("a.tar")).await.unwrap();
        tokio::task::spawn_blocking(move || {
            writer.write_all(b"tar").unwrap();
            writer.flush().unwrap();
        })
        .await
        .unwrap();
        let mut buf = Vec::new();
        backend.reader(Path::new("a.tar")).await.unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"tar");
    }

    #[tokio::test]
    async fn test_unflushed_writer_leaves_nothing() {
        let backend = MockBackend::default();
        let mut writer = backend.writer(Path::new("a.tar")).await.unwrap();
        writer.write_all(b"partial").unwrap();
        drop(writer);
        assert!(!backend.exists(Path::new("a.tar")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let backend = MockBackend::with_files([("a.tar", b"x")]);
        backend.delete(Path::new("a.tar")).await.unwrap();
        let err = backend.delete(Path::new("a.tar")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_modified() {
        let backend = MockBackend::with_files([("a.tar", b"x")]);
        let earlier = OffsetDateTime::now_utc() - Duration::days(3);
        backend.set_modified("a.tar", earlier).await;
        assert_eq!(backend.stat(Path::new("a.tar")).await.unwrap().modified, earlier);
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([("one/a.tar", b"a"), ("one/b.tar", b"b"), ("two/c.tar", b"c")]);
        assert_eq!(backend.list(Some(Path::new("one"))).await.unwrap().len(), 2);
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", b"bad")]);
    }
}
