//! S3-compatible storage backend.
//!
//! The remote backup provider: archives and sidecars are stored as objects
//! in a bucket, optionally under a key prefix. Works with AWS S3, Backblaze
//! B2, Tigris, MinIO and other S3-compatible services.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file.

use crate::{
    FileInfo, StorageBackend,
    backend::{BoxSyncRead, BoxSyncWrite, FileInfoStream},
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// S3-compatible storage backend.
///
/// # Examples
///
/// ```no_run
/// use savestash_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "remote",
///     "my-bucket",
///     Some("saves/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

/// Buffers the whole object in memory and uploads it on `flush()`.
struct S3Writer {
    backend: S3Backend,
    key: String,
    buffer: Vec<u8>,
    runtime: Handle,
}
impl Write for S3Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let data = std::mem::take(&mut self.buffer);
        self.runtime
            .block_on(self.backend.put(&self.key, data))
            .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging and artifact listings)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let credentials = Credentials::new(key_id, key_secret, None, None, "savestash-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // 1 initial attempt + 3 retries with exponential backoff.
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services.
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(join_key(self.prefix.as_deref(), path_str))
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        validate_path(strip_key(self.prefix.as_deref(), key))
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        // unwrap is safe: semaphore is never closed
        self.rate_limiter.clone().acquire_owned().await.unwrap()
    }

    fn parse_datetime(dt: Option<&DateTime>) -> Result<OffsetDateTime> {
        let dt = dt.ok_or_raise(|| ErrorKind::BackendError("S3 object has no modification time".to_string()))?;
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn network_error<E, R>(err: SdkError<E, R>) -> ErrorKind
    where
        E: std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        ErrorKind::Network(DisplayErrorContext(err).to_string())
    }

    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let _permit = self.acquire_permit().await;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(Self::network_error)?;
        Ok(())
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(e) => exn::bail!(Self::network_error(e)),
        };
        let body = output.body.collect().await.or_raise(|| ErrorKind::Network(format!("reading body of {key}")))?;
        Ok(body.into_bytes().to_vec())
    }
}

fn join_key(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path),
        None => path.to_string(),
    }
}

fn strip_key<'a>(prefix: Option<&str>, key: &'a str) -> &'a str {
    match prefix {
        Some(prefix) => {
            let prefix = prefix.trim_end_matches('/');
            key.strip_prefix(prefix).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let key_prefix = match prefix.map(|p| self.full_key(p)).transpose() {
            Ok(Some(key)) => Some(format!("{}/", key)),
            Ok(None) => self.prefix.as_ref().map(|p| format!("{}/", p.trim_end_matches('/'))),
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            let mut continuation: Option<String> = None;
            loop {
                let page = {
                    let _permit = self.acquire_permit().await;
                    self.client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .set_prefix(key_prefix.clone())
                        .set_continuation_token(continuation.take())
                        .send()
                        .await
                };
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(exn::Exn::from(Self::network_error(e)));
                        break;
                    }
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    let info = self.relative_path(key).and_then(|path| {
                        let modified = Self::parse_datetime(object.last_modified())?;
                        Ok(FileInfo::new(path, object.size().unwrap_or_default().max(0) as u64, modified))
                    });
                    yield info;
                }
                match page.next_continuation_token() {
                    Some(token) if page.is_truncated().unwrap_or(false) => continuation = Some(token.to_string()),
                    _ => break,
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.get(path).await
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        Ok(Box::new(Cursor::new(self.read(path).await?)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.full_key(path)?;
        self.put(&key, data.to_vec()).await
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        Ok(Box::new(S3Writer {
            backend: self.clone(),
            key: self.full_key(path)?,
            buffer: Vec::new(),
            runtime: Handle::current(),
        }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // DeleteObject succeeds for missing keys; check first so callers get
        // the same NotFound contract as the local backend.
        self.stat(path).await?;
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        self.client.delete_object().bucket(&self.bucket).key(key).send().await.map_err(Self::network_error)?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.stat(from).await?;
        let from_key = self.full_key(from)?;
        let to_key = self.full_key(to)?;
        {
            let _permit = self.acquire_permit().await;
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{}", self.bucket, from_key))
                .key(&to_key)
                .send()
                .await
                .map_err(Self::network_error)?;
        }
        if let Err(e) = self.delete(from).await {
            tracing::warn!(from = %from.display(), to = %to.display(), error = %e, "Copied object but could not delete the source");
        }
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await;
        let output = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(e) => exn::bail!(Self::network_error(e)),
        };
        let size = output.content_length().unwrap_or_default().max(0) as u64;
        let modified = Self::parse_datetime(output.last_modified())?;
        Ok(FileInfo::new(validate_path(path)?, size, modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key(None, "steam-1-1.tar"), "steam-1-1.tar");
        assert_eq!(join_key(Some("saves"), "steam-1-1.tar"), "saves/steam-1-1.tar");
        assert_eq!(join_key(Some("saves/"), "steam-1-1.tar"), "saves/steam-1-1.tar");
    }

    #[test]
    fn test_strip_key() {
        assert_eq!(strip_key(None, "steam-1-1.tar"), "steam-1-1.tar");
        assert_eq!(strip_key(Some("saves"), "saves/steam-1-1.tar"), "steam-1-1.tar");
        assert_eq!(strip_key(Some("saves/"), "saves/steam-1-1.tar"), "steam-1-1.tar");
        // Keys outside the prefix pass through untouched.
        assert_eq!(strip_key(Some("saves"), "other/steam-1-1.tar"), "other/steam-1-1.tar");
    }
}
