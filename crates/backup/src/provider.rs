//! Turning provider settings into a storage backend.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use savestash_config::Provider;
use savestash_storage::BackendHandle;
use savestash_storage::backend::LocalBackend;
use std::sync::Arc;

/// Open the backend described by `provider`.
///
/// A local provider without a root is a configuration error, raised before
/// touching the filesystem.
pub async fn open(provider: &Provider) -> Result<BackendHandle> {
    match provider {
        Provider::Local { root: None } => {
            exn::bail!(ErrorKind::Configuration("no local backup folder is configured".to_string()))
        },
        Provider::Local { root: Some(root) } => {
            let backend = LocalBackend::new(provider.name(), root).or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(feature = "s3")]
        Provider::S3 { bucket, prefix, region, endpoint, key_id, key_secret } => {
            let backend = savestash_storage::backend::S3Backend::new(
                provider.name(),
                bucket,
                prefix.clone(),
                region,
                endpoint.clone(),
                key_id,
                key_secret,
            )
            .await
            .or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(not(feature = "s3"))]
        Provider::S3 { .. } => {
            exn::bail!(ErrorKind::Configuration("this build has no S3 support".to_string()))
        },
    }
}
