//! Sidecar provenance records stored next to each archive.
//!
//! A sidecar is a flat JSON object of strings. There is no schema version;
//! readers take whatever keys are present and default the rest.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use savestash_storage::StorageBackend;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::instrument;

pub type MetadataFields = BTreeMap<String, String>;

pub const SHOP: &str = "shop";
pub const OBJECT_ID: &str = "objectId";
pub const HOSTNAME: &str = "hostname";
pub const HOME_DIR: &str = "homeDir";
pub const PLATFORM: &str = "platform";
pub const WINE_PREFIX_PATH: &str = "winePrefixPath";
pub const DOWNLOAD_OPTION_TITLE: &str = "downloadOptionTitle";
pub const LABEL: &str = "label";

/// Provenance of a backup, as recorded at upload time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupMetadata {
    pub shop: String,
    pub object_id: String,
    pub hostname: String,
    pub home_dir: String,
    pub platform: String,
    pub wine_prefix_path: Option<String>,
    pub download_option_title: Option<String>,
    pub label: Option<String>,
}

impl BackupMetadata {
    pub fn into_fields(self) -> MetadataFields {
        let mut fields = MetadataFields::from([
            (SHOP.to_string(), self.shop),
            (OBJECT_ID.to_string(), self.object_id),
            (HOSTNAME.to_string(), self.hostname),
            (HOME_DIR.to_string(), self.home_dir),
            (PLATFORM.to_string(), self.platform),
        ]);
        let optional = [
            (WINE_PREFIX_PATH, self.wine_prefix_path),
            (DOWNLOAD_OPTION_TITLE, self.download_option_title),
            (LABEL, self.label),
        ];
        fields.extend(optional.into_iter().filter_map(|(key, value)| Some((key.to_string(), value?))));
        fields
    }
}

/// Serialise `fields` as JSON to `path`, replacing any existing sidecar.
#[instrument(skip(backend, fields), fields(backend = backend.name(), path = %path.display()))]
pub async fn write(backend: &dyn StorageBackend, path: &Path, fields: &MetadataFields) -> Result<()> {
    let fail = || ErrorKind::Metadata(path.to_path_buf());
    let json = serde_json::to_vec_pretty(fields).or_raise(fail)?;
    backend.write(path, &json).await.or_raise(fail)?;
    Ok(())
}

/// Read the sidecar at `path`.
///
/// Never fails: a missing, unreadable or malformed sidecar yields an empty
/// map, and non-string values are skipped.
#[instrument(skip(backend), fields(backend = backend.name(), path = %path.display()))]
pub async fn read(backend: &dyn StorageBackend, path: &Path) -> MetadataFields {
    let bytes = match backend.read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.is_not_found() => {
            tracing::debug!("No sidecar metadata");
            return MetadataFields::new();
        },
        Err(err) => {
            tracing::warn!(error = ?err, "Unreadable sidecar metadata");
            return MetadataFields::new();
        },
    };
    match serde_json::from_slice::<BTreeMap<String, serde_json::Value>>(&bytes) {
        Ok(values) => values
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(value) => Some((key, value)),
                _ => None,
            })
            .collect(),
        Err(err) => {
            tracing::warn!(error = %err, "Corrupt sidecar metadata");
            MetadataFields::new()
        },
    }
}
