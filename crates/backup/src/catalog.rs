//! Discovering and deleting the backups stored in a provider.

use crate::error::{ErrorKind, Result};
use crate::metadata::{self, LABEL, OBJECT_ID, SHOP};
use crate::naming::{is_game_archive, sidecar_name};
use exn::ResultExt;
use futures::future::join_all;
use savestash_storage::{FileInfo, StorageBackend};
use std::path::Path;
use time::OffsetDateTime;
use tracing::instrument;

/// Catalog view of one stored backup, assembled from the archive's stat and
/// its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    /// The archive's file name, which doubles as its identity.
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub created_at: OffsetDateTime,
    pub modified_at: OffsetDateTime,
    pub game_object_id: String,
    pub game_shop: String,
    pub label: Option<String>,
    /// Name of the backend the artifact was found in.
    pub provider: String,
}

/// List this game's artifacts, newest first.
///
/// Files that vanish between listing and stat are dropped silently. A
/// missing or corrupt sidecar doesn't hide the artifact: `object_id` and
/// `shop` are used instead and the label is left empty.
#[instrument(skip(backend), fields(backend = backend.name()))]
pub async fn list(
    backend: &dyn StorageBackend,
    id_prefix: &str,
    object_id: &str,
    shop: &str,
) -> Result<Vec<BackupArtifact>> {
    let candidates: Vec<String> = backend
        .list(None)
        .await
        .or_raise(|| ErrorKind::Storage)?
        .into_iter()
        // Artifacts sit directly under the provider root.
        .filter(|info| info.path.components().count() == 1)
        .filter_map(|info| info.file_name().map(str::to_string))
        .filter(|name| is_game_archive(name, id_prefix))
        .collect();

    let loaded = join_all(candidates.into_iter().map(|name| async move {
        let sidecar = sidecar_name(&name);
        let (stat, fields) =
            tokio::join!(backend.stat(Path::new(&name)), metadata::read(backend, Path::new(&sidecar)));
        match stat {
            Ok(info) => Some(artifact(name, info, fields, object_id, shop, backend.name())),
            Err(err) => {
                tracing::debug!(archive = %name, error = ?err, "Archive vanished while listing");
                None
            },
        }
    }))
    .await;

    let mut artifacts: Vec<BackupArtifact> = loaded.into_iter().flatten().collect();
    // Stable, so equal timestamps keep listing order.
    artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tracing::debug!(count = artifacts.len(), "Listed backups");
    Ok(artifacts)
}

fn artifact(
    name: String,
    info: FileInfo,
    mut fields: metadata::MetadataFields,
    object_id: &str,
    shop: &str,
    provider: &str,
) -> BackupArtifact {
    BackupArtifact {
        id: name.clone(),
        name,
        size_bytes: info.size,
        // Storage only tracks modification time.
        created_at: info.modified,
        modified_at: info.modified,
        game_object_id: fields.remove(OBJECT_ID).unwrap_or_else(|| object_id.to_string()),
        game_shop: fields.remove(SHOP).unwrap_or_else(|| shop.to_string()),
        label: fields.remove(LABEL),
        provider: provider.to_string(),
    }
}

/// Delete an archive and its sidecar.
///
/// Both deletions are attempted regardless of each other, and either file
/// already being gone is fine. Any other failure deleting the archive is
/// returned; a sidecar failure is only logged.
#[instrument(skip(backend), fields(backend = backend.name(), archive = %archive.display()))]
pub async fn delete(backend: &dyn StorageBackend, archive: &Path, sidecar: &Path) -> Result<()> {
    let (archive_result, sidecar_result) = tokio::join!(backend.delete(archive), backend.delete(sidecar));
    match sidecar_result {
        Ok(()) => {},
        Err(err) if err.is_not_found() => tracing::debug!("Sidecar already gone"),
        Err(err) => tracing::warn!(error = ?err, sidecar = %sidecar.display(), "Failed to delete sidecar"),
    }
    match archive_result {
        Ok(()) => Ok(()),
        Err(err) if err.is_not_found() => {
            tracing::debug!("Archive already gone");
            Ok(())
        },
        Err(err) => Err(err).or_raise(|| ErrorKind::Storage),
    }
}
