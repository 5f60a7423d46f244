//! Upload and download flows, for any backup provider.
//!
//! Upload: `Exporting → Archiving → WritingMetadata → NotifyingComplete`,
//! then the staging directory is removed in the background.
//!
//! Download: `Fetching → Extracting → Restoring → NotifyingComplete`, with
//! the same background cleanup.
//!
//! Each attempt publishes exactly one [`Notification`], whether it succeeded
//! or not. The staging directory of a game is wiped at the start of every
//! operation; callers are expected not to run two operations for the same
//! game at once.

use crate::catalog::{self, BackupArtifact};
use crate::error::{ErrorKind, Result};
use crate::generator::ManifestGenerator;
use crate::metadata::{self, BackupMetadata, HOME_DIR, WINE_PREFIX_PATH};
use crate::naming::{self, game_archive_name, game_id_prefix, partial_name, sidecar_name, staging_dir_name};
use crate::profile::ProfileResolver;
use crate::provider;
use crate::restore::{self, RestoreRequest};
use exn::ResultExt;
use savestash_config::Provider;
use savestash_storage::StorageBackend;
use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::instrument;

const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Upload,
    Download,
}

/// Published once per upload or download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub operation: Operation,
    pub object_id: String,
    pub shop: String,
    pub success: bool,
}

/// Where a game's current (or last) operation is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Idle,
    Exporting,
    Archiving,
    WritingMetadata,
    Fetching,
    Extracting,
    Restoring,
    NotifyingComplete,
    Failed,
}

/// Identifies one game's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub shop: String,
    pub object_id: String,
}

impl SessionKey {
    pub fn new(shop: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self { shop: shop.into(), object_id: object_id.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub shop: String,
    pub object_id: String,
    /// Prefix the game runs in, if it's a Windows game on a Unix host.
    pub wine_prefix: Option<PathBuf>,
    pub label: Option<String>,
    pub download_option_title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub shop: String,
    pub object_id: String,
    /// Archive name, as listed by the catalog.
    pub artifact: String,
    /// Prefix the game currently runs in.
    pub wine_prefix: Option<PathBuf>,
}

#[derive(Default)]
struct Session {
    stage: Stage,
    cleanup: Option<JoinHandle<()>>,
}

pub struct BackupOrchestrator {
    staging_root: PathBuf,
    generator: Arc<dyn ManifestGenerator>,
    profiles: Arc<dyn ProfileResolver>,
    notifications: broadcast::Sender<Notification>,
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl BackupOrchestrator {
    pub fn new(
        staging_root: impl Into<PathBuf>,
        generator: Arc<dyn ManifestGenerator>,
        profiles: Arc<dyn ProfileResolver>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            staging_root: staging_root.into(),
            generator,
            profiles,
            notifications,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Receive completion notifications for every session.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Current stage of a session; [`Stage::Idle`] if it never ran.
    pub fn stage(&self, key: &SessionKey) -> Stage {
        self.sessions().get(key).map(|s| s.stage).unwrap_or_default()
    }

    /// Back up a game's saves to `provider`, returning the archive name.
    #[instrument(skip_all, fields(provider = provider.name(), shop = %request.shop, object_id = %request.object_id))]
    pub async fn upload(&self, provider: &Provider, request: &UploadRequest) -> Result<String> {
        match provider::open(provider).await {
            Ok(backend) => self.upload_with(backend.as_ref(), request).await,
            Err(err) => {
                self.finish(Operation::Upload, &self.key(&request.shop, &request.object_id), false);
                Err(err)
            },
        }
    }

    /// [`upload`](Self::upload) to an already opened backend.
    pub async fn upload_with(&self, backend: &dyn StorageBackend, request: &UploadRequest) -> Result<String> {
        let key = self.key(&request.shop, &request.object_id);
        let result = self.run_upload(backend, &key, request).await;
        self.finish(Operation::Upload, &key, result.is_ok());
        // A failed attempt leaves its staging directory behind; the next
        // operation on this game wipes it in `prepare_staging`.
        let (archive, staging) = result?;
        self.spawn_cleanup(&key, staging);
        Ok(archive)
    }

    async fn run_upload(
        &self,
        backend: &dyn StorageBackend,
        key: &SessionKey,
        request: &UploadRequest,
    ) -> Result<(String, PathBuf)> {
        let wine_prefix = request.wine_prefix.as_deref();

        self.set_stage(key, Stage::Exporting);
        let staging = self.prepare_staging(key).await?;
        self.generator.generate(&key.shop, &key.object_id, &staging, wine_prefix).await?;

        self.set_stage(key, Stage::Archiving);
        let archive = unused_archive_name(backend, &key.shop, &key.object_id).await?;
        store_archive(backend, &staging, &archive).await?;
        tracing::debug!(%archive, "Archive stored");

        self.set_stage(key, Stage::WritingMetadata);
        if let Err(err) = self.write_sidecar(backend, key, request, &archive).await {
            // An archive without its sidecar isn't a complete artifact.
            discard(backend, Path::new(&archive)).await;
            return Err(err);
        }

        Ok((archive, staging))
    }

    async fn write_sidecar(
        &self,
        backend: &dyn StorageBackend,
        key: &SessionKey,
        request: &UploadRequest,
        archive: &str,
    ) -> Result<()> {
        let wine_prefix = request.wine_prefix.as_deref();
        let home_dir = self.profiles.user_profile_path(wine_prefix).await?;
        let fields = BackupMetadata {
            shop: key.shop.clone(),
            object_id: key.object_id.clone(),
            hostname: host_name(),
            home_dir,
            platform: std::env::consts::OS.to_string(),
            wine_prefix_path: wine_prefix.map(|p| p.to_string_lossy().into_owned()),
            download_option_title: request.download_option_title.clone(),
            label: request.label.clone(),
        }
        .into_fields();
        metadata::write(backend, Path::new(&sidecar_name(archive)), &fields).await
    }

    /// Restore a stored backup over the game's current saves, returning the
    /// files written.
    #[instrument(skip_all, fields(provider = provider.name(), shop = %request.shop, object_id = %request.object_id, artifact = %request.artifact))]
    pub async fn download(&self, provider: &Provider, request: &DownloadRequest) -> Result<Vec<PathBuf>> {
        match provider::open(provider).await {
            Ok(backend) => self.download_with(backend.as_ref(), request).await,
            Err(err) => {
                self.finish(Operation::Download, &self.key(&request.shop, &request.object_id), false);
                Err(err)
            },
        }
    }

    /// [`download`](Self::download) from an already opened backend.
    pub async fn download_with(&self, backend: &dyn StorageBackend, request: &DownloadRequest) -> Result<Vec<PathBuf>> {
        let key = self.key(&request.shop, &request.object_id);
        let result = self.run_download(backend, &key, request).await;
        self.finish(Operation::Download, &key, result.is_ok());
        // Same as upload: on failure staging is reclaimed by the next operation.
        let (restored, staging) = result?;
        self.spawn_cleanup(&key, staging);
        Ok(restored)
    }

    async fn run_download(
        &self,
        backend: &dyn StorageBackend,
        key: &SessionKey,
        request: &DownloadRequest,
    ) -> Result<(Vec<PathBuf>, PathBuf)> {
        self.set_stage(key, Stage::Fetching);
        let fields = metadata::read(backend, Path::new(&sidecar_name(&request.artifact))).await;
        let staging = self.prepare_staging(key).await?;

        self.set_stage(key, Stage::Extracting);
        let reader = backend.reader(Path::new(&request.artifact)).await.or_raise(|| ErrorKind::Storage)?;
        let destination = staging.clone();
        tokio::task::spawn_blocking(move || savestash_archive::unpack(reader, destination))
            .await
            .or_raise(|| ErrorKind::Archive)?
            .or_raise(|| ErrorKind::Archive)?;

        self.set_stage(key, Stage::Restoring);
        let request = RestoreRequest {
            staging_dir: &staging,
            title: &key.object_id,
            home_dir: fields.get(HOME_DIR).map(String::as_str),
            artifact_wine_prefix: fields.get(WINE_PREFIX_PATH).map(String::as_str),
            target_wine_prefix: request.wine_prefix.as_deref(),
        };
        let restored = restore::restore(request, self.profiles.as_ref()).await?;
        Ok((restored, staging))
    }

    /// A game's backups in `provider`, newest first.
    pub async fn list(&self, provider: &Provider, shop: &str, object_id: &str) -> Result<Vec<BackupArtifact>> {
        let backend = provider::open(provider).await?;
        self.list_with(backend.as_ref(), shop, object_id).await
    }

    pub async fn list_with(
        &self,
        backend: &dyn StorageBackend,
        shop: &str,
        object_id: &str,
    ) -> Result<Vec<BackupArtifact>> {
        catalog::list(backend, &game_id_prefix(shop, object_id), object_id, shop).await
    }

    /// Remove an archive and its sidecar from `provider`.
    pub async fn delete(&self, provider: &Provider, artifact: &str) -> Result<()> {
        let backend = provider::open(provider).await?;
        self.delete_with(backend.as_ref(), artifact).await
    }

    pub async fn delete_with(&self, backend: &dyn StorageBackend, artifact: &str) -> Result<()> {
        catalog::delete(backend, Path::new(artifact), Path::new(&sidecar_name(artifact))).await
    }

    fn key(&self, shop: &str, object_id: &str) -> SessionKey {
        SessionKey::new(shop, object_id)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionKey, Session>> {
        // Session state is plain data; a panic elsewhere can't leave it torn.
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_stage(&self, key: &SessionKey, stage: Stage) {
        tracing::debug!(?stage, shop = %key.shop, object_id = %key.object_id, "Stage changed");
        self.sessions().entry(key.clone()).or_default().stage = stage;
    }

    fn finish(&self, operation: Operation, key: &SessionKey, success: bool) {
        self.set_stage(key, if success { Stage::NotifyingComplete } else { Stage::Failed });
        let notification = Notification {
            operation,
            object_id: key.object_id.clone(),
            shop: key.shop.clone(),
            success,
        };
        // Nobody listening is fine.
        let _ = self.notifications.send(notification);
    }

    /// Wipe and recreate the game's staging directory, after any cleanup of
    /// the previous operation has finished.
    async fn prepare_staging(&self, key: &SessionKey) -> Result<PathBuf> {
        self.join_cleanup(key).await;
        let dir = self.staging_root.join(staging_dir_name(&key.shop, &key.object_id));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {},
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io(dir.clone())),
        }
        tokio::fs::create_dir_all(&dir).await.or_raise(|| ErrorKind::Io(dir.clone()))?;
        Ok(dir)
    }

    /// Remove the staging directory in the background. Failures are only
    /// logged.
    fn spawn_cleanup(&self, key: &SessionKey, dir: PathBuf) {
        let handle = tokio::spawn(async move {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => tracing::debug!(staging = %dir.display(), "Staging directory removed"),
                Err(err) => tracing::warn!(error = %err, staging = %dir.display(), "Failed to remove staging directory"),
            }
        });
        self.sessions().entry(key.clone()).or_default().cleanup = Some(handle);
    }

    /// Wait for a pending background cleanup of this session, if any.
    pub(crate) async fn join_cleanup(&self, key: &SessionKey) {
        let pending = self.sessions().get_mut(key).and_then(|s| s.cleanup.take());
        if let Some(handle) = pending {
            let _ = handle.await;
        }
    }
}

/// An archive name for this game that isn't taken yet.
async fn unused_archive_name(backend: &dyn StorageBackend, shop: &str, object_id: &str) -> Result<String> {
    let mut at = OffsetDateTime::now_utc();
    loop {
        let name = game_archive_name(shop, object_id, at);
        if !backend.exists(Path::new(&name)).await.or_raise(|| ErrorKind::Storage)? {
            return Ok(name);
        }
        at = naming::bump(at);
    }
}

/// Pack `staging` under a temporary name, then move it to `archive`.
///
/// Until the rename, nothing in the provider looks like an artifact.
async fn store_archive(backend: &dyn StorageBackend, staging: &Path, archive: &str) -> Result<()> {
    let partial = partial_name(archive);
    let stored = match pack_into(backend, staging, Path::new(&partial)).await {
        Ok(()) => backend.rename(Path::new(&partial), Path::new(archive)).await.or_raise(|| ErrorKind::Storage),
        Err(err) => Err(err),
    };
    if stored.is_err() {
        discard(backend, Path::new(&partial)).await;
    }
    stored
}

async fn pack_into(backend: &dyn StorageBackend, staging: &Path, path: &Path) -> Result<()> {
    let writer = backend.writer(path).await.or_raise(|| ErrorKind::Storage)?;
    let source = staging.to_path_buf();
    tokio::task::spawn_blocking(move || savestash_archive::pack(source, writer).map(drop))
        .await
        .or_raise(|| ErrorKind::Archive)?
        .or_raise(|| ErrorKind::Archive)
}

/// Best-effort removal of an incomplete upload.
async fn discard(backend: &dyn StorageBackend, path: &Path) {
    match backend.delete(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed incomplete upload"),
        Err(err) if err.is_not_found() => {},
        Err(err) => tracing::warn!(error = ?err, path = %path.display(), "Failed to remove incomplete upload"),
    }
}

fn host_name() -> String {
    hostname::get().map(|h| h.to_string_lossy().into_owned()).unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_FILE;
    use crate::metadata::{DOWNLOAD_OPTION_TITLE, HOSTNAME, LABEL, OBJECT_ID, PLATFORM, SHOP};
    use async_trait::async_trait;
    use savestash_storage::backend::MockBackend;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast::error::TryRecvError;

    /// Stages fixed save files the way the generator does, using a root
    /// drive for absolute paths.
    struct FakeGenerator {
        files: Vec<(String, String)>,
    }

    #[async_trait]
    impl ManifestGenerator for FakeGenerator {
        async fn generate(&self, _: &str, object_id: &str, staging_dir: &Path, _: Option<&Path>) -> Result<()> {
            let game_dir = staging_dir.join(object_id);
            fs::create_dir_all(&game_dir).unwrap();
            let mut yaml = String::from("drives:\n  drive-0: \"\"\nbackups:\n  - name: game\n    files:\n");
            for (key, contents) in &self.files {
                yaml.push_str(&format!("      \"{key}\":\n        size: {}\n", contents.len()));
                let stored = game_dir.join(format!("drive-0{key}"));
                fs::create_dir_all(stored.parent().unwrap()).unwrap();
                fs::write(stored, contents).unwrap();
            }
            fs::write(game_dir.join(MANIFEST_FILE), yaml).unwrap();
            Ok(())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ManifestGenerator for FailingGenerator {
        async fn generate(&self, _: &str, _: &str, _: &Path, _: Option<&Path>) -> Result<()> {
            exn::bail!(ErrorKind::Generator("game not found".to_string()))
        }
    }

    struct FixedProfile;

    #[async_trait]
    impl ProfileResolver for FixedProfile {
        async fn user_profile_path(&self, _: Option<&Path>) -> Result<String> {
            Ok("/home/nobody-in-particular".to_string())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        saves: PathBuf,
        staging_root: PathBuf,
        provider: Provider,
        orchestrator: BackupOrchestrator,
    }

    fn fixture_with(generator: impl Fn(&Path) -> Arc<dyn ManifestGenerator>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let saves = dir.path().join("saves");
        let staging_root = dir.path().join("staging");
        let provider = Provider::Local { root: Some(dir.path().join("backups")) };
        let orchestrator = BackupOrchestrator::new(&staging_root, generator(&saves), Arc::new(FixedProfile));
        Fixture { _dir: dir, saves, staging_root, provider, orchestrator }
    }

    fn fixture() -> Fixture {
        fixture_with(|saves| {
            Arc::new(FakeGenerator {
                files: vec![
                    (format!("{}/slot1.sav", saves.display()), "first slot".to_string()),
                    (format!("{}/profiles/settings.ini", saves.display()), "volume=7".to_string()),
                    (format!("{}/empty.sav", saves.display()), String::new()),
                ],
            })
        })
    }

    fn upload_request() -> UploadRequest {
        UploadRequest {
            shop: "steam".to_string(),
            object_id: "42".to_string(),
            label: Some("before boss".to_string()),
            ..Default::default()
        }
    }

    fn download_request(artifact: &str) -> DownloadRequest {
        DownloadRequest {
            shop: "steam".to_string(),
            object_id: "42".to_string(),
            artifact: artifact.to_string(),
            wine_prefix: None,
        }
    }

    fn staging_entries(root: &Path) -> usize {
        fs::read_dir(root).map(|entries| entries.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let fx = fixture();
        let mut notifications = fx.orchestrator.subscribe();

        let archive = fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap();
        assert!(archive.starts_with("steam-42-") && archive.ends_with(".tar"));
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification { operation: Operation::Upload, object_id: "42".into(), shop: "steam".into(), success: true }
        );

        let artifacts = fx.orchestrator.list(&fx.provider, "steam", "42").await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].id, archive);
        assert_eq!(artifacts[0].label.as_deref(), Some("before boss"));

        // Nothing exists yet at the real locations; restore creates it.
        assert!(!fx.saves.exists());
        let restored = fx.orchestrator.download(&fx.provider, &download_request(&archive)).await.unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(fs::read_to_string(fx.saves.join("slot1.sav")).unwrap(), "first slot");
        assert_eq!(fs::read_to_string(fx.saves.join("profiles/settings.ini")).unwrap(), "volume=7");
        assert_eq!(fs::read(fx.saves.join("empty.sav")).unwrap().len(), 0);
        assert!(notifications.try_recv().unwrap().success);
        assert_eq!(notifications.try_recv(), Err(TryRecvError::Empty));

        let key = SessionKey::new("steam", "42");
        assert_eq!(fx.orchestrator.stage(&key), Stage::NotifyingComplete);
        fx.orchestrator.join_cleanup(&key).await;
        assert_eq!(staging_entries(&fx.staging_root), 0);
    }

    #[tokio::test]
    async fn test_upload_twice_keeps_one_staging_dir() {
        let fx = fixture();
        let first = fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap();
        assert!(staging_entries(&fx.staging_root) <= 1);
        let second = fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap();
        assert!(staging_entries(&fx.staging_root) <= 1);
        assert_ne!(first, second);

        let artifacts = fx.orchestrator.list(&fx.provider, "steam", "42").await.unwrap();
        assert_eq!(artifacts.len(), 2);
        let Provider::Local { root: Some(root) } = &fx.provider else { unreachable!() };
        for artifact in [&first, &second] {
            assert!(root.join(artifact).is_file());
            assert!(root.join(sidecar_name(artifact)).is_file());
        }
    }

    #[tokio::test]
    async fn test_upload_without_local_root() {
        let fx = fixture();
        let mut notifications = fx.orchestrator.subscribe();
        let err = fx.orchestrator.upload(&Provider::Local { root: None }, &upload_request()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
        assert!(!notifications.try_recv().unwrap().success);
        assert_eq!(fx.orchestrator.stage(&SessionKey::new("steam", "42")), Stage::Failed);
        // Raised before any I/O.
        assert!(!fx.staging_root.exists());
    }

    #[tokio::test]
    async fn test_upload_generator_failure_writes_nothing() {
        let fx = fixture_with(|_| Arc::new(FailingGenerator));
        let mut notifications = fx.orchestrator.subscribe();
        let err = fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Generator(_)));
        let notification = notifications.try_recv().unwrap();
        assert_eq!(notification.operation, Operation::Upload);
        assert!(!notification.success);
        assert!(fx.orchestrator.list(&fx.provider, "steam", "42").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_writes_sidecar_fields() {
        let fx = fixture();
        let backend = MockBackend::default();
        let request = UploadRequest {
            download_option_title: Some("GOTY Edition".to_string()),
            ..upload_request()
        };
        let archive = fx.orchestrator.upload_with(&backend, &request).await.unwrap();
        assert!(!backend.read(Path::new(&archive)).await.unwrap().is_empty());

        let fields = metadata::read(&backend, Path::new(&sidecar_name(&archive))).await;
        assert_eq!(fields[SHOP], "steam");
        assert_eq!(fields[OBJECT_ID], "42");
        assert_eq!(fields[HOME_DIR], "/home/nobody-in-particular");
        assert_eq!(fields[PLATFORM], std::env::consts::OS);
        assert_eq!(fields[LABEL], "before boss");
        assert_eq!(fields[DOWNLOAD_OPTION_TITLE], "GOTY Edition");
        assert!(!fields[HOSTNAME].is_empty());
        assert!(!fields.contains_key(WINE_PREFIX_PATH));
    }

    #[tokio::test]
    async fn test_download_without_sidecar() {
        let fx = fixture();
        let backend = MockBackend::default();
        let archive = fx.orchestrator.upload_with(&backend, &upload_request()).await.unwrap();
        backend.delete(Path::new(&sidecar_name(&archive))).await.unwrap();

        let restored = fx.orchestrator.download_with(&backend, &download_request(&archive)).await.unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(fs::read_to_string(fx.saves.join("slot1.sav")).unwrap(), "first slot");
    }

    #[tokio::test]
    async fn test_download_corrupt_archive() {
        let fx = fixture();
        let backend = MockBackend::with_files([("steam-42-1.tar", vec![0xFF; 1024])]);
        let mut notifications = fx.orchestrator.subscribe();
        let err = fx.orchestrator.download_with(&backend, &download_request("steam-42-1.tar")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Archive);
        let notification = notifications.try_recv().unwrap();
        assert_eq!(notification.operation, Operation::Download);
        assert!(!notification.success);
        assert_eq!(fx.orchestrator.stage(&SessionKey::new("steam", "42")), Stage::Failed);
    }

    #[tokio::test]
    async fn test_download_missing_archive() {
        let fx = fixture();
        let backend = MockBackend::default();
        let err = fx.orchestrator.download_with(&backend, &download_request("steam-42-1.tar")).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_delete() {
        let fx = fixture();
        let archive = fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap();
        fx.orchestrator.delete(&fx.provider, &archive).await.unwrap();
        assert!(fx.orchestrator.list(&fx.provider, "steam", "42").await.unwrap().is_empty());
        // Deleting again is harmless.
        fx.orchestrator.delete(&fx.provider, &archive).await.unwrap();
    }

    struct NoProfile;

    #[async_trait]
    impl ProfileResolver for NoProfile {
        async fn user_profile_path(&self, _: Option<&Path>) -> Result<String> {
            exn::bail!(ErrorKind::Profile)
        }
    }

    #[tokio::test]
    async fn test_upload_profile_failure_removes_archive() {
        let staging = tempfile::tempdir().unwrap();
        let generator = Arc::new(FakeGenerator { files: Vec::new() });
        let orchestrator = BackupOrchestrator::new(staging.path(), generator, Arc::new(NoProfile));
        let backend = MockBackend::default();
        let err = orchestrator.upload_with(&backend, &upload_request()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Profile);
        assert!(backend.list(None).await.unwrap().is_empty());
    }

    /// Succeeds but leaves nothing to archive.
    struct VanishingGenerator;

    #[async_trait]
    impl ManifestGenerator for VanishingGenerator {
        async fn generate(&self, _: &str, _: &str, staging_dir: &Path, _: Option<&Path>) -> Result<()> {
            fs::remove_dir_all(staging_dir).unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upload_archive_failure_leaves_no_artifact() {
        let fx = fixture_with(|_| Arc::new(VanishingGenerator));
        let mut notifications = fx.orchestrator.subscribe();
        let err = fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Archive);
        assert!(!notifications.try_recv().unwrap().success);

        assert!(fx.orchestrator.list(&fx.provider, "steam", "42").await.unwrap().is_empty());
        // Not even the temporary file is left in the provider.
        let Provider::Local { root: Some(root) } = &fx.provider else { unreachable!() };
        assert_eq!(staging_entries(root), 0);
    }

    /// Leaves a stray file in staging and fails the first time only.
    struct FailsOnce {
        failed: AtomicBool,
        inner: FakeGenerator,
    }

    #[async_trait]
    impl ManifestGenerator for FailsOnce {
        async fn generate(&self, shop: &str, object_id: &str, staging_dir: &Path, prefix: Option<&Path>) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                fs::write(staging_dir.join("stray.tmp"), "half done").unwrap();
                exn::bail!(ErrorKind::Generator("crashed".to_string()));
            }
            self.inner.generate(shop, object_id, staging_dir, prefix).await
        }
    }

    #[tokio::test]
    async fn test_failed_upload_staging_reclaimed_by_next_upload() {
        let fx = fixture_with(|saves| {
            Arc::new(FailsOnce {
                failed: AtomicBool::new(false),
                inner: FakeGenerator { files: vec![(format!("{}/slot1.sav", saves.display()), "one".to_string())] },
            })
        });
        let staging = fx.staging_root.join(staging_dir_name("steam", "42"));
        fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap_err();
        assert!(staging.join("stray.tmp").is_file());

        let archive = fx.orchestrator.upload(&fx.provider, &upload_request()).await.unwrap();
        assert!(!staging.join("stray.tmp").exists());
        let restored = fx.orchestrator.download(&fx.provider, &download_request(&archive)).await.unwrap();
        assert_eq!(restored, vec![fx.saves.join("slot1.sav")]);
    }

    #[test]
    fn test_stage_of_unknown_session() {
        let fx = fixture();
        assert_eq!(fx.orchestrator.stage(&SessionKey::new("gog", "1")), Stage::Idle);
    }
}
