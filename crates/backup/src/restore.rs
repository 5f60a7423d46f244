//! Moving extracted save files back to their real locations.
//!
//! Given `<staging>/<title>/mapping.yaml` plus payload, every file listed in
//! the manifest is moved to the destination its portable path describes on
//! this machine. Entries are processed one after another; the files within
//! an entry are moved concurrently.
//!
//! Restore is not transactional: when a move fails the error propagates and
//! files already moved stay where they are.

use crate::error::{ErrorKind, Result};
use crate::manifest::{BackupManifest, MANIFEST_FILE};
use crate::profile::ProfileResolver;
use crate::wine::{self, PUBLIC_PROFILE, Substitution, WINDOWS_DRIVE, WINE_DRIVE_ROOT};
use exn::ResultExt;
use futures::future::try_join_all;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Inputs for one restore.
#[derive(Debug, Clone, Copy)]
pub struct RestoreRequest<'a> {
    pub staging_dir: &'a Path,
    /// Name of the folder the generator wrote into (the game's object ID).
    pub title: &'a str,
    /// Home directory recorded when the backup was made.
    pub home_dir: Option<&'a str>,
    /// Wine prefix the backup was made from.
    pub artifact_wine_prefix: Option<&'a str>,
    /// Wine prefix of the game being restored into.
    pub target_wine_prefix: Option<&'a Path>,
}

/// One file to move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// The ordered rewrite from a manifest key to its destination.
///
/// 1. Strip the artifact's own Wine prefix.
/// 2. Turn its `drive_c` back into `C:`.
/// 3. Swap the recorded home directory for the target user's profile.
/// 4. Re-base the public profile onto the target prefix.
pub fn destination_rules(
    artifact_wine_prefix: Option<&str>,
    home_dir: Option<&str>,
    user_profile: Option<&str>,
    target_wine_prefix: Option<&str>,
) -> Vec<Substitution> {
    let mut rules = Vec::with_capacity(4);
    if let Some(prefix) = artifact_wine_prefix.filter(|p| !p.is_empty()) {
        rules.push(Substitution::StripPrefix(format!("{}/", prefix.trim_end_matches('/'))));
    }
    rules.push(Substitution::replace_first(WINE_DRIVE_ROOT, WINDOWS_DRIVE));
    if let (Some(home), Some(profile)) = (home_dir, user_profile) {
        rules.push(Substitution::replace_all(home, wine::to_real_path(profile, target_wine_prefix)));
    }
    rules.push(Substitution::replace_all(PUBLIC_PROFILE, wine::to_real_path(PUBLIC_PROFILE, target_wine_prefix)));
    rules
}

/// Work out where `key` is stored in the staging directory and where it
/// should be moved to.
pub fn plan_move(
    manifest: &BackupManifest,
    key: &str,
    game_dir: &Path,
    rules: &[Substitution],
) -> PlannedMove {
    let relative = manifest.source_relative(key);
    PlannedMove {
        source: game_dir.join(relative.trim_start_matches(['/', '\\'])),
        destination: PathBuf::from(wine::apply_all(rules, key)),
    }
}

/// Restore every file in the staged manifest, returning the destinations
/// written in manifest order.
#[instrument(skip_all, fields(staging = %request.staging_dir.display(), title = request.title))]
pub async fn restore(request: RestoreRequest<'_>, profiles: &dyn ProfileResolver) -> Result<Vec<PathBuf>> {
    let game_dir = request.staging_dir.join(request.title);
    let manifest = BackupManifest::read(&game_dir.join(MANIFEST_FILE)).await?;

    let home_dir = request.home_dir.filter(|h| !h.is_empty());
    // Only needed when there's a recorded home directory to replace.
    let user_profile = match home_dir {
        Some(_) => Some(profiles.user_profile_path(request.target_wine_prefix).await?),
        None => None,
    };
    let target_prefix = request.target_wine_prefix.map(|p| p.to_string_lossy().into_owned());
    let rules = destination_rules(
        request.artifact_wine_prefix,
        home_dir,
        user_profile.as_deref(),
        target_prefix.as_deref(),
    );
    tracing::debug!(?rules, entries = manifest.backups.len(), "Restoring backup");

    let mut restored = Vec::with_capacity(manifest.file_keys().count());
    for entry in &manifest.backups {
        let moves = entry.files.keys().map(|key| {
            let planned = plan_move(&manifest, key, &game_dir, &rules);
            move_file(planned.source, planned.destination)
        });
        restored.extend(try_join_all(moves).await?);
    }
    Ok(restored)
}

/// Move `source` over `destination`, creating parent directories and
/// replacing whatever was there.
async fn move_file(source: PathBuf, destination: PathBuf) -> Result<PathBuf> {
    let fail = || ErrorKind::MoveFailed { from: source.clone(), to: destination.clone() };
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(fail)?;
    }
    match tokio::fs::remove_file(&destination).await {
        Ok(()) => {},
        Err(e) if e.kind() == IoErrorKind::NotFound => {},
        Err(e) => return Err(e).or_raise(fail),
    }
    tokio::fs::rename(&source, &destination).await.or_raise(fail)?;
    tracing::info!(source = %source.display(), destination = %destination.display(), "Restored save file");
    Ok(destination)
}
