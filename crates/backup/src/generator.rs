//! The external tool that finds a game's saves and stages them with a
//! manifest.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use savestash_config::GeneratorConfig;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::instrument;

/// Executable looked up on `PATH` when none is configured.
pub const DEFAULT_BINARY: &str = "ludusavi";

/// Populates a staging directory with a game's save files and manifest.
///
/// On success `<staging_dir>/<object_id>/mapping.yaml` exists alongside the
/// payload.
#[async_trait]
pub trait ManifestGenerator: Send + Sync {
    async fn generate(
        &self,
        shop: &str,
        object_id: &str,
        staging_dir: &Path,
        wine_prefix: Option<&Path>,
    ) -> Result<()>;
}

/// Runs Ludusavi in API mode.
#[derive(Debug, Clone)]
pub struct LudusaviGenerator {
    binary: PathBuf,
    config_dir: Option<PathBuf>,
}

impl LudusaviGenerator {
    pub fn new(binary: impl Into<PathBuf>, config_dir: Option<PathBuf>) -> Self {
        Self { binary: binary.into(), config_dir }
    }

    /// Use the configured binary, or find one on `PATH`.
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let binary = match &config.binary {
            Some(binary) => binary.clone(),
            None => which::which(DEFAULT_BINARY)
                .or_raise(|| ErrorKind::Generator(format!("{DEFAULT_BINARY} not found on PATH")))?,
        };
        Ok(Self::new(binary, config.config_dir.clone()))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn args(&self, object_id: &str, staging_dir: &Path, wine_prefix: Option<&Path>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(config_dir) = &self.config_dir {
            args.push("--config".into());
            args.push(config_dir.into());
        }
        for arg in ["backup", object_id, "--api", "--force", "--path"] {
            args.push(arg.into());
        }
        args.push(staging_dir.into());
        if let Some(prefix) = wine_prefix {
            args.push("--wine-prefix".into());
            args.push(prefix.into());
        }
        args
    }
}

#[async_trait]
impl ManifestGenerator for LudusaviGenerator {
    #[instrument(skip(self), fields(binary = %self.binary.display()))]
    async fn generate(
        &self,
        shop: &str,
        object_id: &str,
        staging_dir: &Path,
        wine_prefix: Option<&Path>,
    ) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(self.args(object_id, staging_dir, wine_prefix))
            .kill_on_drop(true)
            .output()
            .await
            .or_raise(|| ErrorKind::Generator(format!("failed to run {}", self.binary.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            exn::bail!(ErrorKind::Generator(format!("{} ({})", output.status, stderr.trim())));
        }
        tracing::debug!("Saves staged");
        Ok(())
    }
}
