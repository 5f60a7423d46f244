//! Layered configuration for savestash.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults ([`Config::default`]).
//! 2. An optional config file (YAML, TOML or JSON, chosen by extension).
//! 3. `SAVESTASH_`-prefixed environment variables, with `__` separating
//!    nested keys (`SAVESTASH_PROVIDER__ROOT=/mnt/backups`).
//!
//! The loaded value is passed explicitly to whatever needs it; nothing in
//! the workspace reads configuration from process-wide state.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SAVESTASH_";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter, used when `RUST_LOG` isn't set.
    pub log_level: String,
    /// Parent of the per-game staging directories.
    pub staging_dir: PathBuf,
    pub generator: GeneratorConfig,
    pub provider: Provider,
}

/// Settings for the external tool that scans a game's save locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Path to the generator executable. Looked up on `PATH` when unset.
    pub binary: Option<PathBuf>,
    /// Alternative config directory handed to the generator.
    pub config_dir: Option<PathBuf>,
}

/// Where backup artifacts are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Provider {
    /// A directory on the local filesystem.
    Local {
        /// Left unset until the user picks a folder; using the provider
        /// without one is a configuration error.
        #[serde(default)]
        root: Option<PathBuf>,
    },
    /// An S3-compatible object store.
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        #[serde(default = "default_region")]
        region: String,
        /// Custom endpoint for non-AWS stores (MinIO, R2, ...).
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Provider {
    /// Short name used in logs and artifact listings.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Local { .. } => "local",
            Provider::S3 { .. } => "s3",
        }
    }
}

impl Default for Provider {
    fn default() -> Self {
        Provider::Local { root: None }
    }
}

impl Default for Config {
    fn default() -> Self {
        let staging_dir = match project_dirs() {
            Some(dirs) => dirs.data_dir().join("backups"),
            None => std::env::temp_dir().join("savestash").join("backups"),
        };
        Self {
            log_level: "info".to_string(),
            staging_dir,
            generator: GeneratorConfig::default(),
            provider: Provider::default(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "savestash")
}

impl Config {
    /// Load configuration from defaults, an optional file, then environment.
    ///
    /// An explicitly given `file` must exist.
    #[tracing::instrument]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config: Config = Self::figment(file)?.extract().or_raise(|| ErrorKind::Invalid)?;
        tracing::debug!(provider = config.provider.name(), staging_dir = %config.staging_dir.display(), "Configuration loaded");
        Ok(config)
    }

    /// The merged source stack, before extraction.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            if !file.is_file() {
                exn::bail!(ErrorKind::FileNotFound(file.to_path_buf()));
            }
            let extension = file.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("toml") => figment.merge(Toml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// The per-user config file, if one has been created.
    pub fn default_file() -> Option<PathBuf> {
        let path = project_dirs()?.config_dir().join(DEFAULT_CONFIG_FILE);
        path.is_file().then_some(path)
    }
}
