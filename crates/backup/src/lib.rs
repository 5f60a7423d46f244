//! Save-game backup and restore.
//!
//! The pieces, leaves first:
//! - [`wine`]: portable <-> real path translation and ordered substitution rules.
//! - [`manifest`]: the generator's `mapping.yaml`.
//! - [`restore`]: moves staged files back to their real locations.
//! - [`metadata`]: sidecar provenance records.
//! - [`catalog`]: listing and deleting stored artifacts.
//! - [`orchestrator`]: upload and download flows for any provider.
//!
//! Archives themselves are handled by `savestash-archive`, and providers by
//! `savestash-storage`.

pub mod catalog;
pub mod error;
pub mod generator;
pub mod manifest;
pub mod metadata;
pub mod naming;
pub mod orchestrator;
pub mod profile;
pub mod provider;
pub mod restore;
pub mod wine;

pub use crate::catalog::BackupArtifact;
pub use crate::generator::{LudusaviGenerator, ManifestGenerator};
pub use crate::orchestrator::{
    BackupOrchestrator, DownloadRequest, Notification, Operation, SessionKey, Stage, UploadRequest,
};
pub use crate::profile::{ProfileResolver, RegistryProfileResolver};
