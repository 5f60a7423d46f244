//! Path validation for storage keys.
//!
//! Artifact paths handed to a backend are always relative to its root. This
//! module makes sure they stay that way.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes a storage path.
///
/// `.` components and repeated separators are dropped, `..` is resolved as
/// long as it never climbs above the root. Null bytes and Windows path
/// prefixes are rejected, as is anything that normalizes to nothing.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use savestash_storage::validate_path;
/// assert!(validate_path("steam-123-1700000000000.tar").is_ok());
/// assert!(validate_path("nested/steam-123-1700000000000.tar.meta.json").is_ok());
/// assert!(validate_path("../outside.tar").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("./old/../steam-1.tar/").unwrap(),
///     Path::new("steam-1.tar")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
    }
    Ok(components.into_iter().collect())
}
