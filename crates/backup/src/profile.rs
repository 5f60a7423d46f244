//! Resolving the user profile directory a restore should write into.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use directories::BaseDirs;
use exn::{OptionExt, ResultExt};
use std::path::Path;
use tracing::instrument;

/// Registry hive holding per-user environment values in a Wine prefix.
const USER_REGISTRY: &str = "user.reg";
const VOLATILE_ENVIRONMENT: &str = "[Volatile Environment]";
const USER_PROFILE_VALUE: &str = "\"USERPROFILE\"=";

/// Supplies the home directory of the user a restore targets.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// The profile path, with forward slashes.
    ///
    /// With a Wine prefix this is the Windows-style path *inside* the prefix
    /// (`C:/users/steamuser`); without one it's the host user's home.
    async fn user_profile_path(&self, wine_prefix: Option<&Path>) -> Result<String>;
}

/// Reads `USERPROFILE` out of the prefix's registry, or falls back to the
/// host home directory when there's no prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryProfileResolver;

#[async_trait]
impl ProfileResolver for RegistryProfileResolver {
    #[instrument(skip(self))]
    async fn user_profile_path(&self, wine_prefix: Option<&Path>) -> Result<String> {
        let Some(prefix) = wine_prefix else {
            let dirs = BaseDirs::new().ok_or_raise(|| ErrorKind::Profile)?;
            return Ok(dirs.home_dir().to_string_lossy().replace('\\', "/"));
        };
        let bytes = tokio::fs::read(prefix.join(USER_REGISTRY)).await.or_raise(|| ErrorKind::Profile)?;
        let profile = parse_user_profile(&String::from_utf8_lossy(&bytes)).ok_or_raise(|| ErrorKind::Profile)?;
        tracing::debug!(%profile, "Resolved Wine user profile");
        Ok(profile)
    }
}

/// Extract `USERPROFILE` from the `[Volatile Environment]` key of a Wine
/// `user.reg` file.
pub fn parse_user_profile(registry: &str) -> Option<String> {
    let mut in_section = false;
    for line in registry.lines().map(str::trim) {
        if line.starts_with('[') {
            in_section = line.starts_with(VOLATILE_ENVIRONMENT);
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some(value) = line.strip_prefix(USER_PROFILE_VALUE) {
            let value = value.trim().trim_matches('"');
            return Some(value.replace("\\\\", "\\").replace('\\', "/"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_REG: &str = r#"WINE REGISTRY Version 2
;; All keys relative to \\User\\S-1-5-21-0-0-0-1000

#arch=win64

[Environment] 1700000000
#time=1da0000000000000
"TEMP"="C:\\users\\steamuser\\Temp"

[Volatile Environment] 1700000000
#time=1da0000000000000
"APPDATA"="C:\\users\\steamuser\\AppData\\Roaming"
"USERPROFILE"="C:\\users\\steamuser"

[Software\\Wine] 1700000000
"USERPROFILE"="C:\\wrong"
"#;

    #[test]
    fn test_parse_user_profile() {
        assert_eq!(parse_user_profile(USER_REG).as_deref(), Some("C:/users/steamuser"));
    }

    #[test]
    fn test_parse_user_profile_missing_section() {
        assert_eq!(parse_user_profile("[Environment]\n\"USERPROFILE\"=\"C:\\\\x\"\n"), None);
        assert_eq!(parse_user_profile(""), None);
    }

    #[tokio::test]
    async fn test_resolve_from_prefix() {
        let prefix = tempfile::tempdir().unwrap();
        std::fs::write(prefix.path().join(USER_REGISTRY), USER_REG).unwrap();
        let profile = RegistryProfileResolver.user_profile_path(Some(prefix.path())).await.unwrap();
        assert_eq!(profile, "C:/users/steamuser");
    }

    #[tokio::test]
    async fn test_resolve_prefix_without_registry() {
        let prefix = tempfile::tempdir().unwrap();
        let err = RegistryProfileResolver.user_profile_path(Some(prefix.path())).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Profile);
    }

    #[tokio::test]
    async fn test_resolve_without_prefix() {
        let profile = RegistryProfileResolver.user_profile_path(None).await.unwrap();
        assert!(!profile.is_empty());
        assert!(!profile.contains('\\'));
    }
}
