//! The portable backup manifest (`mapping.yaml`) written by the generator.
//!
//! ```yaml
//! name: "1245620"
//! drives:
//!   drive-C: "C:"
//!   drive-0: ""
//! backups:
//!   - name: "1245620"
//!     files:
//!       "C:/users/me/AppData/Roaming/Game/slot1.sav":
//!         size: 2048
//! ```
//!
//! Payload files sit next to the manifest in folders named after the drive
//! keys, so `C:/users/...` is stored as `drive-C/users/...`.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// File name of the manifest inside `<staging>/<title>/`.
pub const MANIFEST_FILE: &str = "mapping.yaml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BackupManifest {
    pub backups: Vec<BackupEntry>,
    /// Folder name in the backup -> real drive segment it stands for.
    #[serde(default)]
    pub drives: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BackupEntry {
    /// Keyed by the file's portable path.
    #[serde(default)]
    pub files: BTreeMap<String, ManifestFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManifestFile {
    pub size: u64,
    pub hash: Option<String>,
}

impl BackupManifest {
    /// Parse manifest text. Unknown fields are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).or_raise(|| ErrorKind::ManifestParse)
    }

    /// Read and parse the manifest at `path`.
    pub async fn read(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.or_raise(|| ErrorKind::ManifestParse)?;
        Self::parse(&text)
    }

    /// Every portable path across all entries.
    pub fn file_keys(&self) -> impl Iterator<Item = &str> {
        self.backups.iter().flat_map(|entry| entry.files.keys().map(String::as_str))
    }

    /// Map a portable path back to where the generator stored it, relative
    /// to the manifest's directory.
    ///
    /// Every occurrence of a drive's segment is swapped for its folder name.
    /// A drive with an empty segment holds absolute Unix paths; it only
    /// prefixes paths starting with `/`, after the named drives are applied.
    pub fn source_relative(&self, key: &str) -> String {
        let mut path = key.to_string();
        let mut root_drive = None;
        for (folder, segment) in &self.drives {
            if segment.is_empty() {
                root_drive.get_or_insert(folder);
            } else {
                path = path.replace(segment.as_str(), folder);
            }
        }
        match root_drive {
            Some(folder) if path.starts_with('/') => format!("{folder}{path}"),
            _ => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = r#"
name: "1245620"
drives:
  drive-C: "C:"
  drive-0: ""
backups:
  - name: "1245620"
    when: "2024-01-01T00:00:00Z"
    files:
      "C:/users/me/AppData/Roaming/Game/slot1.sav":
        size: 2048
        hash: abc
      "/home/me/.config/game/settings.ini":
        size: 10
    registry:
      hash: ~
  - name: "1245620"
    files: {}
"#;

    #[test]
    fn test_parse() {
        let manifest = BackupManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.backups.len(), 2);
        assert_eq!(manifest.drives.get("drive-C").map(String::as_str), Some("C:"));
        let file = &manifest.backups[0].files["C:/users/me/AppData/Roaming/Game/slot1.sav"];
        assert_eq!(file.size, 2048);
        assert_eq!(file.hash.as_deref(), Some("abc"));
        assert_eq!(manifest.file_keys().count(), 2);
    }

    #[rstest]
    #[case::not_yaml("backups: [unclosed")]
    #[case::missing_backups("drives: {}\n")]
    #[case::wrong_shape("backups: 42\n")]
    fn test_parse_invalid(#[case] text: &str) {
        let err = BackupManifest::parse(text).unwrap_err();
        assert_eq!(*err, ErrorKind::ManifestParse);
    }

    #[test]
    fn test_parse_without_drives() {
        let manifest = BackupManifest::parse("backups: []\n").unwrap();
        assert!(manifest.drives.is_empty());
        assert!(manifest.backups.is_empty());
    }

    #[rstest]
    #[case::windows_drive("C:/users/me/slot1.sav", "drive-C/users/me/slot1.sav")]
    #[case::unix_root("/home/me/.config/game/settings.ini", "drive-0/home/me/.config/game/settings.ini")]
    #[case::backslashes(r"D:\saves\slot1.sav", r"steamapps\saves\slot1.sav")]
    #[case::every_occurrence(r"D:\a\D:\b", r"steamapps\a\steamapps\b")]
    #[case::unmatched("relative/path.sav", "relative/path.sav")]
    fn test_source_relative(#[case] key: &str, #[case] expected: &str) {
        let manifest = BackupManifest {
            backups: Vec::new(),
            drives: BTreeMap::from([
                ("drive-0".to_string(), String::new()),
                ("drive-C".to_string(), "C:".to_string()),
                ("steamapps".to_string(), "D:".to_string()),
            ]),
        };
        assert_eq!(manifest.source_relative(key), expected);
    }

    #[test]
    fn test_source_relative_replaces_values_with_keys() {
        // Only drive values are looked for in a key; the table's keys are
        // what they get replaced with.
        let manifest = BackupManifest {
            backups: Vec::new(),
            drives: BTreeMap::from([("D:".to_string(), "steamapps".to_string())]),
        };
        assert_eq!(manifest.source_relative(r"D:\saves\slot1.sav"), r"D:\saves\slot1.sav");
        assert_eq!(manifest.source_relative(r"steamapps\saves\slot1.sav"), r"D:\saves\slot1.sav");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BackupManifest::read(&dir.path().join(MANIFEST_FILE)).await.unwrap_err();
        assert_eq!(*err, ErrorKind::ManifestParse);
    }
}
