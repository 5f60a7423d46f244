//! File and directory naming for backup artifacts.
//!
//! An artifact is identified purely by its archive file name; the sidecar is
//! found by appending [`SIDECAR_SUFFIX`] to it.

use savestash_archive::EXTENSION;
use time::{Duration, OffsetDateTime};

/// Appended to an archive name to get its sidecar's name.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Appended to an archive name while it's still being written. Such files
/// never match [`is_game_archive`].
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Milliseconds since the Unix epoch.
pub fn unix_millis(at: OffsetDateTime) -> i128 {
    at.unix_timestamp_nanos() / 1_000_000
}

/// `<shop>-<objectId>-<unixMillis>.tar`
pub fn game_archive_name(shop: &str, object_id: &str, at: OffsetDateTime) -> String {
    format!("{}{}.{EXTENSION}", game_id_prefix(shop, object_id), unix_millis(at))
}

/// `<prefix>-<unixMillis>.tar`, for emulator save slots.
pub fn rom_saves_archive_name(prefix: &str, at: OffsetDateTime) -> String {
    format!("{prefix}-{}.{EXTENSION}", unix_millis(at))
}

/// Name every archive for this game starts with.
pub fn game_id_prefix(shop: &str, object_id: &str) -> String {
    format!("{shop}-{object_id}-")
}

pub fn sidecar_name(archive_name: &str) -> String {
    format!("{archive_name}{SIDECAR_SUFFIX}")
}

pub fn partial_name(archive_name: &str) -> String {
    format!("{archive_name}{PARTIAL_SUFFIX}")
}

/// Directory under the staging root owned by this game.
pub fn staging_dir_name(shop: &str, object_id: &str) -> String {
    format!("{shop}-{object_id}")
}

/// Whether `name` looks like one of this game's archives.
pub fn is_game_archive(name: &str, id_prefix: &str) -> bool {
    name.starts_with(id_prefix) && name.ends_with(&format!(".{EXTENSION}"))
}

/// Next timestamp to try when a name is already taken.
pub(crate) fn bump(at: OffsetDateTime) -> OffsetDateTime {
    at + Duration::milliseconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap()
    }

    #[test]
    fn test_names() {
        assert_eq!(game_archive_name("steam", "1245620", at()), "steam-1245620-1700000000123.tar");
        assert_eq!(rom_saves_archive_name("rom-saves", at()), "rom-saves-1700000000123.tar");
        assert_eq!(sidecar_name("steam-1245620-1700000000123.tar"), "steam-1245620-1700000000123.tar.meta.json");
        assert_eq!(partial_name("steam-1245620-1700000000123.tar"), "steam-1245620-1700000000123.tar.partial");
        assert_eq!(staging_dir_name("steam", "1245620"), "steam-1245620");
    }

    #[test]
    fn test_bump_changes_name() {
        assert_eq!(game_archive_name("steam", "1", bump(at())), "steam-1-1700000000124.tar");
    }

    #[rstest]
    #[case::own("steam-42-1700000000000.tar", true)]
    #[case::sidecar("steam-42-1700000000000.tar.meta.json", false)]
    #[case::other_game("steam-420-1700000000000.tar", false)]
    #[case::other_shop("gog-42-1700000000000.tar", false)]
    #[case::partial("steam-42-1700000000000.tar.partial", false)]
    fn test_is_game_archive(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_game_archive(name, &game_id_prefix("steam", "42")), expected);
    }
}
