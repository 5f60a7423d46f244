//! Translation between Wine-prefix paths and portable Windows-style paths.
//!
//! Inside a Wine prefix the `C:` drive lives under `<prefix>/drive_c`, so
//! `/home/me/.wine/drive_c/users/me/Saved Games` is the portable path
//! `C:/users/me/Saved Games` relative to the prefix `/home/me/.wine`.
//!
//! These are plain string rewrites. They are exact inverses only for paths
//! under the prefix's `drive_c`; anything else passes through unchanged
//! rather than being guessed at.

/// Directory inside a Wine prefix that backs the `C:` drive.
pub const WINE_DRIVE_ROOT: &str = "drive_c";
/// Windows token for the drive backed by [`WINE_DRIVE_ROOT`].
pub const WINDOWS_DRIVE: &str = "C:";
/// The shared profile every Windows user can write to.
pub const PUBLIC_PROFILE: &str = "C:/Users/Public";

/// Convert a real on-disk path into its portable form.
pub fn to_portable_path(real_path: &str, wine_prefix: Option<&str>) -> String {
    let relative = match wine_prefix {
        Some(prefix) => Substitution::StripPrefix(with_trailing_slash(prefix)).apply(real_path),
        None => real_path.to_string(),
    };
    Substitution::replace_first(WINE_DRIVE_ROOT, WINDOWS_DRIVE).apply(&relative)
}

/// Convert a portable path into a real path inside `wine_prefix`.
///
/// Without a prefix the portable path is already real (native Windows).
pub fn to_real_path(portable_path: &str, wine_prefix: Option<&str>) -> String {
    let Some(prefix) = wine_prefix else {
        return portable_path.to_string();
    };
    let inner = Substitution::replace_first(WINDOWS_DRIVE, WINE_DRIVE_ROOT).apply(portable_path);
    format!("{}/{}", prefix.trim_end_matches('/'), inner.trim_start_matches('/'))
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') { path.to_string() } else { format!("{path}/") }
}

/// One step of a path rewrite.
///
/// Rewrites are modelled as an ordered list of these rather than ad-hoc
/// `replace` chains, so the exact sequence can be inspected and tested.
/// Rules with an empty pattern never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// Remove a leading prefix, if present.
    StripPrefix(String),
    /// Replace the first occurrence of `from`.
    ReplaceFirst { from: String, to: String },
    /// Replace every occurrence of `from`.
    ReplaceAll { from: String, to: String },
}

impl Substitution {
    pub fn replace_first(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::ReplaceFirst { from: from.into(), to: to.into() }
    }

    pub fn replace_all(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::ReplaceAll { from: from.into(), to: to.into() }
    }

    pub fn apply(&self, input: &str) -> String {
        match self {
            Self::StripPrefix(prefix) if !prefix.is_empty() => {
                input.strip_prefix(prefix.as_str()).unwrap_or(input).to_string()
            },
            Self::ReplaceFirst { from, to } if !from.is_empty() => input.replacen(from.as_str(), to, 1),
            Self::ReplaceAll { from, to } if !from.is_empty() => input.replace(from.as_str(), to),
            _ => input.to_string(),
        }
    }
}

/// Apply `rules` in order, each to the output of the previous one.
pub fn apply_all(rules: &[Substitution], input: &str) -> String {
    rules.iter().fold(input.to_string(), |path, rule| rule.apply(&path))
}
