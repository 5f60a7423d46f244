//! Uncompressed tar archives of save directories.
//!
//! A backup artifact is a plain tar whose root is the *contents* of the
//! staging directory (there is no top-level folder entry). This crate offers
//! the path-based pair [`create`] / [`extract`] plus the stream-based pair
//! [`pack`] / [`unpack`], which storage backends use to write straight into
//! (or read straight from) a provider without an intermediate copy.
//!
//! Everything here is blocking; async callers should run it inside
//! [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html).
//! Nothing is validated against an expected file list.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tar::{Archive, Builder};
use tracing::instrument;

/// File extension of backup archives (without the leading dot).
pub const EXTENSION: &str = "tar";

/// Packs the entire contents of `source_dir` into a new archive file at
/// `destination`, replacing any existing file. Returns the archive size.
#[instrument(skip_all, fields(source = %source_dir.as_ref().display(), destination = %destination.as_ref().display()))]
pub fn create(source_dir: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<u64> {
    let file = File::create(destination.as_ref()).or_raise(|| ErrorKind::Create)?;
    let writer = pack(source_dir, BufWriter::new(file))?;
    let file = writer.into_inner().map_err(|e| e.into_error()).or_raise(|| ErrorKind::Create)?;
    Ok(file.metadata().or_raise(|| ErrorKind::Create)?.len())
}

/// Packs the entire contents of `source_dir` into `writer`.
///
/// The archive trailer is written and `writer` flushed before it is handed
/// back, so buffered remote writers have committed by the time this returns.
pub fn pack<W: Write>(source_dir: impl AsRef<Path>, writer: W) -> Result<W> {
    let source_dir = source_dir.as_ref();
    if !source_dir.is_dir() {
        exn::bail!(ErrorKind::SourceNotDirectory(source_dir.to_path_buf()));
    }
    let mut builder = Builder::new(writer);
    // Don't dereference symlinks; save folders occasionally contain links
    // back into the game install.
    builder.follow_symlinks(false);
    // An empty archive path puts the directory's children at the root.
    builder.append_dir_all("", source_dir).or_raise(|| ErrorKind::Create)?;
    let mut writer = builder.into_inner().or_raise(|| ErrorKind::Create)?;
    writer.flush().or_raise(|| ErrorKind::Create)?;
    tracing::debug!(source = %source_dir.display(), "Archive packed");
    Ok(writer)
}

/// Unpacks the archive file at `archive` into `destination`, which must
/// already exist. Files already present at the same relative paths are
/// overwritten.
#[instrument(skip_all, fields(archive = %archive.as_ref().display(), destination = %destination.as_ref().display()))]
pub fn extract(archive: impl AsRef<Path>, destination: impl AsRef<Path>) -> Result<()> {
    let file = File::open(archive.as_ref()).or_raise(|| ErrorKind::Extract)?;
    unpack(BufReader::new(file), destination)
}

/// Unpacks an archive read from `reader` into `destination`, which must
/// already exist.
pub fn unpack<R: Read>(reader: R, destination: impl AsRef<Path>) -> Result<()> {
    let destination = destination.as_ref();
    if !destination.is_dir() {
        exn::bail!(ErrorKind::DestinationNotDirectory(destination.to_path_buf()));
    }
    let mut archive = Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_mtime(true);
    archive.unpack(destination).or_raise(|| ErrorKind::Extract)?;
    tracing::debug!(destination = %destination.display(), "Archive unpacked");
    Ok(())
}
