use crate::error::CacheError;
use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Name prefix of files being written by [`atomic_write`].
pub(crate) const STAGED_PREFIX: &str = ".staged-";

/// Upper bound for a single bincode payload embedded in a cache file.
pub(crate) const BINCODE_PAYLOAD_LIMIT_BYTES: u64 = 16 * 1024 * 1024;

fn bincode_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

pub(crate) fn bincode_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    Ok(bincode_options().serialize(value)?)
}

pub(crate) fn bincode_deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    Ok(bincode_options()
        .with_limit(BINCODE_PAYLOAD_LIMIT_BYTES)
        .deserialize(bytes)?)
}

/// Writes `bytes` to `path` so readers observe either the previous file or the complete new one.
///
/// The data is staged in a temporary file next to `path`, synced and renamed over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => return Err(io::Error::other("path has no parent").into()),
    };
    fs::create_dir_all(parent)?;

    let mut staged = tempfile::Builder::new()
        .prefix(STAGED_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    // On failure the temporary file is removed when the returned error drops it.
    staged.persist(path)?;
    Ok(())
}

/// Reads a cache file of at most `limit` bytes.
///
/// Missing files, symlinks and oversized files read as `None`; the latter two are deleted since
/// the cache never creates them.
pub(crate) fn read_file_limited(path: &Path, limit: usize) -> Option<Vec<u8>> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "unravel.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to stat cache file"
                );
            }
            return None;
        }
    };
    if !meta.is_file() || meta.len() > limit as u64 {
        remove_file_best_effort(path, "unexpected file type or size");
        return None;
    }

    let mut bytes = Vec::with_capacity(meta.len() as usize);
    let read = fs::File::open(path)
        .and_then(|file| file.take(limit as u64 + 1).read_to_end(&mut bytes));
    match read {
        Ok(len) if len > limit => {
            remove_file_best_effort(path, "file grew past limit");
            None
        }
        Ok(_) => Some(bytes),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!(
                    target: "unravel.cache",
                    path = %path.display(),
                    error = %err,
                    "failed to read cache file"
                );
            }
            None
        }
    }
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target: "unravel.cache",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove cache file"
            );
            false
        }
    }
}
