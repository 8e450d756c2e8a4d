//! Discovery of a usable temporary files directory
//!
//! Probes the conventional candidate sources in order and returns the first
//! directory proven usable by exclusively creating and unlinking a probe
//! file in it. The answer cannot change for the life of the process, so it
//! is discovered once and cached.

use crate::error::{Error, Result};
use crate::file::{self, Creation, Mode};
use crate::handle::{Caching, HandleFlags};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    for var in ["TMPDIR", "TMP", "TEMP"] {
        if let Some(dir) = std::env::var_os(var) {
            if !dir.is_empty() {
                out.push(PathBuf::from(dir));
            }
        }
    }
    out.push(std::env::temp_dir());
    out.push(PathBuf::from("/tmp"));
    out.push(PathBuf::from("/var/tmp"));
    out
}

fn probe(dir: &Path) -> bool {
    let name = format!(".probe_{}_{:x}", std::process::id(), rand::random::<u32>());
    let path = dir.join(name);
    let opened = file::open(
        &path,
        Mode::Write,
        Creation::OnlyIfNotExist,
        Caching::Temporary,
        HandleFlags::UNLINK_ON_FIRST_CLOSE,
    );
    match opened {
        Ok(mut handle) => {
            if let Err(e) = handle.close() {
                tracing::debug!("probe file close in {} failed: {}", dir.display(), e);
            }
            true
        }
        Err(_) => false,
    }
}

/// The first temporary files directory proven writable, cached for the
/// process lifetime.
///
/// # Errors
///
/// A platform error if no candidate directory accepts a probe file.
pub fn storage_backed_temporary_files_directory() -> Result<&'static Path> {
    static DISCOVERED: OnceLock<Option<PathBuf>> = OnceLock::new();
    let found = DISCOVERED.get_or_init(|| {
        for dir in candidates() {
            if probe(&dir) {
                tracing::debug!("temporary files directory: {}", dir.display());
                return Some(dir);
            }
        }
        None
    });
    match found {
        Some(dir) => Ok(dir.as_path()),
        None => Err(Error::Platform(io::Error::from_raw_os_error(libc::ENOENT))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_a_writable_directory() {
        let dir = storage_backed_temporary_files_directory().unwrap();
        assert!(dir.is_dir());
        // Cached: the same answer every time.
        let again = storage_backed_temporary_files_directory().unwrap();
        assert_eq!(dir, again);
    }
}
