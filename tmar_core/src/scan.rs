//! Directory scanning and per-file fingerprinting.

use crate::format::is_safe_relative_path;
use crate::hash::{Algorithm, Hash};
use crate::log::SharedLogger;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path};
use std::time::UNIX_EPOCH;

/// Metadata for one regular file found under the scan root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Path relative to the scan root, '/'-separated on every platform.
    pub relative_path: String,
    /// Digest of the file content.
    pub hash: Hash,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Owner-write permission was absent.
    pub read_only: bool,
    /// Modification time in whole seconds since the Unix epoch.
    pub modified: u64,
}

/// Walks a directory tree and fingerprints every regular file.
pub struct Scanner {
    algorithm: Algorithm,
    chunk_size: usize,
    logger: SharedLogger,
}

impl Scanner {
    pub fn new(algorithm: Algorithm, chunk_size: usize, logger: SharedLogger) -> Self {
        Self {
            algorithm,
            chunk_size,
            logger,
        }
    }

    /// Scan `root` recursively, returning records sorted by relative path.
    ///
    /// An empty or non-directory root yields an empty list. Files that cannot be
    /// read are logged and left out. A traversal error other than a permission
    /// denial ends the walk early; whatever was collected is still returned.
    pub fn scan(&self, root: &Path) -> Vec<FileRecord> {
        self.logger.debug(&format!("scan: start {}", root.display()));

        let mut records = Vec::new();

        if root.as_os_str().is_empty() || !root.is_dir() {
            self.logger
                .debug(&format!("scan: {} is not a directory, nothing to do", root.display()));
            return records;
        }

        let walker = ignore::WalkBuilder::new(root)
            .standard_filters(false) // Archive everything, hidden and ignored files included
            .follow_links(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_permission_denied(&err) => {
                    self.logger.warn(&format!("scan: skipping {}", err));
                    continue;
                }
                Err(err) => {
                    self.logger.error(&format!("scan: traversal aborted: {}", err));
                    break;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            match self.record_file(root, entry.path()) {
                Ok(Some(record)) => {
                    self.logger
                        .trace(&format!("scan: {} {}", record.hash.short(), record.relative_path));
                    records.push(record);
                }
                Ok(None) => {}
                Err(err) => {
                    self.logger
                        .warn(&format!("scan: skipping {}: {}", entry.path().display(), err));
                }
            }
        }

        records.sort_by(|a, b| a.relative_path.as_bytes().cmp(b.relative_path.as_bytes()));

        self.logger
            .debug(&format!("scan: done, {} files under {}", records.len(), root.display()));
        records
    }

    /// Fingerprint one file. `Ok(None)` means the file cannot be represented in
    /// an archive and was skipped.
    fn record_file(&self, root: &Path, path: &Path) -> io::Result<Option<FileRecord>> {
        let Some(relative_path) = relative_path(root, path) else {
            self.logger
                .warn(&format!("scan: skipping {}: path is not valid UTF-8", path.display()));
            return Ok(None);
        };

        let metadata = fs::metadata(path)?;
        let file = fs::File::open(path)?;
        let (hash, size) = self.algorithm.hash_reader(file, self.chunk_size)?;

        Ok(Some(FileRecord {
            relative_path,
            hash,
            size,
            read_only: is_read_only(&metadata),
            modified: modified_secs(&metadata),
        }))
    }
}

/// Build the '/'-separated path of `path` relative to `root`.
pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            _ => return None,
        }
    }

    let joined = parts.join("/");
    is_safe_relative_path(&joined).then_some(joined)
}

fn is_permission_denied(err: &ignore::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied)
}

/// Seconds since the epoch, sub-second part dropped. Pre-epoch times clamp to 0.
fn modified_secs(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

#[cfg(unix)]
fn is_read_only(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o200 == 0
}

#[cfg(not(unix))]
fn is_read_only(metadata: &fs::Metadata) -> bool {
    metadata.permissions().readonly()
}
