//! Reading and restoring archives.

use crate::codec::{Codec, read_chunk};
use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::format::{
    ArchiveHeader, BLOB_HEADER_SIZE, BlobEntry, BlobHeader, HEADER_SIZE, MIN_FILE_ENTRY_SIZE,
};
use crate::hash::{Algorithm, Hash};
use crate::log::SharedLogger;
use crate::scan::FileRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

/// Summary of a successful unpack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpackStats {
    /// Files restored.
    pub files: usize,
    /// Bytes written across all restored files.
    pub bytes: u64,
}

/// An open archive with its blob table loaded.
///
/// Opening reads the header and walks the blob section without decompressing
/// anything, so a bad magic, an unsupported version or a blob section shorter
/// than declared is reported before any file is touched.
pub struct ArchiveReader {
    path: PathBuf,
    reader: BufReader<File>,
    header: ArchiveHeader,
    blobs: HashMap<Hash, BlobEntry>,
    index_offset: u64,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::source_unreadable(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| Error::source_unreadable(path, e))?
            .len();

        let mut archive = Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            header: ArchiveHeader::new(0, 0),
            blobs: HashMap::new(),
            index_offset: HEADER_SIZE as u64,
        };

        archive.header = ArchiveHeader::read_from(&mut archive.reader)
            .map_err(|e| archive.read_error(e))?;
        archive.load_blob_index(len)?;
        Ok(archive)
    }

    /// Record every blob's position, skipping over the payloads.
    fn load_blob_index(&mut self, len: u64) -> Result<()> {
        let mut pos = HEADER_SIZE as u64;

        // Every blob needs at least its header, so the count is bounded by the file size
        let room = len.saturating_sub(HEADER_SIZE as u64) / BLOB_HEADER_SIZE as u64;
        if u64::from(self.header.blob_count) > room {
            return Err(Error::corrupt_archive(
                &self.path,
                format!(
                    "header declares {} blobs but a {} byte archive holds at most {}",
                    self.header.blob_count, len, room
                ),
            ));
        }
        self.blobs.reserve(self.header.blob_count as usize);

        for i in 0..self.header.blob_count {
            let blob = BlobHeader::read_from(&mut self.reader).map_err(|e| self.read_error(e))?;
            let offset = pos + BLOB_HEADER_SIZE as u64;
            let end = offset
                .checked_add(blob.compressed_size)
                .filter(|end| *end <= len)
                .ok_or_else(|| {
                    Error::corrupt_archive(
                        &self.path,
                        format!(
                            "blob {} ({}) claims {} payload bytes past offset {}, archive is {} bytes",
                            i, blob.hash, blob.compressed_size, offset, len
                        ),
                    )
                })?;

            let entry = BlobEntry {
                hash: blob.hash,
                original_size: blob.original_size,
                compressed_size: blob.compressed_size,
                offset,
            };
            if self.blobs.insert(blob.hash, entry).is_some() {
                return Err(Error::corrupt_archive(
                    &self.path,
                    format!("blob {} stored twice", blob.hash),
                ));
            }

            self.seek_to(end)?;
            pos = end;
        }

        let room = len.saturating_sub(pos) / MIN_FILE_ENTRY_SIZE as u64;
        if u64::from(self.header.file_count) > room {
            return Err(Error::corrupt_archive(
                &self.path,
                format!(
                    "header declares {} files but {} index bytes hold at most {}",
                    self.header.file_count,
                    len.saturating_sub(pos),
                    room
                ),
            ));
        }

        self.index_offset = pos;
        Ok(())
    }

    /// Map a read failure: short or malformed data is corruption, anything else
    /// is an I/O problem with the archive file.
    fn read_error(&self, e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Error::corrupt_archive(&self.path, "unexpected end of archive")
            }
            io::ErrorKind::InvalidData => Error::corrupt_archive(&self.path, e.to_string()),
            _ => Error::source_unreadable(&self.path, e),
        }
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos)).map_err(|e| {
            Error::corrupt_archive(&self.path, format!("seek to {} failed: {}", pos, e))
        })?;
        Ok(())
    }

    fn position(&mut self) -> Result<u64> {
        self.reader
            .stream_position()
            .map_err(|e| Error::source_unreadable(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Look up a blob by content hash.
    pub fn blob(&self, hash: &Hash) -> Option<&BlobEntry> {
        self.blobs.get(hash)
    }

    /// All blobs, in archive order.
    pub fn blobs(&self) -> Vec<BlobEntry> {
        let mut blobs: Vec<_> = self.blobs.values().copied().collect();
        blobs.sort_by_key(|b| b.offset);
        blobs
    }

    /// Position the cursor at the first file entry.
    pub fn rewind_index(&mut self) -> Result<()> {
        self.seek_to(self.index_offset)
    }

    /// Read the file entry at the cursor and resolve its blob.
    pub fn next_entry(&mut self) -> Result<(FileRecord, BlobEntry)> {
        let record = FileRecord::read_from(&mut self.reader).map_err(|e| self.read_error(e))?;
        let blob = *self.blob(&record.hash).ok_or_else(|| {
            Error::corrupt_archive(
                &self.path,
                format!(
                    "{} references blob {} which is not stored",
                    record.relative_path, record.hash
                ),
            )
        })?;
        if blob.original_size != record.size {
            return Err(Error::corrupt_archive(
                &self.path,
                format!(
                    "{} is {} bytes but blob {} holds {}",
                    record.relative_path, record.size, record.hash, blob.original_size
                ),
            ));
        }
        Ok((record, blob))
    }

    /// Read the whole file index.
    pub fn entries(&mut self) -> Result<Vec<FileRecord>> {
        self.rewind_index()?;
        (0..self.header.file_count)
            .map(|_| self.next_entry().map(|(record, _)| record))
            .collect()
    }
}

/// Restores archives into directory trees.
pub struct Unpacker {
    config: ArchiveConfig,
    algorithm: Algorithm,
    codec: Arc<dyn Codec>,
    logger: SharedLogger,
}

impl Unpacker {
    pub fn new(
        config: ArchiveConfig,
        algorithm: Algorithm,
        codec: Arc<dyn Codec>,
        logger: SharedLogger,
    ) -> Self {
        Self {
            config,
            algorithm,
            codec,
            logger,
        }
    }

    /// Restore every file in `archive_path` under `dest`.
    ///
    /// Entries are restored in index order. On error, files restored before the
    /// failing entry stay in place and nothing after it is written.
    pub fn unpack(&self, archive_path: &Path, dest: &Path) -> Result<UnpackStats> {
        self.logger.debug(&format!(
            "unpack: {} -> {} ({}, {})",
            archive_path.display(),
            dest.display(),
            self.algorithm.as_str(),
            self.codec.name()
        ));

        let result = self.unpack_inner(archive_path, dest);
        match &result {
            Ok(stats) => self.logger.info(&format!(
                "unpack: restored {} files ({} bytes) into {}",
                stats.files,
                stats.bytes,
                dest.display()
            )),
            Err(e) => self.logger.error(&format!("unpack failed: {}", e)),
        }
        result
    }

    fn unpack_inner(&self, archive_path: &Path, dest: &Path) -> Result<UnpackStats> {
        self.config.validate()?;

        let mut archive = ArchiveReader::open(archive_path)?;
        let header = *archive.header();
        self.logger.debug(&format!(
            "unpack: {} blobs, {} files",
            header.blob_count, header.file_count
        ));

        fs::create_dir_all(dest).map_err(|e| Error::destination_unwritable(dest, e))?;
        archive.rewind_index()?;

        let mut stats = UnpackStats { files: 0, bytes: 0 };
        for _ in 0..header.file_count {
            let (record, blob) = archive.next_entry()?;
            let out_path = dest.join(&record.relative_path);

            let resume = archive.position()?;
            archive.seek_to(blob.offset)?;
            let file = self.extract_blob(&mut archive, &blob, &out_path)?;
            archive.seek_to(resume)?;

            apply_metadata(file, &out_path, &record, archive.path())?;

            self.logger
                .trace(&format!("unpack: {} {}", record.hash.short(), record.relative_path));
            stats.files += 1;
            stats.bytes += record.size;
        }

        Ok(stats)
    }

    /// Decompress exactly `blob.compressed_size` bytes from the archive cursor
    /// into a new file at `out_path`. Returns the still-open output file.
    fn extract_blob(
        &self,
        archive: &mut ArchiveReader,
        blob: &BlobEntry,
        out_path: &Path,
    ) -> Result<File> {
        let archive_path = archive.path().to_path_buf();
        let unwritable = |e: io::Error| Error::destination_unwritable(out_path, e);

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::destination_unwritable(parent, e))?;
        }
        let file = File::create(out_path).map_err(unwritable)?;
        let mut writer = BufWriter::new(file);

        let mut decompressor = self.codec.decompressor(self.config.chunk_size)?;
        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; self.config.chunk_size];

        let mut written = 0u64;
        let mut sink = |bytes: &[u8]| -> Result<()> {
            written += bytes.len() as u64;
            if written > blob.original_size {
                return Err(Error::corrupt_archive(
                    &archive_path,
                    format!(
                        "blob {} decodes to more than {} bytes",
                        blob.hash, blob.original_size
                    ),
                ));
            }
            hasher.update(bytes);
            writer.write_all(bytes).map_err(unwritable)
        };

        let mut remaining = blob.compressed_size;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = read_chunk(&mut archive.reader, &mut buf[..want])
                .map_err(|e| Error::source_unreadable(&archive_path, e))?;
            if n == 0 {
                return Err(Error::corrupt_archive(
                    &archive_path,
                    format!(
                        "blob {} truncated, {} payload bytes missing",
                        blob.hash, remaining
                    ),
                ));
            }
            remaining -= n as u64;
            decompressor.decompress_chunk(&buf[..n], &mut sink)?;
        }
        decompressor.finish()?;

        if written != blob.original_size {
            return Err(Error::corrupt_archive(
                &archive_path,
                format!(
                    "blob {} decoded to {} bytes, expected {}",
                    blob.hash, written, blob.original_size
                ),
            ));
        }
        if self.config.verify_on_restore {
            let actual = hasher.finalize();
            if actual != blob.hash {
                return Err(Error::corrupt_archive(
                    &archive_path,
                    format!("blob {} decoded to content {}", blob.hash, actual),
                ));
            }
        }

        writer
            .into_inner()
            .map_err(|e| Error::destination_unwritable(out_path, e.into_error()))
    }
}

/// Replay the modification time and read-only bit onto a restored file.
fn apply_metadata(
    file: File,
    path: &Path,
    record: &FileRecord,
    archive_path: &Path,
) -> Result<()> {
    let mtime = UNIX_EPOCH
        .checked_add(Duration::from_secs(record.modified))
        .ok_or_else(|| {
            Error::corrupt_archive(
                archive_path,
                format!(
                    "{} has out-of-range mtime {}",
                    record.relative_path, record.modified
                ),
            )
        })?;
    file.set_modified(mtime).map_err(|e| Error::filesystem(path, e))?;
    drop(file);

    if record.read_only {
        let mut perms = fs::metadata(path)
            .map_err(|e| Error::filesystem(path, e))?
            .permissions();
        clear_owner_write(&mut perms);
        fs::set_permissions(path, perms).map_err(|e| Error::filesystem(path, e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn clear_owner_write(perms: &mut fs::Permissions) {
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(perms.mode() & !0o200);
}

#[cfg(not(unix))]
fn clear_owner_write(perms: &mut fs::Permissions) {
    perms.set_readonly(true);
}
