//! Writing archives.

use crate::codec::{Codec, read_chunk};
use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::format::{ArchiveHeader, BLOB_HEADER_SIZE, BLOB_SIZES_OFFSET, BlobHeader};
use crate::hash::{Algorithm, Hash};
use crate::log::SharedLogger;
use crate::scan::{FileRecord, Scanner, relative_path};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Summary of a successful pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackStats {
    /// Entries in the file index.
    pub files: usize,
    /// Distinct blobs stored.
    pub blobs: usize,
    /// Uncompressed bytes across all distinct blobs.
    pub bytes_in: u64,
    /// Total archive size.
    pub bytes_out: u64,
}

/// Result of a pack call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PackOutcome {
    /// The root held no files; no archive was written.
    NothingToDo,
    /// The archive was written.
    Packed(PackStats),
}

/// One distinct blob and the file its bytes are read from.
struct BlobSource {
    path: PathBuf,
    size: u64,
}

/// Builds archives from directory trees.
///
/// The source tree must not change while a pack is running. Every blob is
/// re-hashed as it is compressed and a mismatch against the scan aborts the pack.
pub struct Packer {
    config: ArchiveConfig,
    algorithm: Algorithm,
    codec: Arc<dyn Codec>,
    logger: SharedLogger,
}

impl Packer {
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

    /// Pack every regular file under `root` into a new archive at `archive_path`.
    ///
    /// When `archive_path` lies inside `root`, the archive's own file is left out.
    ///
    /// On error the archive file may be left behind, truncated; it must not be used.
    pub fn pack(&self, root: &Path, archive_path: &Path) -> Result<PackOutcome> {
        self.logger.debug(&format!(
            "pack: {} -> {} ({}, {})",
            root.display(),
            archive_path.display(),
            self.algorithm.as_str(),
            self.codec.name()
        ));

        let result = self.pack_inner(root, archive_path);
        match &result {
            Ok(PackOutcome::NothingToDo) => {
                self.logger
                    .info(&format!("pack: no files under {}, nothing to do", root.display()));
            }
            Ok(PackOutcome::Packed(stats)) => self.logger.info(&format!(
                "pack: wrote {} ({} files, {} blobs, {} -> {} bytes)",
                archive_path.display(),
                stats.files,
                stats.blobs,
                stats.bytes_in,
                stats.bytes_out
            )),
            Err(e) => self.logger.error(&format!("pack failed: {}", e)),
        }
        result
    }

    fn pack_inner(&self, root: &Path, archive_path: &Path) -> Result<PackOutcome> {
        self.config.validate()?;

        let scanner = Scanner::new(self.algorithm, self.config.chunk_size, self.logger.clone());
        let mut records = scanner.scan(root);
        if let Some(own) = archive_within_root(root, archive_path) {
            records.retain(|record| {
                let is_own = record.relative_path == own;
                if is_own {
                    self.logger
                        .debug(&format!("pack: skipping the archive itself at {}", own));
                }
                !is_own
            });
        }
        if records.is_empty() {
            return Ok(PackOutcome::NothingToDo);
        }

        let blobs = dedup(root, &records);
        self.logger.debug(&format!(
            "pack: {} files, {} distinct blobs",
            records.len(),
            blobs.len()
        ));

        let unwritable = |e: io::Error| Error::destination_unwritable(archive_path, e);
        let header = ArchiveHeader::new(
            count_u32(blobs.len(), archive_path)?,
            count_u32(records.len(), archive_path)?,
        );

        let file = File::create(archive_path).map_err(unwritable)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header.encode()).map_err(unwritable)?;

        let mut bytes_in = 0;
        for (hash, source) in &blobs {
            self.write_blob(&mut writer, archive_path, hash, source)?;
            bytes_in += source.size;
        }

        for record in &records {
            record.write_to(&mut writer).map_err(unwritable)?;
        }

        writer.flush().map_err(unwritable)?;
        let bytes_out = writer.stream_position().map_err(unwritable)?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::destination_unwritable(archive_path, e.into_error()))?;
        file.sync_all().map_err(unwritable)?;

        Ok(PackOutcome::Packed(PackStats {
            files: records.len(),
            blobs: blobs.len(),
            bytes_in,
            bytes_out,
        }))
    }

    /// Write one blob record, streaming the compressed payload straight into the
    /// archive. The size fields are written as zeros first and patched once the
    /// payload length is known.
    fn write_blob<W: Write + Seek>(
        &self,
        writer: &mut W,
        archive_path: &Path,
        hash: &Hash,
        source: &BlobSource,
    ) -> Result<()> {
        let unwritable = |e: io::Error| Error::destination_unwritable(archive_path, e);
        let unreadable = |e: io::Error| Error::source_unreadable(&source.path, e);

        let mut header = BlobHeader {
            hash: *hash,
            original_size: 0,
            compressed_size: 0,
        };
        let header_pos = writer.stream_position().map_err(unwritable)?;
        writer.write_all(&header.encode()).map_err(unwritable)?;

        let mut input = File::open(&source.path).map_err(unreadable)?;
        let mut compressor = self.codec.compressor(self.config.chunk_size)?;
        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; self.config.chunk_size];

        let mut compressed = 0u64;
        let mut sink = |bytes: &[u8]| -> Result<()> {
            writer.write_all(bytes).map_err(unwritable)?;
            compressed += bytes.len() as u64;
            Ok(())
        };

        loop {
            let n = read_chunk(&mut input, &mut buf).map_err(unreadable)?;
            if n == 0 {
                compressor.compress_chunk(&[], true, &mut sink)?;
                break;
            }
            hasher.update(&buf[..n]);
            header.original_size += n as u64;
            compressor.compress_chunk(&buf[..n], false, &mut sink)?;
        }

        if header.original_size != source.size {
            return Err(Error::source_changed(
                &source.path,
                format!(
                    "size was {} at scan time, read {} bytes",
                    source.size, header.original_size
                ),
            ));
        }
        let actual = hasher.finalize();
        if actual != *hash {
            return Err(Error::source_changed(
                &source.path,
                format!("content hash {} no longer matches {}", actual, hash),
            ));
        }

        header.compressed_size = compressed;
        let end = writer.stream_position().map_err(unwritable)?;
        debug_assert_eq!(end, header_pos + BLOB_HEADER_SIZE as u64 + compressed);

        writer
            .seek(SeekFrom::Start(header_pos + BLOB_SIZES_OFFSET))
            .map_err(unwritable)?;
        writer.write_all(&header.encode_sizes()).map_err(unwritable)?;
        writer.seek(SeekFrom::Start(end)).map_err(unwritable)?;

        self.logger.trace(&format!(
            "pack: blob {} {} -> {} bytes",
            hash.short(),
            header.original_size,
            header.compressed_size
        ));
        Ok(())
    }
}

/// Collapse records into one source per distinct hash. When several files share
/// a hash the last one seen is used; their bytes are identical.
fn dedup(root: &Path, records: &[FileRecord]) -> BTreeMap<Hash, BlobSource> {
    let mut blobs = BTreeMap::new();
    for record in records {
        blobs.insert(
            record.hash,
            BlobSource {
                path: root.join(&record.relative_path),
                size: record.size,
            },
        );
    }
    blobs
}

/// Relative path of `archive_path` under `root`, if the archive is written inside
/// the tree being packed.
fn archive_within_root(root: &Path, archive_path: &Path) -> Option<String> {
    let root = root.canonicalize().ok()?;
    let parent = match archive_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let archive = parent.canonicalize().ok()?.join(archive_path.file_name()?);
    relative_path(&root, &archive)
}

fn count_u32(count: usize, archive_path: &Path) -> Result<u32> {
    u32::try_from(count).map_err(|_| {
        Error::destination_unwritable(
            archive_path,
            io::Error::other(format!("{} entries exceed the format limit", count)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ZstdCodec;
    use crate::error::ErrorKind;
    use crate::format::{HEADER_SIZE, read_u64};
    use crate::log::NullLogger;
    use std::fs;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    fn packer(chunk_size: usize) -> Packer {
        Packer::new(
            ArchiveConfig::default().with_chunk_size(chunk_size),
            Algorithm::Blake3,
            Arc::new(ZstdCodec::default()),
            Arc::new(NullLogger),
        )
    }

    /// Parse an archive with plain reads, independent of the unpacker.
    fn parse(bytes: &[u8]) -> (ArchiveHeader, Vec<BlobHeader>, Vec<FileRecord>) {
        let mut cursor = Cursor::new(bytes);
        let header = ArchiveHeader::read_from(&mut cursor).unwrap();

        let mut blobs = Vec::new();
        for _ in 0..header.blob_count {
            let blob = BlobHeader::read_from(&mut cursor).unwrap();
            cursor
                .seek(SeekFrom::Current(blob.compressed_size as i64))
                .unwrap();
            blobs.push(blob);
        }

        let mut files = Vec::new();
        for _ in 0..header.file_count {
            files.push(FileRecord::read_from(&mut cursor).unwrap());
        }
        assert_eq!(cursor.position(), bytes.len() as u64, "trailing bytes");
        (header, blobs, files)
    }

    #[test]
    fn test_pack_dedups_identical_content() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("a.txt"), b"hello").unwrap();
        fs::write(root.join("b/a.txt"), b"hello").unwrap();
        fs::write(root.join("b/c.txt"), b"world").unwrap();

        let archive = temp_dir.path().join("out.tmar");
        let outcome = packer(1024).pack(&root, &archive).unwrap();

        let PackOutcome::Packed(stats) = outcome else {
            panic!("expected an archive");
        };
        assert_eq!(stats.files, 3);
        assert_eq!(stats.blobs, 2);
        assert_eq!(stats.bytes_in, 10);
        assert_eq!(stats.bytes_out, fs::metadata(&archive).unwrap().len());

        let bytes = fs::read(&archive).unwrap();
        let (header, blobs, files) = parse(&bytes);
        assert_eq!(header, ArchiveHeader::new(2, 3));
        assert!(blobs.iter().all(|b| b.original_size == 5));

        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b/a.txt", "b/c.txt"]);
        assert_eq!(files[0].hash, files[1].hash);
    }

    #[test]
    fn test_pack_compressed_size_matches_payload() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 13) as u8).collect();
        fs::write(root.join("big.bin"), &data).unwrap();
        fs::write(root.join("empty"), b"").unwrap();

        let archive = temp_dir.path().join("out.tmar");
        // Small chunks force many compressor calls per blob
        packer(4096).pack(&root, &archive).unwrap();

        let bytes = fs::read(&archive).unwrap();
        let (_, blobs, _) = parse(&bytes);
        assert_eq!(blobs.len(), 2);

        // Walk the blob section by hand: every payload decodes to its original size
        let mut cursor = Cursor::new(&bytes[HEADER_SIZE..]);
        for _ in 0..2 {
            let mut hash = [0u8; 32];
            cursor.read_exact(&mut hash).unwrap();
            let original = read_u64(&mut cursor).unwrap();
            let compressed = read_u64(&mut cursor).unwrap();
            let mut payload = vec![0u8; compressed as usize];
            cursor.read_exact(&mut payload).unwrap();

            let decoded = zstd::decode_all(&payload[..]).unwrap();
            assert_eq!(decoded.len() as u64, original);
            assert_eq!(Hash::hash_bytes(&decoded).as_bytes(), &hash);
        }
    }

    #[test]
    fn test_pack_blob_order_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        for i in 0..20 {
            fs::write(root.join(format!("f{:02}", i)), format!("content {}", i)).unwrap();
        }

        let first = temp_dir.path().join("1.tmar");
        let second = temp_dir.path().join("2.tmar");
        packer(1024).pack(&root, &first).unwrap();
        packer(1024).pack(&root, &second).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_pack_empty_root_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).unwrap();

        let archive = temp_dir.path().join("out.tmar");
        assert_eq!(
            packer(1024).pack(&root, &archive).unwrap(),
            PackOutcome::NothingToDo
        );
        assert!(!archive.exists());

        let missing = temp_dir.path().join("missing");
        assert_eq!(
            packer(1024).pack(&missing, &archive).unwrap(),
            PackOutcome::NothingToDo
        );
        assert!(!archive.exists());
    }

    #[test]
    fn test_pack_skips_archive_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"hello").unwrap();

        // A previous archive sits where the new one will be written
        let archive = root.join("sub/out.tmar");
        packer(1024).pack(&root, &archive).unwrap();
        let outcome = packer(1024).pack(&root, &archive).unwrap();
        let PackOutcome::Packed(stats) = outcome else {
            panic!("expected an archive");
        };
        assert_eq!(stats.files, 1);

        let (_, _, files) = parse(&fs::read(&archive).unwrap());
        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt"]);
    }

    #[test]
    fn test_archive_within_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();

        assert_eq!(
            archive_within_root(&root, &root.join("sub/../sub/x.tmar")).as_deref(),
            Some("sub/x.tmar")
        );
        assert_eq!(archive_within_root(&root, &temp_dir.path().join("x.tmar")), None);
        assert_eq!(archive_within_root(&root, &root.join("missing/x.tmar")), None);
    }

    #[test]
    fn test_pack_unwritable_destination() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a"), b"a").unwrap();

        let archive = temp_dir.path().join("no/such/dir/out.tmar");
        let err = packer(1024).pack(&root, &archive).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationUnwritable);
    }

    #[test]
    fn test_pack_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let err = packer(0)
            .pack(temp_dir.path(), &temp_dir.path().join("x.tmar"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_blob_source_changed_is_detected() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("src");
        fs::write(&source, b"now longer than before").unwrap();

        let mut out = Cursor::new(Vec::new());
        let err = packer(1024)
            .write_blob(
                &mut out,
                Path::new("out.tmar"),
                &Hash::hash_bytes(b"short"),
                &BlobSource {
                    path: source.clone(),
                    size: 5,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::SourceChanged { .. }));

        // Same length, different bytes
        fs::write(&source, b"SHORT").unwrap();
        let mut out = Cursor::new(Vec::new());
        let err = packer(1024)
            .write_blob(
                &mut out,
                Path::new("out.tmar"),
                &Hash::hash_bytes(b"short"),
                &BlobSource { path: source, size: 5 },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnreadable);
    }

    #[test]
    fn test_dedup_keeps_last_source() {
        let hash = Hash::hash_bytes(b"same");
        let records: Vec<_> = ["x", "y", "z"]
            .iter()
            .map(|p| FileRecord {
                relative_path: p.to_string(),
                hash,
                size: 4,
                read_only: false,
                modified: 0,
            })
            .collect();

        let blobs = dedup(Path::new("/r"), &records);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[&hash].path, Path::new("/r/z"));
    }
}
