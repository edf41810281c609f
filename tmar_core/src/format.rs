//! Container binary format.
//!
//! An archive is a fixed header, then every blob back to back, then every file
//! entry back to back. All integers are little-endian.
//!
//! ```text
//! Header (16 bytes)
//! 0x00  4   "TMAR" magic
//! 0x04  4   version (u32) = 2
//! 0x08  4   blob_count (u32)
//! 0x0c  4   file_count (u32)
//!
//! Blob (48 bytes + payload)
//! 0x00  32  content hash
//! 0x20  8   original_size (u64)
//! 0x28  8   compressed_size (u64)
//! 0x30  ... compressed payload, exactly compressed_size bytes
//!
//! File entry (56 bytes + path)
//! 0x00  4   path_len (u32)
//! 0x04  N   path (UTF-8, '/' separated, relative)
//! +0    32  content hash
//! +32   8   size (u64)
//! +40   4   flags (u32), bit 0 = read-only
//! +44   8   mtime (u64, seconds since the Unix epoch)
//! ```
//!
//! Readers in this module report malformed input as `io::ErrorKind::InvalidData`
//! and short input as `io::ErrorKind::UnexpectedEof`; the caller attaches the
//! archive path.

use crate::hash::{HASH_SIZE, Hash};
use crate::scan::FileRecord;
use serde::Serialize;
use std::io::{self, Read, Write};

/// Magic bytes at the start of every archive.
pub const MAGIC: &[u8; 4] = b"TMAR";

/// Current container format version.
pub const VERSION: u32 = 2;

/// Size of the archive header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Size of a blob header (hash + two sizes) in bytes.
pub const BLOB_HEADER_SIZE: usize = HASH_SIZE + 16;

/// Offset of `original_size` inside a blob header.
pub const BLOB_SIZES_OFFSET: u64 = HASH_SIZE as u64;

/// File entry flag: the file was read-only when scanned.
pub const FLAG_READ_ONLY: u32 = 1;

/// Smallest possible file entry: a one-byte path plus the fixed fields.
pub const MIN_FILE_ENTRY_SIZE: usize = 4 + 1 + HASH_SIZE + 8 + 4 + 8;

/// Longest path accepted when reading a file entry.
pub const MAX_PATH_LEN: u32 = 64 * 1024;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a little-endian u32.
pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

/// Read a little-endian u64.
pub fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

/// Read a raw 32-byte hash.
pub fn read_hash<R: Read>(reader: &mut R) -> io::Result<Hash> {
    Ok(Hash::from_bytes(read_array(reader)?))
}

/// The fixed archive header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveHeader {
    pub version: u32,
    pub blob_count: u32,
    pub file_count: u32,
}

impl ArchiveHeader {
    /// Create a header for the current format version.
    pub fn new(blob_count: u32, file_count: u32) -> Self {
        Self {
            version: VERSION,
            blob_count,
            file_count,
        }
    }

    /// Encode the header to a 16-byte array.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.blob_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.file_count.to_le_bytes());
        buf
    }

    /// Decode a header, rejecting a wrong magic or an unsupported version.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> io::Result<Self> {
        if &buf[0..4] != MAGIC {
            return Err(invalid(format!(
                "Invalid magic: expected {:?}, got {:?}",
                MAGIC,
                &buf[0..4]
            )));
        }

        let field = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        let version = field(4);
        if version != VERSION {
            return Err(invalid(format!(
                "Unsupported version: {} (expected {})",
                version, VERSION
            )));
        }

        Ok(Self {
            version,
            blob_count: field(8),
            file_count: field(12),
        })
    }

    /// Read and decode a header from the start of a stream.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Self::decode(&read_array(reader)?)
    }
}

/// The fixed part of a blob record, preceding its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub hash: Hash,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl BlobHeader {
    /// Encode to 48 bytes.
    pub fn encode(&self) -> [u8; BLOB_HEADER_SIZE] {
        let mut buf = [0u8; BLOB_HEADER_SIZE];
        buf[..HASH_SIZE].copy_from_slice(self.hash.as_bytes());
        buf[HASH_SIZE..HASH_SIZE + 8].copy_from_slice(&self.original_size.to_le_bytes());
        buf[HASH_SIZE + 8..].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf
    }

    /// Encode just the two size fields, for patching after the payload is written.
    pub fn encode_sizes(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.original_size.to_le_bytes());
        buf[8..].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            hash: read_hash(reader)?,
            original_size: read_u64(reader)?,
            compressed_size: read_u64(reader)?,
        })
    }
}

/// A blob as located inside an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlobEntry {
    pub hash: Hash,
    pub original_size: u64,
    pub compressed_size: u64,
    /// Position of the first payload byte.
    pub offset: u64,
}

/// Check that a stored path is relative, '/'-separated and free of `.`/`..`.
pub fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\0')
        && path
            .split('/')
            .all(|component| !component.is_empty() && component != "." && component != "..")
}

impl FileRecord {
    /// Flags word for this record.
    pub fn flags(&self) -> u32 {
        if self.read_only { FLAG_READ_ONLY } else { 0 }
    }

    /// Write this record as a file entry.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let path = self.relative_path.as_bytes();
        let path_len = u32::try_from(path.len())
            .ok()
            .filter(|len| *len <= MAX_PATH_LEN)
            .ok_or_else(|| invalid(format!("Path too long: {} bytes", path.len())))?;

        writer.write_all(&path_len.to_le_bytes())?;
        writer.write_all(path)?;
        writer.write_all(self.hash.as_bytes())?;
        writer.write_all(&self.size.to_le_bytes())?;
        writer.write_all(&self.flags().to_le_bytes())?;
        writer.write_all(&self.modified.to_le_bytes())?;
        Ok(())
    }

    /// Read a file entry.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let path_len = read_u32(reader)?;
        if path_len > MAX_PATH_LEN {
            return Err(invalid(format!("Path length {} exceeds limit", path_len)));
        }

        let mut path_buf = vec![0u8; path_len as usize];
        reader.read_exact(&mut path_buf)?;
        let relative_path = String::from_utf8(path_buf)
            .map_err(|e| invalid(format!("Invalid UTF-8 in path: {}", e)))?;
        if !is_safe_relative_path(&relative_path) {
            return Err(invalid(format!("Unsafe path: {:?}", relative_path)));
        }

        let hash = read_hash(reader)?;
        let size = read_u64(reader)?;
        let flags = read_u32(reader)?;
        let modified = read_u64(reader)?;

        Ok(Self {
            relative_path,
            hash,
            size,
            read_only: flags & FLAG_READ_ONLY != 0,
            modified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(path: &str, read_only: bool) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            hash: Hash::hash_bytes(path.as_bytes()),
            size: 42,
            read_only,
            modified: 1_700_000_000,
        }
    }

    #[test]
    fn test_header_layout() {
        let encoded = ArchiveHeader::new(2, 3).encode();
        assert_eq!(&encoded[0..4], b"TMAR");
        assert_eq!(&encoded[4..8], &[2, 0, 0, 0]);
        assert_eq!(&encoded[8..12], &[2, 0, 0, 0]);
        assert_eq!(&encoded[12..16], &[3, 0, 0, 0]);

        let decoded = ArchiveHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, ArchiveHeader::new(2, 3));
    }

    #[test]
    fn test_header_bad_magic() {
        let mut encoded = ArchiveHeader::new(1, 1).encode();
        encoded[0..4].copy_from_slice(b"XXXX");
        let err = ArchiveHeader::decode(&encoded).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_header_bad_version() {
        let mut encoded = ArchiveHeader::new(1, 1).encode();
        encoded[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(ArchiveHeader::decode(&encoded).is_err());
    }

    #[test]
    fn test_header_short_read() {
        let err = ArchiveHeader::read_from(&mut Cursor::new(b"TMAR\x02")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_blob_header_layout() {
        let header = BlobHeader {
            hash: Hash::hash_bytes(b"x"),
            original_size: 0x0102,
            compressed_size: 0x0304,
        };
        let encoded = header.encode();
        assert_eq!(&encoded[..32], header.hash.as_bytes());
        assert_eq!(&encoded[32..40], &0x0102u64.to_le_bytes());
        assert_eq!(&encoded[40..48], &0x0304u64.to_le_bytes());
        assert_eq!(&encoded[32..], &header.encode_sizes());

        let decoded = BlobHeader::read_from(&mut Cursor::new(&encoded[..])).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_file_entry_layout() {
        let rec = record("b/c.txt", true);
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();

        assert_eq!(buf.len(), 4 + 7 + 32 + 8 + 4 + 8);
        assert_eq!(&buf[0..4], &7u32.to_le_bytes());
        assert_eq!(&buf[4..11], b"b/c.txt");
        assert_eq!(&buf[43..51], &42u64.to_le_bytes());
        assert_eq!(&buf[51..55], &1u32.to_le_bytes());

        let decoded = FileRecord::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn test_file_entry_ignores_unknown_flags() {
        let rec = record("a.txt", false);
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        let flags_at = 4 + 5 + 32 + 8;
        buf[flags_at..flags_at + 4].copy_from_slice(&0b110u32.to_le_bytes());

        let decoded = FileRecord::read_from(&mut Cursor::new(&buf)).unwrap();
        assert!(!decoded.read_only);
    }

    #[test]
    fn test_file_entry_rejects_unsafe_path() {
        for bad in ["../etc/passwd", "/abs", "a//b", "a/./b", ""] {
            let mut rec = record("x", false);
            rec.relative_path = bad.to_string();
            let mut buf = Vec::new();
            rec.write_to(&mut buf).unwrap();
            let err = FileRecord::read_from(&mut Cursor::new(&buf)).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData, "path {:?}", bad);
        }
    }

    #[test]
    fn test_file_entry_rejects_huge_path_len() {
        let buf = (MAX_PATH_LEN + 1).to_le_bytes();
        let err = FileRecord::read_from(&mut Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_safe_paths() {
        assert!(is_safe_relative_path("a.txt"));
        assert!(is_safe_relative_path("b/a.txt"));
        assert!(is_safe_relative_path(".hidden/..dots"));
        assert!(!is_safe_relative_path("a/../b"));
        assert!(!is_safe_relative_path("trailing/"));
    }

    use proptest::prelude::*;

    fn arb_record() -> impl Strategy<Value = FileRecord> {
        (
            "[a-z]{1,8}(/[a-z0-9_.]{1,8}){0,3}",
            prop::array::uniform32(any::<u8>()),
            any::<u64>(),
            any::<bool>(),
            any::<u64>(),
        )
            .prop_filter("safe path", |(p, ..)| is_safe_relative_path(p))
            .prop_map(|(relative_path, hash, size, read_only, modified)| FileRecord {
                relative_path,
                hash: Hash::from_bytes(hash),
                size,
                read_only,
                modified,
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// A sequence of entries reads back in order with nothing left over
        #[test]
        fn prop_file_index_sequence(records in prop::collection::vec(arb_record(), 0..16)) {
            let mut buf = Vec::new();
            for rec in &records {
                rec.write_to(&mut buf)?;
            }

            let mut cursor = Cursor::new(&buf);
            for rec in &records {
                prop_assert_eq!(&FileRecord::read_from(&mut cursor)?, rec);
            }
            prop_assert_eq!(cursor.position(), buf.len() as u64);
        }

        /// Any truncation of an entry is reported as EOF, never as a bogus record
        #[test]
        fn prop_truncated_entry_is_eof(rec in arb_record(), cut in 0usize..64) {
            let mut buf = Vec::new();
            rec.write_to(&mut buf)?;
            let cut = cut.min(buf.len() - 1);
            let err = FileRecord::read_from(&mut Cursor::new(&buf[..cut])).unwrap_err();
            prop_assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        }
    }
}
