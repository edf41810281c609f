//! # tmar core
//!
//! A deduplicating file archiver. A directory tree is packed into a single
//! `.tmar` container in which every distinct file content is stored once,
//! zstd-compressed and addressed by its BLAKE3 digest.
//!
//! ## Features
//!
//! - Content deduplication: identical files share one blob
//! - Streaming hashing, compression and decompression in bounded chunks
//! - Seek-based restore: blobs are read from the archive on demand
//! - Read-only flag and modification time replayed on restore
//! - Injected logging through the [`Logger`] trait
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use tmar_core::{ArchiveConfig, Archiver, Engine, default_logger};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(ArchiveConfig::default(), default_logger())?;
//!
//! // Pack a directory
//! engine.pack(Path::new("./my-data"), Path::new("./backup.tmar"))?;
//!
//! // Restore it somewhere else
//! let stats = engine.unpack(Path::new("./backup.tmar"), Path::new("./restored"))?;
//! println!("Restored {} files", stats.files);
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod engine;
mod error;
mod format;
mod hash;
mod log;
mod pack;
mod scan;
mod unpack;

pub use codec::{Codec, Compressor, DEFAULT_LEVEL, Decompressor, Sink, ZstdCodec, read_chunk};
pub use config::{ArchiveConfig, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use engine::{ArchiveListing, Archiver, Engine};
pub use error::{Error, ErrorKind, Result};
pub use format::{
    ArchiveHeader, BLOB_HEADER_SIZE, BlobEntry, BlobHeader, FLAG_READ_ONLY, HEADER_SIZE, MAGIC,
    VERSION, is_safe_relative_path,
};
pub use hash::{Algorithm, Blake3Hasher, HASH_SIZE, Hash, Hasher};
pub use log::{Level, Logger, MemoryLogger, NullLogger, SharedLogger, TracingLogger, default_logger};
pub use pack::{PackOutcome, PackStats, Packer};
pub use scan::{FileRecord, Scanner};
pub use unpack::{ArchiveReader, UnpackStats, Unpacker};
