//! Archiver facade.
//!
//! [`Engine`] wires the scanner, packer and unpacker to one configuration, one
//! codec and one logger. Callers that only need pack and unpack can hold it as a
//! [`dyn Archiver`](Archiver).

use crate::codec::{Codec, ZstdCodec};
use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::format::{ArchiveHeader, BlobEntry};
use crate::hash::Algorithm;
use crate::log::SharedLogger;
use crate::pack::{PackOutcome, Packer};
use crate::scan::{FileRecord, Scanner};
use crate::unpack::{ArchiveReader, UnpackStats, Unpacker};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Pack and unpack entry points.
pub trait Archiver: Send + Sync {
    /// Pack every regular file under `root` into `archive`.
    fn pack(&self, root: &Path, archive: &Path) -> Result<PackOutcome>;

    /// Restore `archive` under `dest`.
    fn unpack(&self, archive: &Path, dest: &Path) -> Result<UnpackStats>;
}

/// Everything stored in an archive, without payloads.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveListing {
    pub header: ArchiveHeader,
    pub blobs: Vec<BlobEntry>,
    pub files: Vec<FileRecord>,
}

/// The default archiver: BLAKE3 digests and zstd payloads.
pub struct Engine {
    config: ArchiveConfig,
    algorithm: Algorithm,
    codec: Arc<dyn Codec>,
    logger: SharedLogger,
}

impl Engine {
    /// Build an engine, rejecting out-of-range configuration up front.
    pub fn new(config: ArchiveConfig, logger: SharedLogger) -> Result<Self> {
        config.validate()?;
        let codec = Arc::new(ZstdCodec::new(config.compression_level));
        Ok(Self {
            config,
            algorithm: Algorithm::default(),
            codec,
            logger,
        })
    }

    /// Replace the payload codec.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn scanner(&self) -> Scanner {
        Scanner::new(self.algorithm, self.config.chunk_size, self.logger.clone())
    }

    pub fn packer(&self) -> Packer {
        Packer::new(
            self.config.clone(),
            self.algorithm,
            self.codec.clone(),
            self.logger.clone(),
        )
    }

    pub fn unpacker(&self) -> Unpacker {
        Unpacker::new(
            self.config.clone(),
            self.algorithm,
            self.codec.clone(),
            self.logger.clone(),
        )
    }

    /// Read an archive's header, blob table and file index.
    pub fn list(&self, archive: &Path) -> Result<ArchiveListing> {
        let mut reader = ArchiveReader::open(archive)?;
        let files = reader.entries()?;
        self.logger.debug(&format!(
            "list: {} holds {} files in {} blobs",
            archive.display(),
            files.len(),
            reader.header().blob_count
        ));
        Ok(ArchiveListing {
            header: *reader.header(),
            blobs: reader.blobs(),
            files,
        })
    }
}

impl Archiver for Engine {
    fn pack(&self, root: &Path, archive: &Path) -> Result<PackOutcome> {
        self.packer().pack(root, archive)
    }

    fn unpack(&self, archive: &Path, dest: &Path) -> Result<UnpackStats> {
        self.unpacker().unpack(archive, dest)
    }
}
