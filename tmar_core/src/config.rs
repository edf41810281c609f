//! Engine configuration.
//!
//! Config files use the same `key=value` line format as the rest of the tooling:
//!
//! ```text
//! # comment
//! chunk_size=1048576
//! level=3
//! verify=true
//! ```

use crate::codec::DEFAULT_LEVEL;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Default streaming chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Largest accepted chunk size (256 MiB).
pub const MAX_CHUNK_SIZE: usize = 256 << 20;

/// Tunables for pack and unpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Bytes read per hashing/compression/decompression step.
    pub chunk_size: usize,
    /// zstd compression level.
    pub compression_level: i32,
    /// Re-hash restored files and compare against the stored digest.
    pub verify_on_restore: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: DEFAULT_LEVEL,
            verify_on_restore: true,
        }
    }
}

impl ArchiveConfig {
    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the compression level.
    pub fn with_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Enable or disable restore verification.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify_on_restore = verify;
        self
    }

    /// Check that every value is in range.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::invalid_config(format!(
                "chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }

        let levels = zstd::compression_level_range();
        if !levels.contains(&self.compression_level) {
            return Err(Error::invalid_config(format!(
                "level must be between {} and {}, got {}",
                levels.start(),
                levels.end(),
                self.compression_level
            )));
        }

        Ok(())
    }

    /// Parse a config file body. Unknown keys are rejected; missing keys keep
    /// their defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::invalid_config(format!("Expected key=value: {}", line)))?;
            let value = value.trim();

            match key.trim() {
                "chunk_size" => {
                    config.chunk_size = value.parse().map_err(|_| {
                        Error::invalid_config(format!("Invalid chunk_size: {}", value))
                    })?;
                }
                "level" => {
                    config.compression_level = value
                        .parse()
                        .map_err(|_| Error::invalid_config(format!("Invalid level: {}", value)))?;
                }
                "verify" => {
                    config.verify_on_restore = match value {
                        "true" | "1" | "yes" => true,
                        "false" | "0" | "no" => false,
                        _ => {
                            return Err(Error::invalid_config(format!(
                                "Invalid verify: {}",
                                value
                            )));
                        }
                    };
                }
                other => {
                    return Err(Error::invalid_config(format!("Unknown key: {}", other)));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| Error::source_unreadable(path, e))?;
        Self::parse(&content)
    }
}
