//! Content hashing.
//!
//! Archives address blobs by a 32-byte digest. The digest is produced through the
//! [`Hasher`] trait so the engine never touches the hash primitive directly; the
//! only shipped algorithm is BLAKE3-256.

use crate::codec::read_chunk;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{self, Read};

/// Hash digest size in bytes.
pub const HASH_SIZE: usize = 32;

/// Incremental digest computation over a byte stream.
pub trait Hasher {
    /// Feed more bytes into the digest. May be called any number of times.
    fn update(&mut self, data: &[u8]);

    /// Produce the digest of everything fed so far.
    fn finalize(&self) -> Hash;
}

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    #[default]
    Blake3,
}

impl Algorithm {
    /// Returns the string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3-256",
        }
    }

    /// Start a new incremental digest.
    pub fn hasher(&self) -> Box<dyn Hasher> {
        match self {
            Algorithm::Blake3 => Box::new(Blake3Hasher::default()),
        }
    }

    /// Hash everything a reader yields, `chunk_size` bytes at a time.
    ///
    /// Returns the digest and the number of bytes consumed.
    pub fn hash_reader<R: Read>(
        &self,
        mut reader: R,
        chunk_size: usize,
    ) -> io::Result<(Hash, u64)> {
        let mut hasher = self.hasher();
        let mut buf = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;

        loop {
            let n = read_chunk(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
        }

        Ok((hasher.finalize(), total))
    }
}

/// [`Hasher`] backed by `blake3::Hasher`.
#[derive(Default, Clone)]
pub struct Blake3Hasher(blake3::Hasher);

impl Hasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(&self) -> Hash {
        Hash(*self.0.finalize().as_bytes())
    }
}

/// A 32-byte content digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Create a Hash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Hash raw bytes with the default algorithm.
    pub fn hash_bytes(data: &[u8]) -> Self {
        let mut hasher = Algorithm::default().hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
