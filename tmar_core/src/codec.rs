//! Streaming compression.
//!
//! Blobs are compressed and decompressed one chunk at a time so that a file of any
//! size passes through a bounded buffer. A codec hands every piece of output to a
//! caller-supplied sink as soon as it is produced; nothing accumulates a whole blob.

use crate::error::{Error, Result};
use std::io::{self, Read};
use zstd::stream::raw::{Decoder, Encoder, InBuffer, Operation, OutBuffer};

/// Default zstd compression level.
pub const DEFAULT_LEVEL: i32 = 3;

/// Receives codec output. Returning an error aborts the stream.
pub type Sink<'a> = dyn FnMut(&[u8]) -> Result<()> + 'a;

/// Fill `buf` from `reader`, stopping early only at end of input.
///
/// Returns the number of bytes read; anything less than `buf.len()` means EOF.
pub fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stateful compressor for a single stream.
pub trait Compressor {
    /// Compress `input`. When `is_final` is set the stream is flushed and closed;
    /// no further calls are allowed afterwards.
    fn compress_chunk(&mut self, input: &[u8], is_final: bool, sink: &mut Sink<'_>) -> Result<()>;
}

/// Stateful decompressor for a single stream.
pub trait Decompressor {
    /// Decompress the next piece of the compressed stream.
    fn decompress_chunk(&mut self, input: &[u8], sink: &mut Sink<'_>) -> Result<()>;

    /// Signal end of input. Fails if the stream ended mid-frame.
    fn finish(&mut self) -> Result<()>;
}

/// Factory for per-stream compressors and decompressors.
pub trait Codec: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Start a new compression stream with an output buffer of `buf_size` bytes.
    fn compressor(&self, buf_size: usize) -> Result<Box<dyn Compressor>>;

    /// Start a new decompression stream with an output buffer of `buf_size` bytes.
    fn decompressor(&self, buf_size: usize) -> Result<Box<dyn Decompressor>>;
}

/// Zstandard codec.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compressor(&self, buf_size: usize) -> Result<Box<dyn Compressor>> {
        let encoder = Encoder::new(self.level)
            .map_err(|e| Error::codec(format!("zstd encoder init failed: {}", e)))?;
        Ok(Box::new(ZstdCompressor {
            encoder,
            buf: vec![0u8; buf_size.max(1)],
            finished: false,
        }))
    }

    fn decompressor(&self, buf_size: usize) -> Result<Box<dyn Decompressor>> {
        let decoder =
            Decoder::new().map_err(|e| Error::codec(format!("zstd decoder init failed: {}", e)))?;
        Ok(Box::new(ZstdDecompressor {
            decoder,
            buf: vec![0u8; buf_size.max(1)],
            saw_input: false,
            frame_complete: false,
        }))
    }
}

struct ZstdCompressor {
    encoder: Encoder<'static>,
    buf: Vec<u8>,
    finished: bool,
}

impl Compressor for ZstdCompressor {
    fn compress_chunk(&mut self, input: &[u8], is_final: bool, sink: &mut Sink<'_>) -> Result<()> {
        if self.finished {
            return Err(Error::codec("compress after final chunk"));
        }

        let mut src = InBuffer::around(input);
        while src.pos() < input.len() {
            let produced = {
                let mut dst = OutBuffer::around(&mut self.buf[..]);
                self.encoder
                    .run(&mut src, &mut dst)
                    .map_err(|e| Error::codec(format!("zstd compression failed: {}", e)))?;
                dst.pos()
            };
            if produced > 0 {
                sink(&self.buf[..produced])?;
            }
        }

        if is_final {
            loop {
                let (produced, remaining) = {
                    let mut dst = OutBuffer::around(&mut self.buf[..]);
                    let remaining = self
                        .encoder
                        .finish(&mut dst, true)
                        .map_err(|e| Error::codec(format!("zstd flush failed: {}", e)))?;
                    (dst.pos(), remaining)
                };
                if produced > 0 {
                    sink(&self.buf[..produced])?;
                }
                if remaining == 0 {
                    break;
                }
            }
            self.finished = true;
        }

        Ok(())
    }
}

struct ZstdDecompressor {
    decoder: Decoder<'static>,
    buf: Vec<u8>,
    saw_input: bool,
    frame_complete: bool,
}

impl Decompressor for ZstdDecompressor {
    fn decompress_chunk(&mut self, input: &[u8], sink: &mut Sink<'_>) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        self.saw_input = true;

        let mut src = InBuffer::around(input);
        loop {
            let (produced, hint) = {
                let mut dst = OutBuffer::around(&mut self.buf[..]);
                let hint = self
                    .decoder
                    .run(&mut src, &mut dst)
                    .map_err(|e| Error::codec(format!("zstd decompression failed: {}", e)))?;
                (dst.pos(), hint)
            };
            if produced > 0 {
                sink(&self.buf[..produced])?;
            }
            // 0 means a frame was fully decoded and flushed
            self.frame_complete = hint == 0;

            if src.pos() >= input.len() && produced < self.buf.len() {
                break;
            }
        }

        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // A zero-length payload decodes to an empty file
        if self.saw_input && !self.frame_complete {
            return Err(Error::codec("compressed stream ended mid-frame"));
        }
        Ok(())
    }
}
