use std::io::Read;

use crate::error::{BackendError, BackendResult};
use crate::record::Codec;

/// Reversible byte transform applied to payload and metadata before
/// persistence. `decompress(compress(x)) == x` for every input.
pub trait Compressor: Send + Sync {
    /// Tag stored with each record this compressor produced.
    fn codec(&self) -> Codec;

    fn compress(&self, data: &[u8]) -> BackendResult<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> BackendResult<Vec<u8>>;
}

/// zstd compressor.
///
/// Decompression stops at `max_output` bytes, so a small crafted frame
/// cannot expand into an unbounded allocation.
#[derive(Clone, Copy, Debug)]
pub struct ZstdCompressor {
    level: i32,
    max_output: usize,
}

impl ZstdCompressor {
    pub const DEFAULT_LEVEL: i32 = 3;
    /// Largest decompressed payload accepted by default (64 MiB).
    pub const DEFAULT_MAX_OUTPUT: usize = 64 * 1024 * 1024;

    /// Compressor at `level` with the default output cap.
    pub fn new(level: i32) -> Self {
        Self {
            level,
            max_output: Self::DEFAULT_MAX_OUTPUT,
        }
    }

    /// Cap on the decompressed size of a single payload.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LEVEL)
    }
}

impl Compressor for ZstdCompressor {
    fn codec(&self) -> Codec {
        Codec::Zstd
    }

    fn compress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
        zstd::encode_all(data, self.level).map_err(|e| BackendError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> BackendResult<Vec<u8>> {
        let decoder =
            zstd::stream::read::Decoder::new(data).map_err(|e| BackendError::Compression(e.to_string()))?;
        let mut out = Vec::new();
        decoder
            .take(self.max_output as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| BackendError::Compression(e.to_string()))?;
        if out.len() > self.max_output {
            return Err(BackendError::Compression(format!(
                "decompressed payload exceeds {} bytes",
                self.max_output
            )));
        }
        Ok(out)
    }
}

/// Reverse whatever `codec` a record was written with.
pub fn decompress_with(codec: Codec, data: &[u8]) -> BackendResult<Vec<u8>> {
    match codec {
        Codec::None => Ok(data.to_vec()),
        Codec::Zstd => ZstdCompressor::default().decompress(data),
    }
}
