// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block compression for the metadata sink.
//!
//! SquashFS compresses each metadata block independently and falls back
//! to storing it raw when compression doesn't help. This mirrors the
//! `miniz_oxide`-backed inflate path used elsewhere in this codebase for
//! decompressing ramdisk images, but in the write direction.

use miniz_oxide::deflate::compress_to_vec_zlib;
use miniz_oxide::inflate::decompress_to_vec_zlib;

use crate::error::{Error, Result};

/// High bit of the 2-byte block length header: set when the block that
/// follows is stored raw (uncompressed) rather than compressed.
pub const BLOCK_UNCOMPRESSED: u16 = 0x8000;

/// Mask isolating the payload length from the 2-byte block length header.
pub const BLOCK_LEN_MASK: u16 = 0x7fff;

/// A block-compression collaborator.
///
/// Implementations compress one metadata block at a time; the sink
/// decides, based on the returned length, whether to keep the
/// compressed form or store the block raw.
pub trait Compressor {
    fn compress(&self, block: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, block: &[u8], size_hint: usize) -> Result<Vec<u8>>;
}

/// The default compressor: zlib-wrapped DEFLATE via `miniz_oxide`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Zlib {
    pub level: u8,
}

impl Zlib {
    pub fn new(level: u8) -> Zlib {
        Zlib { level }
    }
}

impl Compressor for Zlib {
    fn compress(&self, block: &[u8]) -> Result<Vec<u8>> {
        Ok(compress_to_vec_zlib(block, self.level))
    }

    fn decompress(&self, block: &[u8], size_hint: usize) -> Result<Vec<u8>> {
        decompress_to_vec_zlib(block)
            .map_err(|_| Error::Corrupted("zlib block failed to decompress"))
            .map(|mut v| {
                v.reserve(size_hint.saturating_sub(v.len()));
                v
            })
    }
}

/// A no-op compressor that always stores blocks raw. Useful for tests
/// where deterministic, uncompressed bytes are easier to assert against.
#[derive(Clone, Copy, Debug, Default)]
pub struct Store;

impl Compressor for Store {
    fn compress(&self, block: &[u8]) -> Result<Vec<u8>> {
        Ok(block.to_vec())
    }

    fn decompress(&self, block: &[u8], _size_hint: usize) -> Result<Vec<u8>> {
        Ok(block.to_vec())
    }
}

/// Encodes the 2-byte little-endian block length header, setting the
/// "stored raw" bit when `raw` is true.
pub fn encode_block_header(len: u16, raw: bool) -> [u8; 2] {
    let mut v = len & BLOCK_LEN_MASK;
    if raw {
        v |= BLOCK_UNCOMPRESSED;
    }
    v.to_le_bytes()
}
