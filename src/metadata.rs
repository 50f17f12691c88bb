// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The metadata-block sink (`IM`/`DM` in the design notes): an
//! append-only byte stream logically partitioned into 8 KiB blocks,
//! each compressed independently and preceded on disk by a 2-byte
//! length header.
//!
//! Two independent sinks exist per image: one backing the inode table
//! (`IM`), written through to the output file as soon as each block
//! seals, and one backing the directory table (`DM`), which buffers
//! every sealed block in memory until [`MetadataWriter::write_to_file`]
//! is called, so the directory table can be placed immediately after
//! the (already-written) inode table.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::collab::FileWriter;
use crate::compress::{encode_block_header, Compressor};
use crate::error::Result;

/// Size of one logical metadata block, uncompressed.
pub const SQFS_META_BLOCK_SIZE: usize = 8192;

enum Output {
    /// Each sealed block is written straight through to the shared
    /// output file.
    Eager(Rc<RefCell<dyn FileWriter>>),
    /// Sealed blocks accumulate here until `write_to_file` drains them.
    Deferred(Vec<u8>),
}

/// An `(block, offset)` position inside a metadata stream. Encodes
/// directly into the low 16 bits of an `inode_ref`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct Position {
    pub block: u64,
    pub offset: u16,
}

impl Position {
    /// Packs this position into the 64-bit `inode_ref` encoding:
    /// upper 48 bits = block, low 16 bits = offset (13 used).
    pub fn as_inode_ref(&self) -> u64 {
        (self.block << 16) | self.offset as u64
    }
}

pub struct MetadataWriter<C> {
    compressor: C,
    buf: Vec<u8>,
    block_start: u64,
    output: Output,
}

impl<C: Compressor> MetadataWriter<C> {
    /// Creates a sink that writes each sealed block through to `output`
    /// immediately — the discipline used for the inode table.
    pub fn new_eager(compressor: C, output: Rc<RefCell<dyn FileWriter>>) -> MetadataWriter<C> {
        MetadataWriter { compressor, buf: Vec::with_capacity(SQFS_META_BLOCK_SIZE), block_start: 0, output: Output::Eager(output) }
    }

    /// Creates a sink that buffers sealed blocks until
    /// [`write_to_file`](Self::write_to_file) is called — the
    /// discipline used for the directory table.
    pub fn new_deferred(compressor: C) -> MetadataWriter<C> {
        MetadataWriter { compressor, buf: Vec::with_capacity(SQFS_META_BLOCK_SIZE), block_start: 0, output: Output::Deferred(Vec::new()) }
    }

    /// The uncompressed offset of the next byte to be written.
    pub fn get_position(&self) -> Position {
        Position { block: self.block_start, offset: self.buf.len() as u16 }
    }

    /// Appends `bytes`, sealing and emitting full blocks as they fill.
    /// May split `bytes` across a block boundary.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let mut rest = bytes;
        while !rest.is_empty() {
            let room = SQFS_META_BLOCK_SIZE - self.buf.len();
            let take = room.min(rest.len());
            self.buf.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buf.len() == SQFS_META_BLOCK_SIZE {
                self.seal_block()?;
            }
        }
        Ok(())
    }

    /// Seals the partially-filled current block, if any.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.seal_block()?;
        }
        Ok(())
    }

    fn seal_block(&mut self) -> Result<()> {
        let compressed = self.compressor.compress(&self.buf)?;
        let (payload, raw): (&[u8], bool) = if compressed.len() < self.buf.len() {
            (&compressed, false)
        } else {
            (&self.buf, true)
        };
        if payload.len() > 0x7fff {
            // Should not happen: blocks are capped at SQFS_META_BLOCK_SIZE
            // and stored raw once compression stops helping, but guard
            // against a pathological compressor expanding past the header's
            // 15-bit length field.
            return Err(crate::error::Error::Corrupted("compressed block exceeds 15-bit length field"));
        }
        let header = encode_block_header(payload.len() as u16, raw);
        trace!(block_start = self.block_start, len = payload.len(), raw, "sealing metadata block");
        match &mut self.output {
            Output::Eager(w) => {
                let mut w = w.borrow_mut();
                w.write_all(&header)?;
                w.write_all(payload)?;
            }
            Output::Deferred(pending) => {
                pending.extend_from_slice(&header);
                pending.extend_from_slice(payload);
            }
        }
        self.block_start += self.buf.len() as u64;
        self.buf.clear();
        Ok(())
    }

    /// For deferred sinks, writes all sealed blocks to `out` as a single
    /// contiguous region and clears the pending buffer. No-op for eager
    /// sinks, which have already written through.
    pub fn write_to_file(&mut self, out: &Rc<RefCell<dyn FileWriter>>) -> Result<()> {
        if let Output::Deferred(pending) = &mut self.output {
            if !pending.is_empty() {
                out.borrow_mut().write_all(pending)?;
                pending.clear();
            }
        }
        Ok(())
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn sealed_bytes_for_test(&self) -> &[u8] {
        match &self.output {
            Output::Deferred(pending) => pending,
            Output::Eager(_) => panic!("sealed_bytes_for_test only supports deferred sinks"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Store;

    #[test]
    fn position_is_zero_initially() {
        let im = MetadataWriter::new_deferred(Store);
        let pos = im.get_position();
        assert_eq!(pos.block, 0);
        assert_eq!(pos.offset, 0);
        assert_eq!(pos.as_inode_ref(), 0);
    }

    #[test]
    fn position_advances_monotonically_with_appends() {
        let mut im = MetadataWriter::new_deferred(Store);
        let mut last = im.get_position();
        for chunk in [10usize, 3000, 5000, 1, 9000] {
            im.append(&vec![0xAB; chunk]).unwrap();
            let now = im.get_position();
            assert!(now >= last, "position must be non-decreasing");
            last = now;
        }
    }

    #[test]
    fn append_seals_full_blocks_and_advances_block_start() {
        let mut im = MetadataWriter::new_deferred(Store);
        im.append(&vec![0u8; SQFS_META_BLOCK_SIZE]).unwrap();
        let pos = im.get_position();
        assert_eq!(pos.block, SQFS_META_BLOCK_SIZE as u64);
        assert_eq!(pos.offset, 0);
    }

    #[test]
    fn flush_seals_partial_block() {
        let mut im = MetadataWriter::new_deferred(Store);
        im.append(&[1, 2, 3]).unwrap();
        im.flush().unwrap();
        let pos = im.get_position();
        assert_eq!(pos.block, 3);
        assert_eq!(pos.offset, 0);
    }

    #[test]
    fn split_append_across_block_boundary() {
        let mut im = MetadataWriter::new_deferred(Store);
        im.append(&vec![7u8; SQFS_META_BLOCK_SIZE - 2]).unwrap();
        im.append(&[1, 2, 3, 4]).unwrap();
        let pos = im.get_position();
        assert_eq!(pos.block, SQFS_META_BLOCK_SIZE as u64);
        assert_eq!(pos.offset, 2);
    }
}
