// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-directory writer (§4.3): accumulates child entries,
//! partitions them into header-delimited runs once the directory is
//! closed, writes the result to the directory metadata sink, and
//! produces the directory's own inode record.
//!
//! Lifecycle: `begin` → `add_entry`* → `end` → `create_inode`.

use bitflags::bitflags;

use crate::compress::Compressor;
use crate::error::{Error, Result};
use crate::export::ExportTable;
use crate::inode::{Base, Body, DirIndexEntry, Inode, InodeType, XATTR_NONE};
use crate::metadata::MetadataWriter;
use crate::mode::entry_type;

bitflags! {
    /// Flags accepted by [`DirectoryWriter::begin`]. No bit is defined
    /// yet; the set exists so a future on-disk revision can add one
    /// without changing the method's signature again.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BeginFlags: u32 {
        const _RESERVED = 0;
    }
}

/// Maximum entries a single directory header may describe.
const MAX_ENTRIES_PER_HEADER: usize = 256;

/// Size, in bytes, of the on-wire `dir_header_t`.
const HEADER_SIZE: usize = 12;

/// Size, in bytes, of the on-wire `dir_entry_t` excluding the name.
const ENTRY_SIZE: usize = 8;

struct PendingEntry {
    name: Vec<u8>,
    inode_ref: u64,
    inode_num: u32,
    typ: InodeType,
}

/// One emitted header's worth of index bookkeeping, later folded into
/// an extended directory's index (§4.5's sibling, the per-header index
/// described in §4.2/§4.3).
struct HeaderIndex {
    dm_block: u64,
    dir_size_before: u32,
    first_name: Vec<u8>,
}

#[derive(Default)]
pub struct DirectoryWriter {
    dir_ref: u64,
    dir_size: u32,
    ent_count: u32,
    pending: Vec<PendingEntry>,
    index: Vec<HeaderIndex>,
}

impl DirectoryWriter {
    pub fn new() -> DirectoryWriter {
        DirectoryWriter::default()
    }

    /// Captures the directory's `dir_ref` from the current DM position
    /// and resets all pending state, ready for a fresh directory.
    pub fn begin<C: Compressor>(&mut self, dm: &MetadataWriter<C>, flags: u32) -> Result<()> {
        if BeginFlags::from_bits(flags).is_none() {
            return Err(Error::InvalidArgument("dir writer begin: unknown flag bit set"));
        }
        self.pending.clear();
        self.index.clear();
        self.dir_ref = dm.get_position().as_inode_ref();
        self.dir_size = 0;
        self.ent_count = 0;
        Ok(())
    }

    /// Adds one child entry. Does not touch the directory metadata sink;
    /// entries are only packed into headers in [`end`](Self::end).
    pub fn add_entry(
        &mut self,
        name: &[u8],
        inode_num: u32,
        inode_ref: u64,
        mode: u16,
        export: Option<&mut ExportTable>,
    ) -> Result<()> {
        if name.is_empty() || inode_num < 1 {
            return Err(Error::InvalidArgument("entry name is empty or inode_num is zero"));
        }
        let typ = entry_type(mode)?;
        if let Some(export) = export {
            export.record(inode_num, inode_ref)?;
        }
        self.pending.push(PendingEntry { name: name.to_vec(), inode_ref, inode_num, typ });
        self.ent_count += 1;
        Ok(())
    }

    /// The largest prefix of `pending[start..]` that can share one
    /// header, per the run-length rule in §4.3 step 2.
    fn run_length(&self, start: usize, header_offset: u16) -> usize {
        let anchor = &self.pending[start];
        let anchor_block = anchor.inode_ref >> 16;
        let mut size = (header_offset as usize + HEADER_SIZE) % crate::metadata::SQFS_META_BLOCK_SIZE;
        let mut count = 0usize;
        for ent in &self.pending[start..] {
            if (ent.inode_ref >> 16) != anchor_block {
                break;
            }
            let diff = ent.inode_num as i64 - anchor.inode_num as i64;
            if !(-32_767..=32_767).contains(&diff) {
                break;
            }
            size += ENTRY_SIZE + ent.name.len();
            if count > 0 && size > crate::metadata::SQFS_META_BLOCK_SIZE {
                break;
            }
            count += 1;
            if count == MAX_ENTRIES_PER_HEADER {
                break;
            }
        }
        count.max(1).min(self.pending.len() - start)
    }

    /// Packs the pending entry list into header-delimited runs and
    /// writes them to `dm`.
    pub fn end<C: Compressor>(&mut self, dm: &mut MetadataWriter<C>) -> Result<()> {
        let mut i = 0usize;
        while i < self.pending.len() {
            let pos = dm.get_position();
            let count = self.run_length(i, pos.offset);
            let anchor = &self.pending[i];
            let hdr_count = (count - 1) as u32;
            let hdr_start_block = (anchor.inode_ref >> 16) as u32;
            let hdr_inode_number = anchor.inode_num;

            let mut hdr = Vec::with_capacity(HEADER_SIZE);
            hdr.extend_from_slice(&hdr_count.to_le_bytes());
            hdr.extend_from_slice(&hdr_start_block.to_le_bytes());
            hdr.extend_from_slice(&hdr_inode_number.to_le_bytes());
            dm.append(&hdr)?;

            self.index.push(HeaderIndex {
                dm_block: pos.block,
                dir_size_before: self.dir_size,
                first_name: anchor.name.clone(),
            });
            self.dir_size += HEADER_SIZE as u32;

            let anchor_inode_num = anchor.inode_num;
            for ent in &self.pending[i..i + count] {
                let offset = (ent.inode_ref & 0xFFFF) as u16;
                let inode_diff = (ent.inode_num as i64 - anchor_inode_num as i64) as i16;
                let size = (ent.name.len() - 1) as u16;

                let mut e = Vec::with_capacity(ENTRY_SIZE + ent.name.len());
                e.extend_from_slice(&offset.to_le_bytes());
                e.extend_from_slice(&inode_diff.to_le_bytes());
                e.extend_from_slice(&(ent.typ as u16).to_le_bytes());
                e.extend_from_slice(&size.to_le_bytes());
                e.extend_from_slice(&ent.name);
                dm.append(&e)?;

                self.dir_size += (ENTRY_SIZE + ent.name.len()) as u32;
            }

            i += count;
        }
        Ok(())
    }

    pub fn get_size(&self) -> u32 {
        self.dir_size
    }

    pub fn get_dir_reference(&self) -> u64 {
        self.dir_ref
    }

    pub fn get_index_size(&self) -> usize {
        self.index.iter().map(|i| HEADER_SIZE + i.first_name.len()).sum()
    }

    pub fn get_entry_count(&self) -> u32 {
        self.ent_count
    }

    /// Synthesizes this directory's own inode record (§4.3).
    pub fn create_inode(&self, hlinks: u32, xattr: u32, parent_inode: u32) -> Inode {
        let nlink = self.ent_count + hlinks + 2;
        let start_block = self.dir_ref >> 16;
        let offset = (self.dir_ref & 0xFFFF) as u16;
        let extended = xattr != XATTR_NONE || start_block > u32::MAX as u64 || self.dir_size > 0xFFFF;

        let body = if extended {
            let index = self
                .index
                .iter()
                .map(|i| DirIndexEntry { start_block: i.dm_block as u32, index: i.dir_size_before, name: i.first_name.clone() })
                .collect();
            Body::ExtDir {
                nlink,
                size: self.dir_size,
                start_block: start_block as u32,
                parent_inode,
                offset,
                xattr_idx: xattr,
                index,
            }
        } else {
            Body::Dir { start_block: start_block as u32, nlink, size: self.dir_size as u16, offset, parent_inode }
        };

        let typ = if extended { InodeType::ExtDir } else { InodeType::Dir };
        Inode { base: Base::new(typ, 0, 0, 0), body }
    }
}
