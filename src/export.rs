// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The export-table side channel (§4.5): an optional `inode_number ->
//! inode_ref` lookup table used by callers that need random access to
//! an inode by its number (NFS export support in the upstream format).
//!
//! Grows by doubling, like the original writer's `realloc`-backed
//! array, and is written out as its own metadata stream once the tree
//! walk is complete.

use crate::compress::Compressor;
use crate::error::{Error, Result};
use crate::metadata::MetadataWriter;

/// Marks an unused slot. Inode numbers are 1-based, so index `n` in
/// the table corresponds to inode number `n + 1`.
const UNUSED: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Default cap on the number of slots the table will grow to, absent
/// an explicit [`ExportTable::with_max_entries`] call. Large enough for
/// any image this crate has been exercised against, small enough that
/// a runaway inode number (corrupt input, not a real tree) fails fast
/// instead of driving an unbounded allocation.
pub const DEFAULT_MAX_ENTRIES: usize = 1 << 20;

pub struct ExportTable {
    entries: Vec<u64>,
    max_entries: usize,
}

impl Default for ExportTable {
    fn default() -> ExportTable {
        ExportTable::with_max_entries(DEFAULT_MAX_ENTRIES)
    }
}

impl ExportTable {
    pub fn new() -> ExportTable {
        ExportTable::default()
    }

    /// Creates a table that refuses to grow past `max_entries` slots.
    pub fn with_max_entries(max_entries: usize) -> ExportTable {
        ExportTable { entries: Vec::new(), max_entries }
    }

    /// Records `inode_ref` at the slot for `inode_num`, growing the
    /// backing array (doubling, never shrinking) as needed.
    ///
    /// Returns [`Error::Allocation`] if `inode_num` would require the
    /// table to grow past its configured maximum — the one place in
    /// this crate that can detect an allocation failure ahead of time
    /// rather than relying on the allocator to abort the process.
    pub fn record(&mut self, inode_num: u32, inode_ref: u64) -> Result<()> {
        if inode_num == 0 {
            return Err(Error::InvalidArgument("export table entry has inode number 0"));
        }
        let idx = (inode_num - 1) as usize;
        if idx >= self.max_entries {
            return Err(Error::Allocation("export table growth would exceed its configured maximum"));
        }
        if idx >= self.entries.len() {
            let new_len = (self.entries.len().max(16)).max(idx + 1).next_power_of_two().min(self.max_entries);
            self.entries.resize(new_len, UNUSED);
        }
        self.entries[idx] = inode_ref;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the `inode_ref` recorded for `inode_num`, or the
    /// sentinel if no entry has been recorded at that slot.
    pub fn get(&self, inode_num: u32) -> u64 {
        self.entries.get((inode_num - 1) as usize).copied().unwrap_or(UNUSED)
    }

    /// Writes every slot, used or not, as a sequence of little-endian
    /// `u64`s to `im`. Unused slots carry the all-ones sentinel.
    pub fn write<C: Compressor>(&self, im: &mut MetadataWriter<C>) -> Result<()> {
        let mut buf = Vec::with_capacity(self.entries.len() * 8);
        for &e in &self.entries {
            buf.extend_from_slice(&e.to_le_bytes());
        }
        im.append(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Store;

    #[test]
    fn record_grows_table_and_fills_sentinel_gaps() {
        let mut t = ExportTable::new();
        t.record(3, 0xAABB).unwrap();
        assert!(t.len() >= 3);
        assert_eq!(t.entries[0], UNUSED);
        assert_eq!(t.entries[1], UNUSED);
        assert_eq!(t.entries[2], 0xAABB);
    }

    #[test]
    fn record_rejects_zero_inode_number() {
        let mut t = ExportTable::new();
        let err = t.record(0, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn record_rejects_growth_past_configured_maximum() {
        let mut t = ExportTable::with_max_entries(4);
        t.record(4, 1).unwrap();
        let err = t.record(5, 2).unwrap_err();
        assert!(matches!(err, Error::Allocation(_)));
    }

    #[test]
    fn record_allows_growth_up_to_configured_maximum() {
        let mut t = ExportTable::with_max_entries(4);
        t.record(4, 0xAA).unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.entries[3], 0xAA);
    }

    #[test]
    fn write_emits_le_u64_per_slot() {
        let mut t = ExportTable::new();
        t.record(1, 42).unwrap();
        let mut im = MetadataWriter::new_deferred(Store);
        t.write(&mut im).unwrap();
        im.flush().unwrap();
        let bytes = im.sealed_bytes_for_test();
        assert_eq!(bytes.len(), t.len() * 8);
        assert_eq!(&bytes[0..8], &42u64.to_le_bytes());
    }
}
