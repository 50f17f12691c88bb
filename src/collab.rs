// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The external collaborator contracts this crate consumes (§6): the
//! output file, and the uid/gid interning table. Both are owned by the
//! caller assembling a full image; this crate only depends on the
//! narrow interfaces below.

use std::io::Write;

use crate::error::Result;

/// The output-file collaborator: a monotonically growing byte stream
/// whose current size is needed to record superblock start offsets.
pub trait FileWriter {
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;
    fn get_size(&self) -> u64;
}

/// Wraps any [`Write`] implementation, tracking the number of bytes
/// written so far as a [`FileWriter`].
pub struct CountingWriter<W> {
    inner: W,
    size: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> CountingWriter<W> {
        CountingWriter { inner, size: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> FileWriter for CountingWriter<W> {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(())
    }

    fn get_size(&self) -> u64 {
        self.size
    }
}

/// The uid/gid interning collaborator: maps a raw id to its 16-bit
/// index in the (externally owned) id table.
pub trait IdTable {
    fn id_to_index(&mut self, id: u32) -> Result<u16>;
}

/// A dense, insertion-ordered id table, suitable for the local driver
/// and for tests. A real image writer may share a richer table across
/// the whole build; this crate only needs the trait above.
#[derive(Default)]
pub struct InterningIdTable {
    ids: Vec<u32>,
}

impl IdTable for InterningIdTable {
    fn id_to_index(&mut self, id: u32) -> Result<u16> {
        if let Some(idx) = self.ids.iter().position(|&x| x == id) {
            return Ok(idx as u16);
        }
        if self.ids.len() >= u16::MAX as usize {
            return Err(crate::error::Error::Unsupported("id table exhausted its 16-bit index space"));
        }
        self.ids.push(id);
        Ok((self.ids.len() - 1) as u16)
    }
}
