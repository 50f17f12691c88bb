// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Categorical errors produced by the fstree serializer.
//!
//! Every fallible operation in this crate returns [`Result`]. Errors are
//! grouped the way the on-disk format's own failure modes are grouped
//! (bad input vs. bad collaborator vs. I/O), rather than one variant per
//! call site, so callers can match on the category that matters to them.

use std::io;

use thiserror::Error;

/// Errors produced while serializing a filesystem tree into SquashFS
/// inode and directory tables.
#[derive(Debug, Error)]
pub enum Error {
    /// An export-table growth request exceeded the configured maximum.
    #[error("allocation failed: {0}")]
    Allocation(&'static str),

    /// An inode type tag, writer flag, or mode bit pattern has no
    /// on-wire representation.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// A caller-supplied argument violates a documented precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An intermediate structure failed an internal consistency check
    /// (e.g. a block-size payload with a non-multiple-of-4 length).
    #[error("corrupted: {0}")]
    Corrupted(&'static str),

    /// The metadata sink or compressor could not complete a write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An invariant the algorithm relies on (e.g. children-before-parents
    /// ordering) did not hold. Always a bug in the caller or producer.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),

    /// An error that occurred while performing a named high-level step;
    /// wraps the underlying cause so the top-level caller sees one
    /// diagnostic line instead of a bare leaf error.
    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Adds a named context to a [`Result`]'s error, mirroring the single
/// diagnostic line ("recording directory entries" / "storing filesystem
/// tree") that the top-level serializer reports on failure.
pub trait Context<T> {
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T> Context<T> for Result<T> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Context { context, source: Box::new(source) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_and_displays() {
        let r: Result<()> = Err(Error::InvalidArgument("empty name"));
        let wrapped = r.context("recording directory entries");
        let msg = format!("{}", wrapped.unwrap_err());
        assert_eq!(msg, "recording directory entries: invalid argument: empty name");
    }
}
