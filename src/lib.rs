// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serializes an in-memory filesystem tree, with file-data placement
//! already decided by the caller, into the SquashFS inode table and
//! directory table byte layout.
//!
//! The entry point is [`tree::serialize_fstree`], which drives the
//! [`dir::DirectoryWriter`] and [`inode::write_inode`] over a
//! [`tree::FsTree`] and appends their output to a pair of
//! [`metadata::MetadataWriter`] sinks.

pub mod collab;
pub mod compress;
pub mod dir;
pub mod error;
pub mod export;
pub mod inode;
pub mod metadata;
pub mod mode;
pub mod tree;

pub use error::{Error, Result};
