// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! POSIX mode decomposition: file type plus permission bits.
//!
//! SquashFS inodes store the file type in a dedicated `type` field and
//! the permission bits (with the type nibble masked out) in `mode`. This
//! mirrors the traditional Unix `st_mode` layout, broken out bit by bit
//! the same way this codebase already does for on-disk inode modes.

use bitstruct::bitstruct;

use crate::error::{Error, Result};

const IFIFO: u8 = 0o01;
const IFCHR: u8 = 0o02;
const IFDIR: u8 = 0o04;
const IFBLK: u8 = 0o06;
const IFREG: u8 = 0o10;
const IFLNK: u8 = 0o12;
const IFSOCK: u8 = 0o14;

/// The POSIX file type nibble (`mode & S_IFMT`, shifted down).
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    Fifo = IFIFO,
    Char = IFCHR,
    Dir = IFDIR,
    Block = IFBLK,
    Regular = IFREG,
    SymLink = IFLNK,
    Sock = IFSOCK,
    Unused = 0,
}

bitstruct! {
    /// The parsed representation of a POSIX `st_mode` value. Each
    /// permission bit is broken out into its own field so callers never
    /// need to remember the historical Unix bit numbering.
    #[derive(Clone, Copy)]
    pub struct Mode(u16) {
        ox: bool = 0;
        ow: bool = 1;
        or: bool = 2;
        gx: bool = 3;
        gw: bool = 4;
        gr: bool = 5;
        ux: bool = 6;
        uw: bool = 7;
        ur: bool = 8;
        sticky: bool = 9;
        sgid: bool = 10;
        suid: bool = 11;
        typ: FileType = 12..=15;
    }
}

impl bitstruct::FromRaw<u8, FileType> for Mode {
    fn from_raw(raw: u8) -> FileType {
        match raw {
            IFIFO => FileType::Fifo,
            IFCHR => FileType::Char,
            IFDIR => FileType::Dir,
            IFBLK => FileType::Block,
            IFREG => FileType::Regular,
            IFLNK => FileType::SymLink,
            IFSOCK => FileType::Sock,
            _ => FileType::Unused,
        }
    }
}

impl bitstruct::IntoRaw<u8, FileType> for Mode {
    fn into_raw(bits: FileType) -> u8 {
        bits as u8
    }
}

/// The permission bits alone (12 bits: rwxrwxrwx + setuid/setgid/sticky),
/// as stored on the wire once the type nibble has been masked out.
pub fn perm_bits(mode: u16) -> u16 {
    mode & 0o7777
}

/// Maps a POSIX mode's file-type nibble onto the SquashFS inode type
/// tag used for directory entries (§4.3's `get_type`).
pub fn entry_type(mode: u16) -> Result<crate::inode::InodeType> {
    use crate::inode::InodeType;
    match Mode(mode).typ() {
        FileType::Sock => Ok(InodeType::Socket),
        FileType::Fifo => Ok(InodeType::Fifo),
        FileType::SymLink => Ok(InodeType::Symlink),
        FileType::Block => Ok(InodeType::Bdev),
        FileType::Char => Ok(InodeType::Cdev),
        FileType::Dir => Ok(InodeType::Dir),
        FileType::Regular => Ok(InodeType::File),
        FileType::Unused => Err(Error::Unsupported("mode has no representable file type")),
    }
}
