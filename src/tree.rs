// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The in-memory filesystem tree and its single-pass serialization
//! driver (§4.4): walks a pre-ordered (children-before-parents) list of
//! unique inodes, producing the inode table in `IM` and the directory
//! table in `DM`, and back-patches each node's `inode_ref` as it is
//! written so sibling directory entries can reference it.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::collab::{FileWriter, IdTable};
use crate::compress::Compressor;
use crate::dir::DirectoryWriter;
use crate::error::{Context, Error, Result};
use crate::export::ExportTable;
use crate::inode::{Base, Body, Inode, InodeType, XATTR_NONE};
use crate::metadata::MetadataWriter;
use crate::mode::{entry_type, perm_bits};

pub type NodeId = usize;

/// One named reference from a directory to a unique inode. Multiple
/// `DirChild`s across the tree may share the same `target`: that is
/// exactly how a hard link is modeled, since the target is serialized
/// once but referenced under several names.
pub struct DirChild {
    pub name: Vec<u8>,
    pub target: NodeId,
}

/// Per-type payload. Regular-file placement (`File`) is supplied
/// already computed by the caller — this module only encodes it.
pub enum NodeKind {
    Dir { children: Vec<DirChild> },
    File { blocks_start: u64, file_size: u64, sparse: u64, fragment_idx: u32, fragment_offset: u32, block_sizes: Vec<u32> },
    Symlink { target: Vec<u8> },
    Bdev { devno: u32 },
    Cdev { devno: u32 },
    Fifo,
    Socket,
}

pub struct TreeNode {
    pub parent: Option<NodeId>,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub mod_time: u32,
    pub xattr_idx: u32,
    pub link_count: u32,
    pub inode_num: u32,
    pub kind: NodeKind,
    inode_ref: Cell<Option<u64>>,
}

impl TreeNode {
    pub fn new(parent: Option<NodeId>, mode: u16, uid: u32, gid: u32, mod_time: u32, link_count: u32, inode_num: u32, kind: NodeKind) -> TreeNode {
        TreeNode { parent, mode, uid, gid, mod_time, xattr_idx: XATTR_NONE, link_count, inode_num, kind, inode_ref: Cell::new(None) }
    }

    pub fn inode_ref(&self) -> Option<u64> {
        self.inode_ref.get()
    }
}

pub struct FsTree {
    pub nodes: Vec<TreeNode>,
    pub root: NodeId,
}

/// The offsets a superblock needs, produced once serialization
/// completes (§4.4's final bookkeeping).
#[derive(Debug)]
pub struct SerializeOutcome {
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub root_inode_ref: u64,
}

fn build_leaf_inode(node: &TreeNode) -> Result<Inode> {
    let typ = entry_type(node.mode)?;
    let body = match &node.kind {
        NodeKind::Symlink { target } => Body::Symlink { nlink: node.link_count, target: target.clone() },
        NodeKind::Bdev { devno } | NodeKind::Cdev { devno } => Body::Device { nlink: node.link_count, devno: *devno },
        NodeKind::Fifo | NodeKind::Socket => Body::Ipc { nlink: node.link_count },
        NodeKind::Dir { .. } | NodeKind::File { .. } => {
            return Err(Error::Internal("build_leaf_inode called on a directory or file node"))
        }
    };
    Ok(Inode { base: Base::new(typ, node.mode, node.mod_time, node.inode_num), body })
}

fn build_file_inode(node: &TreeNode) -> Result<Inode> {
    let NodeKind::File { blocks_start, file_size, sparse, fragment_idx, fragment_offset, block_sizes } = &node.kind else {
        return Err(Error::Internal("build_file_inode called on a non-file node"));
    };
    let body = if node.link_count > 1 {
        Body::ExtFile {
            blocks_start: *blocks_start,
            file_size: *file_size,
            sparse: *sparse,
            nlink: node.link_count,
            fragment_idx: *fragment_idx,
            fragment_offset: *fragment_offset,
            xattr_idx: XATTR_NONE,
            block_sizes: block_sizes.clone(),
        }
    } else {
        Body::File {
            blocks_start: u32::try_from(*blocks_start).map_err(|_| Error::Unsupported("basic file inode cannot address a 64-bit block start"))?,
            fragment_index: *fragment_idx,
            fragment_offset: *fragment_offset,
            file_size: u32::try_from(*file_size).map_err(|_| Error::Unsupported("basic file inode cannot address a 64-bit file size"))?,
            block_sizes: block_sizes.clone(),
        }
    };
    let typ = if node.link_count > 1 { InodeType::ExtFile } else { InodeType::File };
    Ok(Inode { base: Base::new(typ, node.mode, node.mod_time, node.inode_num), body })
}

/// Walks `order` (children-before-parents) and writes the inode and
/// directory tables for the whole tree.
pub fn serialize_fstree<C: Compressor, D: Compressor>(
    tree: &FsTree,
    order: &[NodeId],
    im: &mut MetadataWriter<C>,
    dm: &mut MetadataWriter<D>,
    idtbl: &mut dyn IdTable,
    mut export: Option<&mut ExportTable>,
    out: &Rc<RefCell<dyn FileWriter>>,
) -> Result<SerializeOutcome> {
    let inode_table_start = out.borrow().get_size();

    for &id in order {
        let node = &tree.nodes[id];

        let mut inode = match &node.kind {
            NodeKind::Dir { children } => {
                if cfg!(debug_assertions) {
                    for c in children {
                        if tree.nodes[c.target].inode_ref().is_none() {
                            return Err(Error::Internal("directory child has no assigned inode_ref; unique-inode list is not children-before-parents"));
                        }
                    }
                }
                let mut dw = DirectoryWriter::new();
                dw.begin(dm, 0).context("recording directory entries")?;
                for c in children {
                    let tgt = &tree.nodes[c.target];
                    let tgt_ref = tgt.inode_ref().expect("validated above in debug builds");
                    dw.add_entry(&c.name, tgt.inode_num, tgt_ref, tgt.mode, export.as_deref_mut()).context("recording directory entries")?;
                }
                dw.end(dm).context("recording directory entries")?;
                let parent_inode = node.parent.map(|p| tree.nodes[p].inode_num).unwrap_or(0);
                let mut inode = dw.create_inode(0, node.xattr_idx, parent_inode);
                match &mut inode.body {
                    Body::Dir { nlink, .. } => *nlink = node.link_count,
                    Body::ExtDir { nlink, .. } => *nlink = node.link_count,
                    _ => unreachable!("create_inode only ever returns Dir or ExtDir"),
                }
                debug!(inode_num = node.inode_num, entries = dw.get_entry_count(), "closed directory");
                inode
            }
            NodeKind::File { .. } => build_file_inode(node)?,
            _ => build_leaf_inode(node)?,
        };

        inode.base.mode = perm_bits(node.mode);
        inode.base.mod_time = node.mod_time;
        inode.base.inode_number = node.inode_num;
        inode.base.uid_idx = idtbl.id_to_index(node.uid)?;
        inode.base.gid_idx = idtbl.id_to_index(node.gid)?;
        inode.set_xattr_index(node.xattr_idx)?;

        let pos = im.get_position();
        let inode_ref = pos.as_inode_ref();
        crate::inode::write_inode(im, &inode)?;
        node.inode_ref.set(Some(inode_ref));

        // Every non-root node is recorded by its parent's add_entry call
        // above; the root has no parent, so it needs this explicit call.
        if id == tree.root {
            if let Some(export) = export.as_deref_mut() {
                export.record(node.inode_num, inode_ref)?;
            }
        }
    }

    im.flush()?;
    dm.flush()?;
    let directory_table_start = out.borrow().get_size();
    dm.write_to_file(out)?;

    let root_inode_ref = tree.nodes[tree.root]
        .inode_ref()
        .ok_or(Error::Internal("root node was never serialized"))?;

    Ok(SerializeOutcome { inode_table_start, directory_table_start, root_inode_ref })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{CountingWriter, InterningIdTable};
    use crate::compress::Store;

    fn setup() -> (Rc<RefCell<CountingWriter<Vec<u8>>>>,) {
        (Rc::new(RefCell::new(CountingWriter::new(Vec::new()))),)
    }

    #[test]
    fn single_empty_directory_round_trips_position() {
        let (out,) = setup();
        let out_dyn: Rc<RefCell<dyn FileWriter>> = out.clone();
        let mut im = MetadataWriter::new_eager(Store, out_dyn.clone());
        let mut dm = MetadataWriter::new_deferred(Store);
        let mut idtbl = InterningIdTable::default();

        let root = TreeNode::new(None, 0o040755, 0, 0, 0, 1, 1, NodeKind::Dir { children: Vec::new() });
        let tree = FsTree { nodes: vec![root], root: 0 };

        let outcome = serialize_fstree(&tree, &[0], &mut im, &mut dm, &mut idtbl, None, &out_dyn).unwrap();
        assert_eq!(outcome.inode_table_start, 0);
        assert_eq!(outcome.root_inode_ref, 0);
        assert!(outcome.directory_table_start >= outcome.inode_table_start);
    }

    #[test]
    fn parent_and_child_directory_links_by_inode_ref() {
        let (out,) = setup();
        let out_dyn: Rc<RefCell<dyn FileWriter>> = out.clone();
        let mut im = MetadataWriter::new_eager(Store, out_dyn.clone());
        let mut dm = MetadataWriter::new_deferred(Store);
        let mut idtbl = InterningIdTable::default();

        let child = TreeNode::new(Some(1), 0o040755, 0, 0, 0, 1, 1, NodeKind::Dir { children: Vec::new() });
        let root = TreeNode::new(None, 0o040755, 0, 0, 0, 1, 2, NodeKind::Dir {
            children: vec![DirChild { name: b"sub".to_vec(), target: 0 }],
        });
        let tree = FsTree { nodes: vec![child, root], root: 1 };

        // children-before-parents: node 0 (child) must be processed first.
        let outcome = serialize_fstree(&tree, &[0, 1], &mut im, &mut dm, &mut idtbl, None, &out_dyn).unwrap();
        assert_eq!(tree.nodes[0].inode_ref(), Some(0));
        assert!(outcome.root_inode_ref > 0, "root inode follows the child in IM");
    }

    #[test]
    fn export_table_records_every_serialized_node() {
        let (out,) = setup();
        let out_dyn: Rc<RefCell<dyn FileWriter>> = out.clone();
        let mut im = MetadataWriter::new_eager(Store, out_dyn.clone());
        let mut dm = MetadataWriter::new_deferred(Store);
        let mut idtbl = InterningIdTable::default();
        let mut export = ExportTable::new();

        let root = TreeNode::new(None, 0o040755, 0, 0, 0, 1, 1, NodeKind::Dir { children: Vec::new() });
        let tree = FsTree { nodes: vec![root], root: 0 };
        let outcome = serialize_fstree(&tree, &[0], &mut im, &mut dm, &mut idtbl, Some(&mut export), &out_dyn).unwrap();

        assert!(!export.is_empty());
        assert_eq!(outcome.root_inode_ref, 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn out_of_order_children_trip_internal_invariant() {
        let (out,) = setup();
        let out_dyn: Rc<RefCell<dyn FileWriter>> = out.clone();
        let mut im = MetadataWriter::new_eager(Store, out_dyn.clone());
        let mut dm = MetadataWriter::new_deferred(Store);
        let mut idtbl = InterningIdTable::default();

        let child = TreeNode::new(Some(1), 0o040755, 0, 0, 0, 1, 1, NodeKind::Dir { children: Vec::new() });
        let root = TreeNode::new(None, 0o040755, 0, 0, 0, 1, 2, NodeKind::Dir {
            children: vec![DirChild { name: b"sub".to_vec(), target: 0 }],
        });
        let tree = FsTree { nodes: vec![child, root], root: 1 };

        // parent processed before its child: violates the ordering contract.
        let err = serialize_fstree(&tree, &[1, 0], &mut im, &mut dm, &mut idtbl, None, &out_dyn).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
