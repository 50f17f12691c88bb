// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//!
//! Local driver for the filesystem-tree serializer: walks a real
//! directory on disk, assigns inode numbers depth-first, and writes
//! the resulting inode and directory tables to an output file.
//!
//! Regular files are stored whole, each as its own single-block,
//! uncompressed-placement "file" body — this driver exists to exercise
//! the serializer end to end, not to build a complete SquashFS image
//! (fragment packing and block compression are a separate concern).
use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sqfs_fstree::collab::{CountingWriter, FileWriter, InterningIdTable};
use sqfs_fstree::compress::Zlib;
use sqfs_fstree::error::Result;
use sqfs_fstree::export::ExportTable;
use sqfs_fstree::metadata::MetadataWriter;
use sqfs_fstree::tree::{DirChild, FsTree, NodeKind, TreeNode};

#[derive(Parser)]
#[command(
    name = "sqfs-fstree-dump",
    author = "Oxide Computer Company",
    version = "0.1.0",
    about = "Serializes a directory tree into SquashFS inode/directory tables"
)]
struct Args {
    /// Directory to walk
    input: PathBuf,

    /// Output file for the serialized tables
    output: PathBuf,

    /// Build and record the NFS export table
    #[clap(long)]
    export_table: bool,

    /// zlib compression level (0-9)
    #[clap(long, default_value_t = 6)]
    level: u8,

    /// Increase log verbosity (-v, -vv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn filter_for_verbosity(v: u8) -> EnvFilter {
    let default = match v {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Recursively builds the tree arena from `path`, assigning inode
/// numbers in post-order (children before parents) as required by
/// [`sqfs_fstree::tree::serialize_fstree`].
fn walk(path: &Path, parent: Option<usize>, next_inode: &mut u32, nodes: &mut Vec<TreeNode>, order: &mut Vec<usize>) -> Result<usize> {
    let meta = fs::symlink_metadata(path)?;
    let mode = meta.mode() as u16;
    let uid = meta.uid();
    let gid = meta.gid();
    let mtime = meta.mtime().max(0) as u32;
    let nlink = meta.nlink().max(1) as u32;

    // Placeholder node_num; directories need their id reserved before
    // recursing so `parent` back-references resolve, but the final
    // inode_num is only meaningful once assigned below.
    let reserved = nodes.len();
    nodes.push(TreeNode::new(parent, mode, uid, gid, mtime, nlink, 0, NodeKind::Fifo));

    let built_kind = if meta.is_dir() {
        let mut children = Vec::new();
        let mut entries: Vec<_> = fs::read_dir(path)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned().into_bytes();
            let child_id = walk(&entry.path(), Some(reserved), next_inode, nodes, order)?;
            children.push(DirChild { name, target: child_id });
        }
        NodeKind::Dir { children }
    } else if meta.is_symlink() {
        let target = fs::read_link(path)?;
        NodeKind::Symlink { target: target.to_string_lossy().into_owned().into_bytes() }
    } else {
        let data = fs::read(path)?;
        NodeKind::File {
            blocks_start: 0,
            file_size: data.len() as u64,
            sparse: 0,
            fragment_idx: u32::MAX,
            fragment_offset: u32::MAX,
            block_sizes: Vec::new(),
        }
    };

    *next_inode += 1;
    nodes[reserved].kind = built_kind;
    nodes[reserved].inode_num = *next_inode;
    order.push(reserved);
    Ok(reserved)
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_env_filter(filter_for_verbosity(args.verbose)).init();

    let mut nodes = Vec::new();
    let mut order = Vec::new();
    let mut next_inode = 0u32;
    let root = walk(&args.input, None, &mut next_inode, &mut nodes, &mut order)?;
    let tree = FsTree { nodes, root };

    info!(count = order.len(), input = %args.input.display(), "walked filesystem tree");

    let out: Rc<RefCell<dyn FileWriter>> = Rc::new(RefCell::new(CountingWriter::new(fs::File::create(&args.output)?)));
    let mut im = MetadataWriter::new_eager(Zlib { level: args.level }, out.clone());
    let mut dm = MetadataWriter::new_deferred(Zlib { level: args.level });
    let mut idtbl = InterningIdTable::default();
    let mut export = args.export_table.then(ExportTable::new);

    let outcome = sqfs_fstree::tree::serialize_fstree(&tree, &order, &mut im, &mut dm, &mut idtbl, export.as_mut(), &out)?;

    info!(
        inode_table_start = outcome.inode_table_start,
        directory_table_start = outcome.directory_table_start,
        root_inode_ref = outcome.root_inode_ref,
        "serialized filesystem tree"
    );

    if let Some(export) = export {
        let export_table_start = out.borrow().get_size();
        let mut export_im = MetadataWriter::new_eager(Zlib { level: args.level }, out.clone());
        export.write(&mut export_im)?;
        export_im.flush()?;
        info!(export_table_start, entries = export.len(), "wrote export table");
    }

    Ok(())
}
