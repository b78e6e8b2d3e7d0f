//! Filesystem walking and stamping (§4.6).
//!
//! Produces both a structural tree (used to drive NAR emission in the shape
//! the format actually wants: nested, not flat) and a flat `(path, stamp)`
//! list (used for cache comparisons, which only care about individual
//! entries, not their nesting).

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::error::WalkError;
use crate::stamp::Stamp;

/// One node of the walked tree. Directory children are pre-sorted by raw
/// byte value of their name, matching the order NAR entries must be emitted
/// in (§4.1).
#[derive(Debug, Clone)]
pub enum WalkNode {
    File {
        absolute_path: PathBuf,
        executable: bool,
        size: u64,
    },
    Symlink {
        absolute_path: PathBuf,
        target: PathBuf,
    },
    Directory {
        absolute_path: PathBuf,
        children: Vec<(Vec<u8>, WalkNode)>,
    },
}

impl WalkNode {
    pub fn absolute_path(&self) -> &Path {
        match self {
            WalkNode::File { absolute_path, .. } => absolute_path,
            WalkNode::Symlink { absolute_path, .. } => absolute_path,
            WalkNode::Directory { absolute_path, .. } => absolute_path,
        }
    }
}

/// Result of walking a subtree: the structural tree, plus a flat stamp list
/// in the same order entries would be visited depth-first (the order the
/// cache was populated in is irrelevant; what matters is that the *set* of
/// `(path, stamp)` pairs matches exactly on a cache hit).
pub struct WalkResult {
    pub root: WalkNode,
    pub stamps: Vec<(PathBuf, Stamp)>,
}

/// Walks `root`, which must exist. A symlink at the root is treated as a
/// leaf and is not followed.
pub fn walk(root: &Path) -> Result<WalkResult, WalkError> {
    let meta = fs::symlink_metadata(root).map_err(|e| WalkError::Io(root.to_path_buf(), e))?;

    let mut stamps = Vec::new();
    let node = walk_entry(root, &meta, &mut stamps)?;

    Ok(WalkResult {
        root: node,
        stamps,
    })
}

fn walk_entry(
    path: &Path,
    meta: &fs::Metadata,
    stamps: &mut Vec<(PathBuf, Stamp)>,
) -> Result<WalkNode, WalkError> {
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target =
            fs::read_link(path).map_err(|e| WalkError::Io(path.to_path_buf(), e))?;
        stamps.push((path.to_path_buf(), Stamp::for_symlink(&target)));
        return Ok(WalkNode::Symlink {
            absolute_path: path.to_path_buf(),
            target,
        });
    }

    if file_type.is_dir() {
        stamps.push((path.to_path_buf(), Stamp::for_directory(meta)));

        let mut names: Vec<std::ffi::OsString> = fs::read_dir(path)
            .map_err(|e| WalkError::Io(path.to_path_buf(), e))?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<_>>()
            .map_err(|e| WalkError::Io(path.to_path_buf(), e))?;
        // byte-lexicographic order, as required for NAR emission.
        names.sort_by(|a, b| a.as_encoded_bytes().cmp(b.as_encoded_bytes()));

        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let child_path = path.join(&name);
            let child_meta = fs::symlink_metadata(&child_path)
                .map_err(|e| WalkError::Io(child_path.clone(), e))?;
            let child_node = walk_entry(&child_path, &child_meta, stamps)?;
            children.push((name.as_encoded_bytes().to_vec(), child_node));
        }

        return Ok(WalkNode::Directory {
            absolute_path: path.to_path_buf(),
            children,
        });
    }

    if file_type.is_file() {
        let executable = meta.permissions().mode() & 0o111 != 0;
        stamps.push((path.to_path_buf(), Stamp::for_file(meta, executable)));
        return Ok(WalkNode::File {
            absolute_path: path.to_path_buf(),
            executable,
            size: meta.size(),
        });
    }

    if file_type.is_block_device()
        || file_type.is_char_device()
        || file_type.is_fifo()
        || file_type.is_socket()
    {
        return Err(WalkError::UnsupportedFileType(path.to_path_buf()));
    }

    Err(WalkError::UnsupportedFileType(path.to_path_buf()))
}
