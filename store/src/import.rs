//! The source-import pipeline (§4.5): turns a live filesystem path, or an
//! in-memory string, into a store object.

use std::fs;
use std::io::{self, BufReader, Write};
use std::path::Path;

use nix_compat::nixhash::NixHash;
use nix_compat::store_path::{build_nar_based_store_path, build_store_path_from_references, StoreDir, StorePath};
use sha2::{Digest, Sha256};

use crate::cache::Cache;
use crate::error::{ContractError, Error, WalkError};
use crate::sink::{ImportSink, Trailer};
use crate::walk::{self, WalkNode};

/// A writer that tees every byte written to it into a running SHA-256 digest
/// before forwarding it to the wrapped [`ImportSink`] — this is what lets the
/// NAR hash be available immediately on close without re-reading the stream
/// (§4.1).
struct HashingSink<'a, S: ImportSink> {
    hasher: Sha256,
    len: u64,
    sink: &'a mut S,
}

impl<'a, S: ImportSink> HashingSink<'a, S> {
    fn new(sink: &'a mut S) -> Self {
        Self {
            hasher: Sha256::new(),
            len: 0,
            sink,
        }
    }

    fn finalize(self) -> ([u8; 32], u64) {
        (self.hasher.finalize().into(), self.len)
    }
}

impl<'a, S: ImportSink> Write for HashingSink<'a, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.len += buf.len() as u64;
        self.sink.write_nar(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Emits a [`WalkNode`] as NAR into `node`, verifying each regular file's
/// size hasn't drifted since the walk observed it.
fn emit_node(node: &WalkNode, dest: nix_compat::nar::writer::Node<'_, '_>) -> Result<(), Error> {
    match node {
        WalkNode::Symlink { target, .. } => {
            use std::os::unix::ffi::OsStrExt;
            dest.symlink(target.as_os_str().as_bytes())
                .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))
        }
        WalkNode::File {
            absolute_path,
            executable,
            size,
        } => {
            let current_size = fs::metadata(absolute_path)
                .map_err(|e| WalkError::Io(absolute_path.clone(), e))?
                .len();
            if current_size != *size {
                return Err(WalkError::SizeChanged(absolute_path.clone(), *size, current_size).into());
            }

            let file = fs::File::open(absolute_path)
                .map_err(|e| WalkError::Io(absolute_path.clone(), e))?;
            let mut reader = BufReader::new(file);
            dest.file(*executable, *size, &mut reader)
                .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))
        }
        WalkNode::Directory { children, .. } => {
            let mut dir = dest
                .directory()
                .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))?;
            for (name, child) in children {
                let child_dest = dir
                    .entry(name)
                    .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))?;
                emit_node(child, child_dest)?;
            }
            dir.close()
                .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))
        }
    }
}

/// Imports a resolved, absolute filesystem path into the store (§4.5,
/// `importPath`). Relative-path resolution against the calling script's
/// source file is the `host` crate's concern; by the time a path reaches
/// here it must already be absolute.
#[tracing::instrument(skip(cache, sink), fields(path = %path.display(), name))]
pub fn import_path<S: ImportSink>(
    store_dir: &StoreDir,
    cache: &mut Cache,
    sink: &mut S,
    path: &Path,
    name: Option<&str>,
) -> Result<StorePath, Error> {
    assert!(path.is_absolute(), "import_path requires a resolved, absolute path");

    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| path.file_name().unwrap().to_string_lossy().into_owned());

    let walked = walk::walk(path)?;

    if let Some(cached) = cache.lookup(&name, &walked.stamps)? {
        tracing::debug!(cached, "stamp match, reusing cached store path");
        return store_dir
            .from_absolute_path(cached.as_bytes())
            .map_err(Error::StorePath);
    }

    let mut hashing = HashingSink::new(sink);
    {
        let root = nix_compat::nar::writer::open(&mut hashing)
            .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))?;
        emit_node(&walked.root, root)?;
    }
    let (nar_hash_bytes, nar_size) = hashing.finalize();
    let nar_hash = NixHash::Sha256(nar_hash_bytes);

    let store_path =
        build_nar_based_store_path(store_dir, &name, &nar_hash, Vec::<String>::new(), false)
            .map_err(Error::StorePath)?;
    let store_path_abs = store_dir.to_absolute_path(&store_path);

    let trailer = Trailer {
        store_path: store_path_abs.clone(),
        references: vec![],
    };
    sink.finish(&trailer)
        .map_err(Error::Store)?;

    cache.record_import(
        &name,
        &path.to_string_lossy(),
        &store_path_abs,
        nar_size,
        &nar_hash.to_nix_hex_string(),
        Some("source"),
        &[],
        &walked.stamps,
    )?;

    Ok(store_path)
}

/// Imports an in-memory string (§4.5, `importFile`, used by `builtins.toFile`).
/// `references` must already be absolute store path strings; a reference
/// beginning with `"!"` (the marker for "output of a derivation") is
/// rejected, since `toFile` may only depend on other sources.
#[tracing::instrument(skip(cache, sink, contents), fields(name))]
pub fn import_file<S: ImportSink>(
    store_dir: &StoreDir,
    cache: &mut Cache,
    sink: &mut S,
    name: &str,
    contents: &[u8],
    references: &[String],
) -> Result<StorePath, Error> {
    if let Some(bad) = references.iter().find(|r| r.starts_with('!')) {
        return Err(Error::Contract(ContractError::ReferencesDerivationOutput(
            bad.clone(),
        )));
    }

    let mut sorted_refs = references.to_vec();
    sorted_refs.sort();

    let store_path = build_store_path_from_references(store_dir, name, contents, &sorted_refs)
        .map_err(Error::StorePath)?;
    let store_path_abs = store_dir.to_absolute_path(&store_path);

    if Path::new(&store_path_abs).exists() {
        return Ok(store_path);
    }

    let mut hashing = HashingSink::new(sink);
    {
        let root = nix_compat::nar::writer::open(&mut hashing)
            .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))?;
        let mut reader = BufReader::new(contents);
        root.file(false, contents.len() as u64, &mut reader)
            .map_err(|e| Error::Store(crate::error::StoreError::Io(e)))?;
    }
    let (nar_hash_bytes, nar_size) = hashing.finalize();
    let nar_hash = NixHash::Sha256(nar_hash_bytes);

    let trailer = Trailer {
        store_path: store_path_abs.clone(),
        references: sorted_refs.clone(),
    };
    sink.finish(&trailer).map_err(Error::Store)?;

    cache.record_object(
        &store_path_abs,
        nar_size,
        &nar_hash.to_nix_hex_string(),
        Some("text"),
        &sorted_refs,
    )?;

    Ok(store_path)
}
