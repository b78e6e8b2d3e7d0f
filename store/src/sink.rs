//! The "import endpoint" (§4.5): a small trait abstracting over however NAR
//! bytes actually get from this process into a store. The core pipeline only
//! ever talks to this trait; [`FilesystemImportSink`] is the one concrete,
//! local-filesystem-backed implementation shipped with this crate so the
//! pipeline is exercisable without a real store daemon. A production
//! deployment would dial a real store daemon protocol behind the same trait
//! instead — that protocol is out of scope here (§1).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Names the destination of an import and its declared references, sent
/// once streaming is complete (§4.5 step 7).
#[derive(Debug, Clone)]
pub struct Trailer {
    pub store_path: String,
    pub references: Vec<String>,
}

/// An endpoint NAR bytes are streamed into, closed out with a [`Trailer`]
/// naming the destination. Implementations must treat a dropped sink with no
/// `finish()` call as an abort (§5, "Cancellation and timeout"): no partial
/// state may become visible as a committed store object.
pub trait ImportSink: Send {
    /// Streams another chunk of NAR bytes.
    fn write_nar(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Closes the sink, committing the streamed NAR under `trailer`'s store
    /// path. Returns an error if the endpoint rejects the trailer (e.g. a
    /// directory-component mismatch).
    fn finish(&mut self, trailer: &Trailer) -> Result<(), StoreError>;
}

/// A local-filesystem-backed [`ImportSink`]: buffers the incoming NAR bytes
/// to a temporary file, and on `finish()` unpacks them directly under the
/// configured store directory. This is ambient scaffolding (§10), not a
/// second core component: it has no stability guarantees and no remote
/// variant.
pub struct FilesystemImportSink {
    store_dir: PathBuf,
    buffer: Vec<u8>,
}

impl FilesystemImportSink {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            buffer: Vec::new(),
        }
    }
}

impl ImportSink for FilesystemImportSink {
    fn write_nar(&mut self, buf: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(buf);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(store_path = %trailer.store_path))]
    fn finish(&mut self, trailer: &Trailer) -> Result<(), StoreError> {
        let dest = Path::new(&trailer.store_path);
        if dest.parent() != Some(self.store_dir.as_path()) {
            return Err(StoreError::DirectoryMismatch(
                self.store_dir.display().to_string(),
                dest.display().to_string(),
            ));
        }

        if dest.exists() {
            // object already present (e.g. a concurrent importer of the
            // same content won the race); nothing further to do.
            self.buffer.clear();
            return Ok(());
        }

        let tmp_dir = tempfile::Builder::new()
            .prefix(".import-")
            .tempdir_in(&self.store_dir)
            .map_err(StoreError::Io)?;
        // `tmp_dir` itself already exists as an empty directory, so the
        // unpacked object (which may be a plain file or a symlink, not just
        // a directory) is staged at a fresh path underneath it rather than
        // at `tmp_dir.path()` directly.
        let staged = tmp_dir.path().join("object");

        unpack_nar(&self.buffer, &staged).map_err(StoreError::Io)?;

        fs::rename(&staged, dest).map_err(StoreError::Io)?;

        self.buffer.clear();
        Ok(())
    }
}

/// Unpacks a single NAR into `dest`, which must not yet exist for a
/// directory root (its parent must exist). Mirrors the node kinds NAR
/// supports (file/executable, symlink, directory).
fn unpack_nar(nar_bytes: &[u8], dest: &Path) -> io::Result<()> {
    use nix_compat::nar::reader as nar;
    use std::io::Cursor;

    let mut cursor = Cursor::new(nar_bytes);
    let root = nar::open(&mut cursor)?;
    unpack_node(root, dest)
}

fn unpack_node(node: nix_compat::nar::reader::Node, dest: &Path) -> io::Result<()> {
    use nix_compat::nar::reader::Node;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;

    match node {
        Node::Symlink { target } => {
            let target = std::ffi::OsStr::from_bytes(&target);
            std::os::unix::fs::symlink(target, dest)
        }
        Node::File {
            executable,
            mut reader,
        } => {
            let mut file = fs::File::create(dest)?;
            io::copy(&mut reader, &mut file)?;
            if executable {
                let mut perms = file.metadata()?.permissions();
                perms.set_mode(0o755);
                file.set_permissions(perms)?;
            }
            Ok(())
        }
        Node::Directory(mut dir_reader) => {
            fs::create_dir(dest)?;
            while let Some(entry) = dir_reader.next()? {
                let child_name = std::ffi::OsStr::from_bytes(&entry.name);
                unpack_node(entry.node, &dest.join(child_name))?;
            }
            Ok(())
        }
    }
}
