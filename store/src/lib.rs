//! The content-addressed store: path computation lives in `nix-compat`; this
//! crate adds the machinery layered on top of it (§2 layer 4) — walking and
//! stamping a filesystem subtree, the persistent source-import cache, NAR
//! streaming with concurrent hashing, and the local-filesystem demonstration
//! "import endpoint".

pub mod cache;
pub mod error;
pub mod import;
pub mod sink;
pub mod stamp;
pub mod walk;

pub use cache::Cache;
pub use error::Error;
pub use import::{import_file, import_path};
pub use sink::{FilesystemImportSink, ImportSink, Trailer};

pub use nix_compat::store_path::StoreDir;
