//! Error categories for the import pipeline and cache (§7).
//!
//! Each concern gets its own `thiserror` enum, mirroring how `nix-compat`
//! splits store-path parsing and derivation validation into distinct error
//! types. They're only unified into a single `Error` at the pipeline's public
//! entry points (`import_path`, `import_file`), matching the spec's
//! "surfaced to the caller as a single failure" propagation policy.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("i/o error at {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("unsupported file type at {0} (only regular files, directories and symlinks are importable)")]
    UnsupportedFileType(PathBuf),

    #[error("{0} changed size during streaming: recorded {1}, observed {2}")]
    SizeChanged(PathBuf, u64, u64),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("multiple cache rows matched name {0:?}")]
    AmbiguousMapping(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("import endpoint rejected the trailer for {0}: {1}")]
    TrailerRejected(String, String),

    #[error("store path directory mismatch: expected {0}, object under {1}")]
    DirectoryMismatch(String, String),

    #[error("i/o error writing store object: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("toFile contents reference a derivation output ({0}), which toFile cannot depend on")]
    ReferencesDerivationOutput(String),
}

/// The pipeline-level error every `import_path`/`import_file` call surfaces.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("invalid store path: {0}")]
    StorePath(#[from] nix_compat::store_path::Error),
}
