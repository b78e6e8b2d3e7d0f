//! Errors from the host-facing primitives (§7): these are the only error
//! types in this crate that ever reach the embedding interpreter, so they
//! wrap the lower layers' errors rather than flattening them away.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path {0:?} has no caller context to resolve it against")]
    NoCallerContext(String),

    #[error("path {0:?} does not exist")]
    NotFound(PathBuf),
}

#[derive(Debug, Error)]
pub enum DerivationBuildError {
    #[error("derivation must declare at least one output")]
    NoOutputs,

    #[error("duplicate output name {0:?}")]
    DuplicateOutput(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    DerivationBuild(#[from] DerivationBuildError),

    #[error(transparent)]
    Derivation(#[from] nix_compat::derivation::DerivationError),

    #[error(transparent)]
    Store(#[from] tvix_store::Error),
}
