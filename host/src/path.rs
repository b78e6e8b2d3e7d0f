//! The `path` primitive (§4.5, §6): resolves a (possibly relative) path
//! argument against the calling script's location, then imports it.

use std::path::{Path, PathBuf};

use tvix_store::{Cache, ImportSink, StoreDir};

use crate::context::{ContextString, ScriptContext, StringContext};
use crate::error::{Error, PathError};

pub struct PathArg {
    pub path: String,
    pub name: Option<String>,
}

/// Resolves `arg.path` and imports it into the store, returning a string
/// with context naming the resulting store path as its sole reference.
#[tracing::instrument(skip(cache, sink, ctx), fields(path = %arg.path))]
pub fn path<S: ImportSink>(
    store_dir: &StoreDir,
    cache: &mut Cache,
    sink: &mut S,
    ctx: &dyn ScriptContext,
    arg: PathArg,
) -> Result<ContextString, Error> {
    let resolved = resolve(ctx, &arg.path)?;
    let store_path =
        tvix_store::import_path(store_dir, cache, sink, &resolved, arg.name.as_deref())?;
    let abs = store_dir.to_absolute_path(&store_path);
    Ok(ContextString::new(abs.clone(), StringContext::single(abs)))
}

/// Resolves a possibly-relative path argument to an absolute, existing path.
/// A relative path is resolved against the calling script's directory
/// (§9, "Caller location"); if the embedder reports no caller (expression
/// mode), it falls back to the process's current working directory.
fn resolve(ctx: &dyn ScriptContext, raw: &str) -> Result<PathBuf, PathError> {
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        let base = match ctx.caller_file() {
            Some(file) => file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            None => std::env::current_dir()
                .map_err(|_| PathError::NoCallerContext(raw.to_string()))?,
        };
        base.join(candidate)
    };

    if !joined.exists() {
        return Err(PathError::NotFound(joined));
    }

    Ok(joined)
}
