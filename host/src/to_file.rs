//! The `toFile` primitive (§4.5, §6): turns in-memory string contents into a
//! store object, carrying forward whatever store-path context the contents
//! string already had.

use tvix_store::{Cache, ImportSink, StoreDir};

use crate::context::{ContextString, StringContext};
use crate::error::Error;

#[tracing::instrument(skip(cache, sink, contents), fields(name))]
pub fn to_file<S: ImportSink>(
    store_dir: &StoreDir,
    cache: &mut Cache,
    sink: &mut S,
    name: &str,
    contents: &ContextString,
) -> Result<ContextString, Error> {
    let mut references: Vec<String> = contents.context.refs.iter().cloned().collect();
    references.sort();

    let store_path = tvix_store::import_file(
        store_dir,
        cache,
        sink,
        name,
        contents.value.as_bytes(),
        &references,
    )?;

    let abs = store_dir.to_absolute_path(&store_path);
    Ok(ContextString::new(abs.clone(), StringContext::single(abs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn plain_contents_roundtrip() {
        let store_dir_tmp = tempfile::tempdir().unwrap();
        let store_dir = StoreDir::from_str(store_dir_tmp.path().to_str().unwrap()).unwrap();
        let mut cache = Cache::open_in_memory().unwrap();
        let mut sink = tvix_store::FilesystemImportSink::new(store_dir_tmp.path());

        let contents = ContextString::without_context("#!/bin/sh\necho hi\n");
        let result = to_file(&store_dir, &mut cache, &mut sink, "run.sh", &contents).unwrap();

        assert_eq!(result.context.refs.len(), 1);
        let abs = &result.value;
        assert_eq!(std::fs::read_to_string(abs).unwrap(), contents.value);
    }

    #[test]
    fn output_reference_is_rejected() {
        let store_dir_tmp = tempfile::tempdir().unwrap();
        let store_dir = StoreDir::from_str(store_dir_tmp.path().to_str().unwrap()).unwrap();
        let mut cache = Cache::open_in_memory().unwrap();
        let mut sink = tvix_store::FilesystemImportSink::new(store_dir_tmp.path());

        let contents = ContextString::new(
            "built thing",
            StringContext::single("!out!/nix/store/aaaa-foo.drv"),
        );
        let err = to_file(&store_dir, &mut cache, &mut sink, "n", &contents).unwrap_err();
        assert!(matches!(
            err,
            Error::Store(tvix_store::Error::Contract(_))
        ));
    }
}
