//! The `derivation` primitive (§4.4, §6): normalizes attributes into a
//! [`nix_compat::derivation::Derivation`], computes its fixed or floating
//! output paths, and writes the resulting `.drv` as a text-addressed store
//! object.
//!
//! Full attribute normalization (the `derivation` builtin's surrounding
//! attrset conveniences: `outputs ? "out"` defaulting, `structuredAttrs`,
//! string-context extraction from arbitrary attrset values) belongs to the
//! interpreter layer — this function takes already-normalized,
//! already-context-tracked values.

use std::collections::{BTreeMap, BTreeSet};

use nix_compat::derivation::{CAHash, Derivation, NixHash, Output};
use nix_compat::store_path::{StoreDir, StorePath, StorePathRef};
use tvix_store::{Cache, ImportSink};

use crate::context::ContextString;
use crate::error::{DerivationBuildError, Error};

/// How a fixed output's expected content hash was declared.
#[derive(Clone, Debug)]
pub struct FixedOutputSpec {
    /// `true` for a NAR (recursive) hash, `false` for a flat hash of the
    /// output's raw bytes (only meaningful for a single-file output).
    pub recursive: bool,
    pub hash: NixHash,
}

#[derive(Clone, Debug)]
pub struct OutputRequest {
    pub name: String,
    /// `None` for a floating output, whose path is only known once the
    /// derivation's hash-derivation-modulo is computed.
    pub fixed: Option<FixedOutputSpec>,
}

#[derive(Clone, Debug)]
pub struct DerivationRequest {
    pub name: String,
    pub system: String,
    pub builder: ContextString,
    pub args: Vec<ContextString>,
    pub env: BTreeMap<String, ContextString>,
    pub outputs: Vec<OutputRequest>,
}

#[derive(Clone, Debug)]
pub struct DerivationResult {
    pub drv_path: StorePath,
    /// Output name to its absolute store path.
    pub outputs: BTreeMap<String, String>,
}

enum Reference {
    Source(String),
    Output { drv_path: String, output: String },
}

/// Splits a context reference into a plain source reference, or a
/// `(drv_path, output_name)` pair, per the `"!<output>!<drvPath>"` marker
/// documented on [`crate::context::StringContext`].
fn classify_ref(r: &str) -> Reference {
    if let Some(rest) = r.strip_prefix('!') {
        if let Some((output, drv_path)) = rest.split_once('!') {
            return Reference::Output {
                drv_path: drv_path.to_string(),
                output: output.to_string(),
            };
        }
    }
    Reference::Source(r.to_string())
}

fn collect_context<'a>(
    strings: impl IntoIterator<Item = &'a ContextString>,
) -> (BTreeSet<String>, BTreeMap<String, BTreeSet<String>>) {
    let mut input_sources = BTreeSet::new();
    let mut input_derivations: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for s in strings {
        for r in &s.context.refs {
            match classify_ref(r) {
                Reference::Source(p) => {
                    input_sources.insert(p);
                }
                Reference::Output { drv_path, output } => {
                    input_derivations.entry(drv_path).or_default().insert(output);
                }
            }
        }
    }

    (input_sources, input_derivations)
}

/// Builds and writes a derivation to the store.
///
/// `fn_get_derivation_or_fod_hash` mirrors
/// [`nix_compat::derivation::Derivation::derivation_or_fod_hash`]'s own
/// callback signature: computing the hash-derivation-modulo of an upstream
/// input derivation is the embedding interpreter's job, since it owns the
/// evaluation-level cache that makes repeated lookups cheap. This crate
/// only ever computes its own derivation's hash.
#[tracing::instrument(skip_all, fields(name = %req.name))]
pub fn derivation<S: ImportSink, F>(
    store_dir: &StoreDir,
    cache: &mut Cache,
    sink: &mut S,
    req: DerivationRequest,
    fn_get_derivation_or_fod_hash: F,
) -> Result<DerivationResult, Error>
where
    F: Fn(&StorePathRef) -> NixHash,
{
    if req.outputs.is_empty() {
        return Err(DerivationBuildError::NoOutputs.into());
    }
    let mut seen = BTreeSet::new();
    for o in &req.outputs {
        if !seen.insert(o.name.clone()) {
            return Err(DerivationBuildError::DuplicateOutput(o.name.clone()).into());
        }
    }

    let mut context_strings: Vec<&ContextString> = vec![&req.builder];
    context_strings.extend(req.args.iter());
    context_strings.extend(req.env.values());
    let (input_sources, input_derivations) = collect_context(context_strings);

    let outputs = req
        .outputs
        .iter()
        .map(|o| {
            let ca_hash = o.fixed.as_ref().map(|f| {
                if f.recursive {
                    CAHash::Nar(f.hash.clone())
                } else {
                    CAHash::Flat(f.hash.clone())
                }
            });
            (
                o.name.clone(),
                Output {
                    path: String::new(),
                    ca_hash,
                },
            )
        })
        .collect();

    let mut environment: BTreeMap<String, bstr::BString> = req
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.value.as_bytes().into()))
        .collect();
    environment
        .entry("name".to_string())
        .or_insert_with(|| req.name.as_bytes().into());
    environment
        .entry("builder".to_string())
        .or_insert_with(|| req.builder.value.as_bytes().into());
    environment
        .entry("system".to_string())
        .or_insert_with(|| req.system.as_bytes().into());

    let mut drv = Derivation {
        arguments: req.args.iter().map(|a| a.value.clone()).collect(),
        builder: req.builder.value.clone(),
        environment,
        input_derivations,
        input_sources,
        outputs,
        system: req.system.clone(),
    };

    let derivation_or_fod_hash = drv.derivation_or_fod_hash(fn_get_derivation_or_fod_hash);
    drv.calculate_output_paths(store_dir, &req.name, &derivation_or_fod_hash)?;

    let aterm_bytes = drv.to_aterm_bytes();
    let mut references: Vec<String> = drv.input_sources.iter().cloned().collect();
    references.extend(drv.input_derivations.keys().cloned());
    references.sort();

    let drv_path = tvix_store::import_file(
        store_dir,
        cache,
        sink,
        &format!("{}.drv", req.name),
        &aterm_bytes,
        &references,
    )?;

    let outputs = drv
        .outputs
        .iter()
        .map(|(name, output)| (name.clone(), output.path.clone()))
        .collect();

    Ok(DerivationResult { drv_path, outputs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn setup() -> (tempfile::TempDir, StoreDir, Cache, tvix_store::FilesystemImportSink) {
        let store_dir_tmp = tempfile::tempdir().unwrap();
        let store_dir = StoreDir::from_str(store_dir_tmp.path().to_str().unwrap()).unwrap();
        let cache = Cache::open_in_memory().unwrap();
        let sink = tvix_store::FilesystemImportSink::new(store_dir_tmp.path());
        (store_dir_tmp, store_dir, cache, sink)
    }

    fn no_upstream(_: &StorePathRef) -> NixHash {
        panic!("no input derivations expected in these tests")
    }

    #[test]
    fn floating_single_output_derivation() {
        let (_tmp, store_dir, mut cache, mut sink) = setup();
        let req = DerivationRequest {
            name: "hello".to_string(),
            system: "x86_64-linux".to_string(),
            builder: ContextString::without_context("/bin/sh"),
            args: vec![ContextString::without_context("-c"), ContextString::without_context("echo hi > $out")],
            env: BTreeMap::new(),
            outputs: vec![OutputRequest {
                name: "out".to_string(),
                fixed: None,
            }],
        };

        let result = derivation(&store_dir, &mut cache, &mut sink, req, no_upstream).unwrap();
        assert!(result.outputs["out"].starts_with(&store_dir.to_string()));
        assert!(result.outputs["out"].ends_with("-hello"));
    }

    #[test]
    fn non_out_output_gets_name_suffix() {
        let (_tmp, store_dir, mut cache, mut sink) = setup();
        let req = DerivationRequest {
            name: "hello".to_string(),
            system: "x86_64-linux".to_string(),
            builder: ContextString::without_context("/bin/sh"),
            args: vec![],
            env: BTreeMap::new(),
            outputs: vec![
                OutputRequest {
                    name: "out".to_string(),
                    fixed: None,
                },
                OutputRequest {
                    name: "dev".to_string(),
                    fixed: None,
                },
            ],
        };

        let result = derivation(&store_dir, &mut cache, &mut sink, req, no_upstream).unwrap();
        assert!(result.outputs["out"].ends_with("-hello"));
        assert!(result.outputs["dev"].ends_with("-hello-dev"));
    }

    #[test]
    fn fixed_output_derivation_is_deterministic_across_builders() {
        let (_tmp, store_dir, mut cache, mut sink) = setup();
        let hash = NixHash::Sha256([1u8; 32]);

        let make_req = |builder: &str| DerivationRequest {
            name: "fetched".to_string(),
            system: "x86_64-linux".to_string(),
            builder: ContextString::without_context(builder),
            args: vec![],
            env: BTreeMap::new(),
            outputs: vec![OutputRequest {
                name: "out".to_string(),
                fixed: Some(FixedOutputSpec {
                    recursive: false,
                    hash: hash.clone(),
                }),
            }],
        };

        let a = derivation(&store_dir, &mut cache, &mut sink, make_req("/bin/sh"), no_upstream)
            .unwrap();
        let b = derivation(
            &store_dir,
            &mut cache,
            &mut sink,
            make_req("/bin/bash"),
            no_upstream,
        )
        .unwrap();

        // fixed-output paths only depend on the declared hash, not the builder.
        assert_eq!(a.outputs["out"], b.outputs["out"]);
    }

    #[test]
    fn rejects_empty_outputs() {
        let (_tmp, store_dir, mut cache, mut sink) = setup();
        let req = DerivationRequest {
            name: "n".to_string(),
            system: "x86_64-linux".to_string(),
            builder: ContextString::without_context("/bin/sh"),
            args: vec![],
            env: BTreeMap::new(),
            outputs: vec![],
        };
        let err = derivation(&store_dir, &mut cache, &mut sink, req, no_upstream).unwrap_err();
        assert!(matches!(
            err,
            Error::DerivationBuild(DerivationBuildError::NoOutputs)
        ));
    }

    #[test]
    fn rejects_duplicate_output_names() {
        let (_tmp, store_dir, mut cache, mut sink) = setup();
        let req = DerivationRequest {
            name: "n".to_string(),
            system: "x86_64-linux".to_string(),
            builder: ContextString::without_context("/bin/sh"),
            args: vec![],
            env: BTreeMap::new(),
            outputs: vec![
                OutputRequest {
                    name: "out".to_string(),
                    fixed: None,
                },
                OutputRequest {
                    name: "out".to_string(),
                    fixed: None,
                },
            ],
        };
        let err = derivation(&store_dir, &mut cache, &mut sink, req, no_upstream).unwrap_err();
        assert!(matches!(
            err,
            Error::DerivationBuild(DerivationBuildError::DuplicateOutput(_))
        ));
    }
}
