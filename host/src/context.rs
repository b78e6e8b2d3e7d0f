//! The seam named in §1's out-of-scope list, made concrete enough to call
//! from tests without a real language frontend attached.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// What the embedding interpreter must be able to tell this crate about the
/// call site of a `path`/`toFile`/`derivation` invocation.
pub trait ScriptContext {
    /// The absolute path of the script file that is calling the primitive,
    /// if there is one. `None` means "resolve a relative `path()` argument
    /// against the current working directory instead" (§9, "Caller
    /// location") — the embedder is responsible for only returning `None`
    /// from origins it considers safe to fall back like this from (e.g. not
    /// an arbitrary untrusted `load`-style primitive).
    fn caller_file(&self) -> Option<PathBuf>;
}

/// The set of store-path dependencies an interpreter string value carries.
/// A reference beginning with `"!"` names a specific output of a derivation
/// that hasn't necessarily been built yet (`"!<output>!<drvPath>"` in real
/// Nix's encoding; this crate only needs to recognize the marker, not parse
/// the rest, since only `toFile`'s rejection check and `derivation()`'s
/// input-derivation splitting look at it).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StringContext {
    pub refs: BTreeSet<String>,
}

impl StringContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(reference: impl Into<String>) -> Self {
        let mut refs = BTreeSet::new();
        refs.insert(reference.into());
        Self { refs }
    }
}

/// A string value together with its string context — the interpreter-side
/// type `path`/`toFile` return, and the type `derivation()`'s attributes
/// (builder, args, env values) are expressed in terms of.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContextString {
    pub value: String,
    pub context: StringContext,
}

impl ContextString {
    pub fn new(value: impl Into<String>, context: StringContext) -> Self {
        Self {
            value: value.into(),
            context,
        }
    }

    pub fn without_context(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            context: StringContext::new(),
        }
    }
}

/// A [`ScriptContext`] that stands in for a real interpreter in this crate's
/// own test suite.
pub struct TestScriptContext {
    pub caller_file: Option<PathBuf>,
}

impl TestScriptContext {
    pub fn with_caller(path: impl Into<PathBuf>) -> Self {
        Self {
            caller_file: Some(path.into()),
        }
    }

    pub fn expression_mode() -> Self {
        Self { caller_file: None }
    }
}

impl ScriptContext for TestScriptContext {
    fn caller_file(&self) -> Option<PathBuf> {
        self.caller_file.clone()
    }
}
