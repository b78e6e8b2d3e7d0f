//! Host-facing primitives (§2 layer 5, §6): the three operations a language
//! frontend calls into this workspace through — `path`, `toFile`, and
//! `derivation` — built on top of the `nix-compat`/`store` layers below.
//!
//! Nothing in this crate parses or evaluates a scripting language; it only
//! defines the seam ([`ScriptContext`]) an embedder implements, and the
//! string-with-context type ([`ContextString`]) its calls are expressed in.

pub mod context;
pub mod derivation;
pub mod error;
pub mod path;
pub mod to_file;

pub use context::{ContextString, ScriptContext, StringContext, TestScriptContext};
pub use derivation::{derivation, DerivationRequest, DerivationResult, FixedOutputSpec, OutputRequest};
pub use error::Error;
pub use path::{path, PathArg};
pub use to_file::to_file;
