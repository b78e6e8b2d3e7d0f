//! Implements (de)serialization to Nix's NAR (Nix ARchive) format.
//!
//! NARs are a way to serialize a file system structure into a stream of
//! bytes, and a NAR hash often is used to refer to the contents of a store
//! path (in conjunction with the [crate::nixhash::NixHash]).
//!
//! Consumers of this crate usually should not need to interact with the
//! [wire] module directly, and instead use the [reader] and [writer] modules.

pub(crate) mod wire;

pub mod reader;
pub mod writer;
