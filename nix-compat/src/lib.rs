extern crate self as nix_compat;

pub(crate) mod aterm;
pub mod derivation;
pub mod nar;
pub mod nixbase32;
pub mod nixhash;
pub mod store_path;
