use crate::nixhash::{CAHash, NixHash};
use crate::store_path::{StoreDir, StorePath};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::Error;

/// Errors that can occur when building a content-addressed or output store
/// path, where the failure isn't just "bad name".
#[derive(Debug, Eq, PartialEq, Error)]
pub enum BuildStorePathError {
    #[error("invalid resulting store path: {0}")]
    InvalidStorePath(#[from] Error),
}

/// compress_hash takes an arbitrarily long sequence of bytes (usually
/// a hash digest), and returns a sequence of bytes of length
/// OUTPUT_SIZE.
///
/// It's calculated by rotating through the bytes in the output buffer
/// (zero- initialized), and XOR'ing with each byte of the passed
/// input. It consumes 1 byte at a time, and XOR's it with the current
/// value in the output buffer.
///
/// This mimics equivalent functionality in C++ Nix.
pub fn compress_hash<const OUTPUT_SIZE: usize>(input: &[u8]) -> [u8; OUTPUT_SIZE] {
    let mut output = [0; OUTPUT_SIZE];

    for (ii, ch) in input.iter().enumerate() {
        output[ii % OUTPUT_SIZE] ^= ch;
    }

    output
}

/// This builds a store path, by calculating the text_hash_string of either a
/// derivation or a literal text file that may contain references.
pub fn build_store_path_from_references<
    S: AsRef<str>,
    I: IntoIterator<Item = S>,
    C: AsRef<[u8]>,
>(
    store_dir: &StoreDir,
    name: &str,
    content: C,
    references: I,
) -> Result<StorePath, Error> {
    let text_hash_str = text_hash_string(store_dir, name, content, references);
    build_store_path_from_fingerprint(name, &text_hash_str)
}

/// This builds a store path from a fingerprint.
/// Usually, that function is used from [build_store_path_from_references] and
/// passed a "text hash string" (starting with "text:" as fingerprint),
/// but other fingerprints starting with "output:" are also used in Derivation
/// output path calculation.
///
/// The fingerprint is hashed with sha256, its digest is compressed to 20 bytes,
/// and nixbase32-encoded (32 characters).
pub fn build_store_path_from_fingerprint(
    name: &str,
    fingerprint: &str,
) -> Result<StorePath, Error> {
    let digest = {
        let hasher = Sha256::new_with_prefix(fingerprint);
        hasher.finalize()
    };
    let compressed = compress_hash::<20>(&digest);
    let name = super::validate_name(name.as_bytes())?;
    Ok(StorePath {
        digest: compressed,
        name,
    })
}

/// This contains the Nix logic to create "text hash strings", which are used
/// in `builtins.toFile`, as well as in Derivation Path calculation.
///
/// A text hash is calculated by concatenating the following fields, separated by a `:`:
///
///  - text
///  - references, individually joined by `:`
///  - the nix_hash_string representation of the sha256 digest of some contents
///  - the value of `storeDir`
///  - the name
pub fn text_hash_string<S: AsRef<str>, I: IntoIterator<Item = S>, C: AsRef<[u8]>>(
    store_dir: &StoreDir,
    name: &str,
    content: C,
    references: I,
) -> String {
    let mut s = String::from("text:");

    for reference in references {
        s.push_str(reference.as_ref());
        s.push(':');
    }

    let content_digest: [u8; 32] = {
        let hasher = Sha256::new_with_prefix(content);
        hasher.finalize().into()
    };
    s.push_str(&NixHash::Sha256(content_digest).to_nix_hex_string());

    s.push_str(&format!(":{}:{}", store_dir, name));

    s
}

/// Builds the store path of a `text`-addressed object (a derivation, or a
/// literal file produced by `builtins.toFile`), given its name, its content
/// and the store paths it references.
pub fn build_text_path<S: AsRef<str>, I: IntoIterator<Item = S>, C: AsRef<[u8]>>(
    store_dir: &StoreDir,
    name: &str,
    content: C,
    references: I,
) -> Result<StorePath, Error> {
    build_store_path_from_references(store_dir, name, content, references)
}

/// For a [CAHash], return the "prefix" used for the `fixed:out:` fingerprint,
/// as used for fixed-output paths. Empty for [CAHash::Flat], `"r:"` for
/// [CAHash::Nar]. [CAHash::Text] is not a valid fixed-output CA.
fn ca_method_prefix(ca_hash: &CAHash) -> &'static str {
    match ca_hash {
        CAHash::Flat(_) => "",
        CAHash::Nar(_) => "r:",
        CAHash::Text(_) => panic!("invalid ca hash in fixed-output context: {:?}", ca_hash),
    }
}

/// Builds the store path of a fixed-output path (one whose content address is
/// known upfront), given the output name and its [CAHash].
///
/// `references` is only meaningful for the rare case of fixed-output paths
/// depending on other store paths (Nix permits this for `recursive` CA
/// outputs); ordinary fixed-output derivations pass an empty iterator. A
/// `Nar(Sha256)` CA is a plain NAR-addressed object and is handled by
/// delegating to [build_nar_based_store_path]'s `"source"` scheme; every
/// other case goes through the legacy two-stage `fixed:out:`/`output:out:`
/// fingerprint real Nix uses, and in that case `references`/`self_reference`
/// don't apply (Nix doesn't support references on those outputs) and are
/// ignored.
pub fn build_ca_path<S: AsRef<str>, I: IntoIterator<Item = S>>(
    store_dir: &StoreDir,
    name: &str,
    ca_hash: &CAHash,
    references: I,
    self_reference: bool,
) -> Result<StorePath, BuildStorePathError> {
    match ca_hash {
        CAHash::Text(digest) => {
            let mut s = String::from("text");
            for reference in references {
                s.push(':');
                s.push_str(reference.as_ref());
            }
            s.push(':');
            s.push_str(&NixHash::Sha256(*digest).to_nix_hex_string());
            build_store_path_from_fingerprint(name, &s)
                .map_err(BuildStorePathError::InvalidStorePath)
        }
        CAHash::Nar(NixHash::Sha256(digest)) => {
            build_nar_based_store_path(
                store_dir,
                name,
                &NixHash::Sha256(*digest),
                references,
                self_reference,
            )
            .map_err(BuildStorePathError::InvalidStorePath)
        }
        CAHash::Flat(_) | CAHash::Nar(_) => {
            // Stage 1: hash the legacy "fixed:out:" descriptor, which never
            // mentions store_dir or name.
            let inner_input = format!(
                "fixed:out:{}{}:",
                ca_method_prefix(ca_hash),
                ca_hash.hash().to_nix_hex_string()
            );
            let inner_digest: [u8; 32] = Sha256::new_with_prefix(&inner_input).finalize().into();
            let inner_hash = NixHash::Sha256(inner_digest);

            // Stage 2: the actual store-path fingerprint, exactly like
            // build_output_path's "output:<name>:..." shape, fixed to the
            // literal output name "out" (fixed outputs are always "out",
            // enforced by Derivation::validate).
            let fingerprint = format!(
                "output:out:{}:{}:{}",
                inner_hash.to_nix_hex_string(),
                store_dir,
                name
            );

            build_store_path_from_fingerprint(name, &fingerprint)
                .map_err(BuildStorePathError::InvalidStorePath)
        }
    }
}

/// Builds the store path of a *floating* (non fixed-output) derivation
/// output, given the derivation-or-fod hash (see
/// [crate::derivation::Derivation::derivation_or_fod_hash]), the output name,
/// and the store path name (derivation name, plus `-outputName` suffix for
/// non-`out` outputs).
pub fn build_output_path(
    store_dir: &StoreDir,
    derivation_or_fod_hash: &NixHash,
    output_name: &str,
    name: &str,
) -> Result<StorePath, Error> {
    let fingerprint = format!(
        "output:{}:{}:{}:{}",
        output_name,
        derivation_or_fod_hash.to_nix_hex_string(),
        store_dir,
        name
    );
    build_store_path_from_fingerprint(name, &fingerprint)
}

/// Builds the store path of a `recursive` (NAR-hashed) content-addressed
/// object with an arbitrary reference set, as used by the source import
/// pipeline (`typ == "source"`). Unlike [build_ca_path], which is restricted
/// to the legacy `fixed:out:` fingerprint with no more than a self
/// reference, this supports the general reference set a plain `path`/`toFile`
/// import can carry.
pub fn build_nar_based_store_path<S: AsRef<str>, I: IntoIterator<Item = S>>(
    store_dir: &StoreDir,
    name: &str,
    nar_hash: &NixHash,
    references: I,
    self_reference: bool,
) -> Result<StorePath, Error> {
    let mut fingerprint = String::from("source");

    for reference in references {
        fingerprint.push(':');
        fingerprint.push_str(reference.as_ref());
    }
    if self_reference {
        fingerprint.push_str(":self");
    }
    fingerprint.push(':');
    fingerprint.push_str(&nar_hash.to_nix_hex_string());
    fingerprint.push(':');
    fingerprint.push_str(&store_dir.to_string());
    fingerprint.push(':');
    fingerprint.push_str(name);

    build_store_path_from_fingerprint(name, &fingerprint)
}

/// The placeholder for an output of a derivation that has not yet been
/// evaluated (only its drv digest and base name are known). Used when one
/// derivation's attrset references an output of another derivation that
/// hasn't been built yet.
pub fn upstream_output_placeholder(drv_digest_hex: &str, drv_base_name: &str, output_name: &str) -> String {
    let mut suffix = drv_base_name.to_string();
    if output_name != "out" {
        suffix.push('-');
        suffix.push_str(output_name);
    }

    let digest = {
        let mut hasher = Sha256::new();
        hasher.update(format!("nix-upstream-output:{}:{}", drv_digest_hex, suffix));
        hasher.finalize()
    };

    format!("/{}", crate::nixbase32::encode(&digest))
}

/// Nix placeholders (i.e. values returned by `builtins.placeholder`)
/// are used to populate outputs with paths that must be
/// string-replaced with the actual placeholders later, at runtime.
///
/// The actual placeholder is basically just a SHA256 hash encoded in
/// cppnix format.
pub fn hash_placeholder(name: &str) -> String {
    let digest = {
        let mut hasher = Sha256::new();
        hasher.update(format!("nix-output:{}", name));
        hasher.finalize()
    };

    format!("/{}", crate::nixbase32::encode(&digest))
}
