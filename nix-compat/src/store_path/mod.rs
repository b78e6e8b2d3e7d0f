use crate::nixbase32::{self, Nixbase32DecodeError};
use data_encoding::BASE64;
use std::{fmt, path::PathBuf, str::FromStr};
use thiserror;

#[cfg(target_family = "unix")]
use std::os::unix::ffi::OsStringExt;

mod utils;

pub use utils::*;

pub const DIGEST_SIZE: usize = 20;
// lazy_static doesn't allow us to call NIXBASE32.encode_len(), so we ran it
// manually and have an assert in the tests.
pub const ENCODED_DIGEST_SIZE: usize = 32;

// The store dir prefix, without trailing slash.
// That's usually where the Nix store is mounted at.
pub const STORE_DIR: &str = "/nix/store";
pub const STORE_DIR_WITH_SLASH: &str = "/nix/store/";

/// Errors that can occur when parsing a literal store path
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Dash is missing between hash and name")]
    MissingDash(),
    #[error("Hash encoding is invalid: {0}")]
    InvalidHashEncoding(Nixbase32DecodeError),
    #[error("Invalid length")]
    InvalidLength(),
    #[error(
        "Invalid name: \"{}\", character at position {} is invalid",
        std::str::from_utf8(.0).unwrap_or(&BASE64.encode(.0)),
        .1,
    )]
    InvalidName(Vec<u8>, usize),
    #[error("Tried to parse an absolute path which was missing the store dir prefix.")]
    MissingStoreDir(),
}

/// Represents a path in the Nix store (a direct child of [STORE_DIR]).
///
/// It consists of a digest (20 bytes), and a name, which is a string.
/// The name may only contain ASCII alphanumeric, or one of the following
/// characters: `-`, `_`, `.`, `+`, `?`, `=`.
/// The name is usually used to describe the pname and version of a package.
/// Derivation paths can also be represented as store paths, their names just
/// end with the `.drv` prefix.
///
/// A [StorePath] does not encode any additional subpath "inside" the store
/// path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorePath {
    pub digest: [u8; DIGEST_SIZE],
    pub name: String,
}

impl PartialOrd for StorePath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.digest.partial_cmp(&other.digest)
    }
}

impl Ord for StorePath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.digest.cmp(&other.digest)
    }
}

impl FromStr for StorePath {
    type Err = Error;

    /// Construct a [StorePath] by passing the `$digest-$name` string
    /// that comes after [STORE_DIR_WITH_SLASH].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

impl StorePath {
    /// Construct a [StorePath] by passing the `$digest-$name` string
    /// that comes after [STORE_DIR_WITH_SLASH].
    pub fn from_bytes(s: &[u8]) -> Result<StorePath, Error> {
        // the whole string needs to be at least:
        //
        // - 32 characters (encoded hash)
        // - 1 dash
        // - 1 character for the name
        if s.len() < ENCODED_DIGEST_SIZE + 2 {
            Err(Error::InvalidLength())?
        }

        let digest = match nixbase32::decode(&s[..ENCODED_DIGEST_SIZE]) {
            Ok(decoded) => decoded,
            Err(decoder_error) => return Err(Error::InvalidHashEncoding(decoder_error)),
        };

        if s[ENCODED_DIGEST_SIZE] != b'-' {
            return Err(Error::MissingDash());
        }

        Ok(StorePath {
            name: validate_name(&s[ENCODED_DIGEST_SIZE + 1..])?,
            digest: digest.try_into().expect("size is known"),
        })
    }

    /// Construct a [StorePath] from an absolute store path string.
    /// This is equivalent to calling [StorePath::from_bytes], but stripping the
    /// [STORE_DIR_WITH_SLASH] prefix before.
    pub fn from_absolute_path(s: &[u8]) -> Result<StorePath, Error> {
        match s.strip_prefix(STORE_DIR_WITH_SLASH.as_bytes()) {
            Some(s_stripped) => Self::from_bytes(s_stripped),
            None => Err(Error::MissingStoreDir()),
        }
    }

    /// Construct a [StorePath] from a name and digest.
    pub fn from_name_and_digest(name: String, digest: &[u8]) -> Result<StorePath, Error> {
        Ok(Self {
            name: validate_name(name.as_bytes())?,
            digest: digest.try_into().map_err(|_| Error::InvalidLength())?,
        })
    }

    /// Decompose a string into a [StorePath] and a [PathBuf] containing the
    /// rest of the path, or an error.
    #[cfg(target_family = "unix")]
    pub fn from_absolute_path_full(s: &str) -> Result<(StorePath, PathBuf), Error> {
        // strip [STORE_DIR_WITH_SLASH] from s
        match s.strip_prefix(STORE_DIR_WITH_SLASH) {
            None => Err(Error::MissingStoreDir()),
            Some(rest) => {
                // put rest in a PathBuf
                let mut p = PathBuf::new();
                p.push(rest);

                let mut it = p.components();

                // The first component of the rest must be parse-able as a [StorePath]
                if let Some(first_component) = it.next() {
                    // convert first component to StorePath
                    let first_component_bytes = first_component.as_os_str().to_owned().into_vec();
                    let store_path = StorePath::from_bytes(&first_component_bytes)?;
                    // collect rest
                    let rest_buf: PathBuf = it.collect();
                    Ok((store_path, rest_buf))
                } else {
                    Err(Error::InvalidLength()) // Well, or missing "/"?
                }
            }
        }
    }

    /// Converts the [StorePath] to an absolute store path string.
    /// That is just the string representation, prefixed with the store prefix
    /// ([STORE_DIR_WITH_SLASH]),
    pub fn to_absolute_path(&self) -> String {
        format!("{}{}", STORE_DIR_WITH_SLASH, self)
    }
}

/// The directory a Nix store is mounted at, e.g. `/nix/store`.
///
/// This is not always [STORE_DIR]: callers can point the whole engine at an
/// alternate store directory (as real Nix does with `--store`), and the
/// chosen directory is folded into every content-addressed fingerprint it
/// computes. Because of that, it has to be passed explicitly wherever a
/// fingerprint is built, rather than assumed to be a single process-wide
/// constant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreDir(String);

impl Default for StoreDir {
    fn default() -> Self {
        Self(STORE_DIR.to_string())
    }
}

impl fmt::Display for StoreDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoreDir {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_suffix('/').unwrap_or(s);
        if !s.starts_with('/') || s.len() < 2 {
            return Err(Error::MissingStoreDir());
        }
        Ok(Self(s.to_string()))
    }
}

impl StoreDir {
    /// The configured store directory, without a trailing slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Construct a [StorePath] from an absolute store path string, stripping
    /// this [StoreDir]'s prefix.
    pub fn from_absolute_path(&self, s: &[u8]) -> Result<StorePath, Error> {
        match s.strip_prefix(self.0.as_bytes()).and_then(|s| s.strip_prefix(b"/")) {
            Some(s_stripped) => StorePath::from_bytes(s_stripped),
            None => Err(Error::MissingStoreDir()),
        }
    }

    /// Construct a [StorePathRef] from an absolute store path string,
    /// stripping this [StoreDir]'s prefix.
    pub fn from_absolute_path_ref<'a>(&self, s: &'a [u8]) -> Result<StorePathRef<'a>, Error> {
        match s.strip_prefix(self.0.as_bytes()).and_then(|s| s.strip_prefix(b"/")) {
            Some(s_stripped) => StorePathRef::from_bytes(s_stripped),
            None => Err(Error::MissingStoreDir()),
        }
    }

    /// Render a [StorePath] as an absolute path string inside this
    /// [StoreDir].
    pub fn to_absolute_path(&self, store_path: &StorePath) -> String {
        format!("{}/{}", self.0, store_path)
    }
}

/// Borrowed variant of [StorePath]. The digest is cheap to copy so it's kept
/// by value; the name borrows from the input instead of being reallocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StorePathRef<'a> {
    digest: [u8; DIGEST_SIZE],
    name: &'a str,
}

impl<'a> StorePathRef<'a> {
    pub fn digest(&self) -> &[u8; DIGEST_SIZE] {
        &self.digest
    }

    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Construct a [StorePathRef] by passing the `$digest-$name` string
    /// that comes after [STORE_DIR_WITH_SLASH].
    pub fn from_bytes(s: &'a [u8]) -> Result<Self, Error> {
        if s.len() < ENCODED_DIGEST_SIZE + 2 {
            Err(Error::InvalidLength())?
        }

        let digest = match nixbase32::decode(&s[..ENCODED_DIGEST_SIZE]) {
            Ok(decoded) => decoded,
            Err(decoder_error) => return Err(Error::InvalidHashEncoding(decoder_error)),
        };

        if s[ENCODED_DIGEST_SIZE] != b'-' {
            return Err(Error::MissingDash());
        }

        validate_name(&s[ENCODED_DIGEST_SIZE + 1..])?;
        let name = std::str::from_utf8(&s[ENCODED_DIGEST_SIZE + 1..])
            .expect("validate_name ensures this is ASCII");

        Ok(Self {
            digest: digest.try_into().expect("size is known"),
            name,
        })
    }

    /// Construct a [StorePathRef] from an absolute store path string.
    pub fn from_absolute_path(s: &'a [u8]) -> Result<Self, Error> {
        match s.strip_prefix(STORE_DIR_WITH_SLASH.as_bytes()) {
            Some(s_stripped) => Self::from_bytes(s_stripped),
            None => Err(Error::MissingStoreDir()),
        }
    }

    pub fn to_absolute_path(&self) -> String {
        format!("{}{}", STORE_DIR_WITH_SLASH, self)
    }

    pub fn to_owned(&self) -> StorePath {
        StorePath {
            digest: self.digest,
            name: self.name.to_string(),
        }
    }
}

impl PartialOrd for StorePathRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorePathRef<'_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.digest.cmp(&other.digest)
    }
}

impl fmt::Display for StorePathRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", nixbase32::encode(&self.digest), self.name)
    }
}

impl<'a> From<&'a StorePath> for StorePathRef<'a> {
    fn from(sp: &'a StorePath) -> Self {
        Self {
            digest: sp.digest,
            name: &sp.name,
        }
    }
}

/// Checks a given &[u8] to match the restrictions for [StorePath::name], and
/// returns the name as string if successful.
pub(crate) fn validate_name(s: &[u8]) -> Result<String, Error> {
    // Empty names are not allowed.
    if s.is_empty() {
        return Err(Error::InvalidLength());
    }

    for (i, c) in s.iter().enumerate() {
        if c.is_ascii_alphanumeric()
            || (*c == b'.' && i != 0) // can't start with a dot
            || *c == b'-'
            || *c == b'_'
            || *c == b'+'
            || *c == b'?'
            || *c == b'='
        {
            continue;
        }

        return Err(Error::InvalidName(s.to_vec(), i));
    }

    Ok(String::from_utf8(s.to_vec()).unwrap())
}

/// Ensures the StorePath fulfils the requirements for store paths.
/// Useful when populating the struct manually instead of parsing.
pub fn validate(s: &StorePath) -> Result<(), Error> {
    validate_name(s.name.as_bytes())?;

    Ok(())
}

impl fmt::Display for StorePath {
    /// The string representation of a store path starts with a digest (20
    /// bytes), [crate::nixbase32]-encoded, followed by a `-`,
    /// and ends with the name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", nixbase32::encode(&self.digest), self.name)
    }
}
