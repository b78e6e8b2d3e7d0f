//! Cheap per-entry fingerprints of on-disk filesystem metadata, used only to
//! short-circuit an unnecessary NAR re-import. A stamp is not a content hash:
//! two equal stamps are a hint, not a proof, that the entry is unchanged.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

/// The byte-exact mode classifier recorded alongside a stamp, mirroring the
/// three NAR node kinds (§4.1): a stamp alone doesn't distinguish a regular
/// file from an executable one, so callers needing that also consult `mode`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    Regular,
    Executable,
    Directory,
    Symlink,
}

/// `(mode, size, stamp)` recorded for one filesystem entry during a walk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Stamp {
    pub kind: EntryKind,
    /// Full file-mode bits, as returned by `stat(2)`.
    pub mode: u32,
    /// Regular-file size in bytes; `-1` (sentinel) for everything else.
    pub size: i64,
    /// The fixed-format fingerprint string itself.
    pub fingerprint: String,
}

impl Stamp {
    /// Computes the stamp for a symlink target, without dereferencing it.
    pub fn for_symlink(target: &std::path::Path) -> Stamp {
        Stamp {
            kind: EntryKind::Symlink,
            mode: 0,
            size: -1,
            fingerprint: format!("link:{}", target.to_string_lossy()),
        }
    }

    /// Computes the stamp for a directory. Directory mtimes are too noisy to
    /// cache (e.g. touched by concurrent unrelated writes into the same
    /// parent), so the fingerprint is the literal string `"dir"`.
    pub fn for_directory(meta: &Metadata) -> Stamp {
        Stamp {
            kind: EntryKind::Directory,
            mode: meta.mode(),
            size: -1,
            fingerprint: "dir".to_string(),
        }
    }

    /// Computes the stamp for a regular (or executable) file from its
    /// metadata: `"<sec>.<usec>-<size>-<inode>-<mode>-<uid>-<gid>"`, with
    /// `usec` zero-padded to six digits.
    pub fn for_file(meta: &Metadata, executable: bool) -> Stamp {
        let mtime_sec = meta.mtime();
        // `mtime_nsec` is always in [0, 1_000_000_000); truncate to
        // microseconds as the spec's stamp format demands.
        let mtime_usec = meta.mtime_nsec() / 1000;
        let size = meta.size() as i64;

        Stamp {
            kind: if executable {
                EntryKind::Executable
            } else {
                EntryKind::Regular
            },
            mode: meta.mode(),
            size,
            fingerprint: format!(
                "{}.{:06}-{}-{}-{}-{}-{}",
                mtime_sec,
                mtime_usec,
                size,
                meta.ino(),
                meta.mode(),
                meta.uid(),
                meta.gid(),
            ),
        }
    }
}
