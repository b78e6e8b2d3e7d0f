//! The persistent source-import cache (§4.7): a small SQLite schema that lets
//! [`crate::import::import_path`] skip re-walking and re-hashing a source
//! tree whose on-disk metadata stamps haven't changed since the last import.
//!
//! The cache is authoritative only as a *negative* filter. A hit is only
//! reused if every recorded stamp matches the current walk exactly and the
//! referenced store path still exists on disk; any mismatch falls back to a
//! full import. Correctness never depends on the cache: even a stamp
//! collision just costs an unnecessary re-import, it can't produce a wrong
//! store path, because the store path is still derived from the freshly
//! computed content hash.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CacheError;
use crate::stamp::Stamp;

pub struct Cache {
    conn: Connection,
}

/// A cache row naming a previously imported store object.
#[derive(Debug, Clone)]
pub struct ObjectRow {
    pub store_path: String,
    pub nar_size: u64,
    pub nar_hash: String,
    pub ca: Option<String>,
    pub references: Vec<String>,
}

impl Cache {
    /// Opens (and, if necessary, initializes) the cache database at `path`.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Opens an in-memory cache, primarily for tests.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS objects (
                store_path TEXT PRIMARY KEY,
                nar_size INTEGER NOT NULL,
                nar_hash TEXT NOT NULL,
                ca TEXT,
                references_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS source_mappings (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                source_path TEXT NOT NULL,
                store_path TEXT NOT NULL REFERENCES objects(store_path)
            );
            CREATE INDEX IF NOT EXISTS source_mappings_name ON source_mappings(name);
            CREATE INDEX IF NOT EXISTS source_mappings_source_path ON source_mappings(source_path);
            CREATE TABLE IF NOT EXISTS source_mapping_stamps (
                mapping_id INTEGER NOT NULL REFERENCES source_mappings(id),
                path TEXT NOT NULL,
                stamp TEXT NOT NULL,
                mode INTEGER NOT NULL,
                size INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS source_mapping_stamps_mapping
                ON source_mapping_stamps(mapping_id);
            ",
        )?;
        Ok(())
    }

    /// Looks up a previously recorded store path for `name` whose stamps
    /// exactly match `current_stamps`. Mappings whose store path no longer
    /// exists on disk are opportunistically dropped along the way (§4.7:
    /// "stale mappings whose store paths no longer exist on disk are also
    /// removed").
    #[tracing::instrument(skip(self, current_stamps), fields(name))]
    pub fn lookup(
        &mut self,
        name: &str,
        current_stamps: &[(PathBuf, Stamp)],
    ) -> Result<Option<String>, CacheError> {
        let current: BTreeSet<(String, String)> = current_stamps
            .iter()
            .map(|(p, s)| (p.to_string_lossy().into_owned(), s.fingerprint.clone()))
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT id, store_path FROM source_mappings WHERE name = ?1")?;
        let candidates: Vec<(i64, String)> = stmt
            .query_map(params![name], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, rusqlite::Error>>()?;
        drop(stmt);

        for (mapping_id, store_path) in candidates {
            if !Path::new(&store_path).exists() {
                self.delete_mapping(mapping_id)?;
                continue;
            }

            let mut stmt = self
                .conn
                .prepare("SELECT path, stamp FROM source_mapping_stamps WHERE mapping_id = ?1")?;
            let recorded: BTreeSet<(String, String)> = stmt
                .query_map(params![mapping_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<_, rusqlite::Error>>()?;

            if recorded == current {
                return Ok(Some(store_path));
            }
        }

        Ok(None)
    }

    fn delete_mapping(&self, mapping_id: i64) -> Result<(), CacheError> {
        self.conn.execute(
            "DELETE FROM source_mapping_stamps WHERE mapping_id = ?1",
            params![mapping_id],
        )?;
        self.conn.execute(
            "DELETE FROM source_mappings WHERE id = ?1",
            params![mapping_id],
        )?;
        Ok(())
    }

    /// Records a successful import in one `BEGIN IMMEDIATE` transaction
    /// (§4.5 step 9, §4.7): upserts the `objects` row, drops the previous
    /// mapping row for this exact `source_path` (it's now stale since this
    /// import superseded it), and inserts a fresh mapping with its stamps.
    ///
    /// Invalidation is scoped to `source_path`, not `name`: two unrelated
    /// source trees that happen to share a basename (e.g. `./vendor/foo` and
    /// `./src/foo`, both named `"foo"`) must not invalidate each other's
    /// mapping just because one of them got re-imported.
    #[tracing::instrument(skip(self, stamps), fields(name, source_path, store_path))]
    pub fn record_import(
        &mut self,
        name: &str,
        source_path: &str,
        store_path: &str,
        nar_size: u64,
        nar_hash: &str,
        ca: Option<&str>,
        references: &[String],
        stamps: &[(PathBuf, Stamp)],
    ) -> Result<(), CacheError> {
        let tx = self.conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let references_json = serde_json::to_string(references).unwrap_or_else(|_| "[]".into());
        tx.execute(
            "INSERT INTO objects (store_path, nar_size, nar_hash, ca, references_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(store_path) DO UPDATE SET
                nar_size = excluded.nar_size,
                nar_hash = excluded.nar_hash,
                ca = excluded.ca,
                references_json = excluded.references_json",
            params![store_path, nar_size as i64, nar_hash, ca, references_json],
        )?;

        let stale_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM source_mappings WHERE source_path = ?1")?;
            stmt.query_map(params![source_path], |row| row.get(0))?
                .collect::<Result<_, rusqlite::Error>>()?
        };
        for id in stale_ids {
            tx.execute(
                "DELETE FROM source_mapping_stamps WHERE mapping_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM source_mappings WHERE id = ?1", params![id])?;
        }

        tx.execute(
            "INSERT INTO source_mappings (name, source_path, store_path) VALUES (?1, ?2, ?3)",
            params![name, source_path, store_path],
        )?;
        let mapping_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO source_mapping_stamps (mapping_id, path, stamp, mode, size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (path, stamp) in stamps {
                stmt.execute(params![
                    mapping_id,
                    path.to_string_lossy(),
                    stamp.fingerprint,
                    stamp.mode,
                    stamp.size,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Records an `objects` row for a store object that has no filesystem
    /// source of its own (e.g. a `toFile` literal) — no `source_mappings`
    /// row is involved, since there's no source path to key one on.
    pub fn record_object(
        &mut self,
        store_path: &str,
        nar_size: u64,
        nar_hash: &str,
        ca: Option<&str>,
        references: &[String],
    ) -> Result<(), CacheError> {
        let references_json = serde_json::to_string(references).unwrap_or_else(|_| "[]".into());
        self.conn.execute(
            "INSERT INTO objects (store_path, nar_size, nar_hash, ca, references_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(store_path) DO NOTHING",
            params![store_path, nar_size as i64, nar_hash, ca, references_json],
        )?;
        Ok(())
    }

    /// Fetches the recorded object row for a store path, if any.
    pub fn get_object(&self, store_path: &str) -> Result<Option<ObjectRow>, CacheError> {
        self.conn
            .query_row(
                "SELECT store_path, nar_size, nar_hash, ca, references_json FROM objects WHERE store_path = ?1",
                params![store_path],
                |row| {
                    let references_json: String = row.get(4)?;
                    let references: Vec<String> =
                        serde_json::from_str(&references_json).unwrap_or_default();
                    Ok(ObjectRow {
                        store_path: row.get(0)?,
                        nar_size: row.get::<_, i64>(1)? as u64,
                        nar_hash: row.get(2)?,
                        ca: row.get(3)?,
                        references,
                    })
                },
            )
            .optional()
            .map_err(CacheError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::EntryKind;

    fn stamp(fingerprint: &str) -> Stamp {
        Stamp {
            kind: EntryKind::Regular,
            mode: 0o644,
            size: 5,
            fingerprint: fingerprint.to_string(),
        }
    }

    #[test]
    fn miss_on_empty_cache() {
        let mut cache = Cache::open_in_memory().unwrap();
        let stamps = vec![(PathBuf::from("/src/a"), stamp("s1"))];
        assert_eq!(cache.lookup("a", &stamps).unwrap(), None);
    }

    #[test]
    fn hit_after_record_import() {
        let mut cache = Cache::open_in_memory().unwrap();
        let stamps = vec![(PathBuf::from("/src/a"), stamp("s1"))];

        cache
            .record_import(
                "a",
                "/src/a",
                "/nix/store/xxx-a",
                128,
                "deadbeef",
                None,
                &[],
                &stamps,
            )
            .unwrap();

        // store path doesn't actually exist on disk, so this is still a miss
        // (the cache correctly refuses to trust a vanished object).
        assert_eq!(cache.lookup("a", &stamps).unwrap(), None);
    }

    #[test]
    fn hit_when_store_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("xxx-a");
        std::fs::write(&store_path, b"hi").unwrap();

        let mut cache = Cache::open_in_memory().unwrap();
        let stamps = vec![(PathBuf::from("/src/a"), stamp("s1"))];
        cache
            .record_import(
                "a",
                "/src/a",
                store_path.to_str().unwrap(),
                128,
                "deadbeef",
                None,
                &[],
                &stamps,
            )
            .unwrap();

        assert_eq!(
            cache.lookup("a", &stamps).unwrap(),
            Some(store_path.to_str().unwrap().to_string())
        );
    }

    #[test]
    fn miss_on_stamp_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("xxx-a");
        std::fs::write(&store_path, b"hi").unwrap();

        let mut cache = Cache::open_in_memory().unwrap();
        let stamps = vec![(PathBuf::from("/src/a"), stamp("s1"))];
        cache
            .record_import(
                "a",
                "/src/a",
                store_path.to_str().unwrap(),
                128,
                "deadbeef",
                None,
                &[],
                &stamps,
            )
            .unwrap();

        let changed_stamps = vec![(PathBuf::from("/src/a"), stamp("s2"))];
        assert_eq!(cache.lookup("a", &changed_stamps).unwrap(), None);
    }

    #[test]
    fn record_import_replaces_stale_mapping_for_same_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let store_path_1 = dir.path().join("xxx-a");
        let store_path_2 = dir.path().join("yyy-a");
        std::fs::write(&store_path_1, b"old").unwrap();
        std::fs::write(&store_path_2, b"new").unwrap();

        let mut cache = Cache::open_in_memory().unwrap();
        let old_stamps = vec![(PathBuf::from("/src/a"), stamp("s1"))];
        cache
            .record_import(
                "a",
                "/src/a",
                store_path_1.to_str().unwrap(),
                1,
                "h1",
                None,
                &[],
                &old_stamps,
            )
            .unwrap();

        let new_stamps = vec![(PathBuf::from("/src/a"), stamp("s2"))];
        cache
            .record_import(
                "a",
                "/src/a",
                store_path_2.to_str().unwrap(),
                1,
                "h2",
                None,
                &[],
                &new_stamps,
            )
            .unwrap();

        // the old mapping is gone; only the new one is reachable
        assert_eq!(cache.lookup("a", &old_stamps).unwrap(), None);
        assert_eq!(
            cache.lookup("a", &new_stamps).unwrap(),
            Some(store_path_2.to_str().unwrap().to_string())
        );
    }

    #[test]
    fn record_import_does_not_invalidate_unrelated_source_with_same_name() {
        // two unrelated source trees (e.g. "./vendor/foo" and "./src/foo")
        // both default to the basename "foo"; re-importing one must not
        // invalidate the other's still-valid mapping.
        let dir = tempfile::tempdir().unwrap();
        let store_path_vendor = dir.path().join("xxx-foo");
        let store_path_src_old = dir.path().join("yyy-foo");
        let store_path_src_new = dir.path().join("zzz-foo");
        std::fs::write(&store_path_vendor, b"vendor").unwrap();
        std::fs::write(&store_path_src_old, b"src-old").unwrap();
        std::fs::write(&store_path_src_new, b"src-new").unwrap();

        let mut cache = Cache::open_in_memory().unwrap();

        let vendor_stamps = vec![(PathBuf::from("/proj/vendor/foo"), stamp("v1"))];
        cache
            .record_import(
                "foo",
                "/proj/vendor/foo",
                store_path_vendor.to_str().unwrap(),
                1,
                "hv",
                None,
                &[],
                &vendor_stamps,
            )
            .unwrap();

        let src_old_stamps = vec![(PathBuf::from("/proj/src/foo"), stamp("s1"))];
        cache
            .record_import(
                "foo",
                "/proj/src/foo",
                store_path_src_old.to_str().unwrap(),
                1,
                "hs1",
                None,
                &[],
                &src_old_stamps,
            )
            .unwrap();

        // re-import "./src/foo" with changed contents
        let src_new_stamps = vec![(PathBuf::from("/proj/src/foo"), stamp("s2"))];
        cache
            .record_import(
                "foo",
                "/proj/src/foo",
                store_path_src_new.to_str().unwrap(),
                1,
                "hs2",
                None,
                &[],
                &src_new_stamps,
            )
            .unwrap();

        // the unrelated "vendor/foo" mapping must still be intact
        assert_eq!(
            cache.lookup("foo", &vendor_stamps).unwrap(),
            Some(store_path_vendor.to_str().unwrap().to_string())
        );
        // "src/foo"'s old mapping is gone; only the new one is reachable
        assert_eq!(cache.lookup("foo", &src_old_stamps).unwrap(), None);
        assert_eq!(
            cache.lookup("foo", &src_new_stamps).unwrap(),
            Some(store_path_src_new.to_str().unwrap().to_string())
        );
    }
}
