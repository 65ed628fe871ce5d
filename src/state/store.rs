use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::data::{
    CaptureDate, FileMetadata, FileSignature, SizeBounds, StoreCounts, ThumbnailMetadata,
};
use crate::cache::key::CacheKey;
use crate::error::Result;
use crate::scan::has_supported_extension;

/// Current schema version, stored in `PRAGMA user_version`
const SCHEMA_VERSION: i32 = 2;

/// The MetadataStore manages the SQLite cache database.
/// It stores thumbnail dimensions, per-file capture dates and dimensions,
/// and cached directory listings.
///
/// Every call goes through one mutex-guarded connection, so callers never
/// observe a partial write. Calls block the calling thread; run them from
/// worker tasks, never from the thread that owns the in-memory cache.
pub struct MetadataStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open (or create) the database at `db_path` and migrate it.
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        info!(path = %db_path.display(), "📁 metadata store opened");

        let mut store = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
        };
        store.migrate()?;

        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open the store, or log and return `None` so caching degrades to a
    /// pass-through instead of failing.
    pub fn open_or_disable(db_path: &Path) -> Option<Arc<Self>> {
        match Self::open(db_path) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(path = %db_path.display(), error = %e, "metadata store unavailable, caching disabled");
                None
            }
        }
    }

    /// Get the path to the database file (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the schema up to `SCHEMA_VERSION`.
    /// Each step runs once, in order, inside a single transaction.
    fn migrate(&mut self) -> Result<()> {
        let conn = self
            .conn
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);

        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            warn!(version, supported = SCHEMA_VERSION, "metadata store was written by a newer version");
            return Ok(());
        }
        if version == SCHEMA_VERSION {
            return Ok(());
        }

        let tx = conn.transaction()?;

        if version < 1 {
            // Thumbnail metadata, keyed by content fingerprint
            tx.execute(
                "CREATE TABLE IF NOT EXISTS thumbnails (
                    cache_key       TEXT PRIMARY KEY,
                    width           INTEGER NOT NULL,
                    height          INTEGER NOT NULL,
                    aspect          REAL NOT NULL,
                    source_path     TEXT NOT NULL,
                    source_mtime    REAL NOT NULL,
                    updated_at      INTEGER NOT NULL
                )",
                [],
            )?;

            // Per-file capture date and pixel dimensions
            tx.execute(
                "CREATE TABLE IF NOT EXISTS file_metadata (
                    path            TEXT PRIMARY KEY,
                    mtime           REAL NOT NULL DEFAULT 0,
                    file_size       INTEGER NOT NULL DEFAULT 0,
                    capture_date    INTEGER,
                    capture_checked INTEGER NOT NULL DEFAULT 0,
                    pixel_width     INTEGER,
                    pixel_height    INTEGER,
                    updated_at      INTEGER NOT NULL
                )",
                [],
            )?;
        }

        if version < 2 {
            // Cached directory listings, scanned by path prefix
            tx.execute(
                "CREATE TABLE IF NOT EXISTS directory_entries (
                    path            TEXT PRIMARY KEY,
                    updated_at      INTEGER NOT NULL
                )",
                [],
            )?;
        }

        tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        tx.commit()?;

        info!(from = version, to = SCHEMA_VERSION, "✅ metadata schema migrated");
        Ok(())
    }

    // ========== Thumbnails ==========

    /// Insert or replace the metadata row for `key`.
    /// Failures are logged; the row either fully applies or not at all.
    pub fn upsert_thumbnail(
        &self,
        key: &CacheKey,
        source_path: &Path,
        source_mtime: f64,
        width: u32,
        height: u32,
        aspect: f32,
    ) {
        let result = self.conn().execute(
            "INSERT OR REPLACE INTO thumbnails
                (cache_key, width, height, aspect, source_path, source_mtime, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.as_str(),
                width as i64,
                height as i64,
                aspect as f64,
                source_path.to_string_lossy(),
                source_mtime,
                Utc::now().timestamp(),
            ],
        );

        if let Err(e) = result {
            warn!(key = %key, error = %e, "failed to record thumbnail metadata");
        }
    }

    /// Look up the metadata for `key`
    pub fn thumbnail(&self, key: &CacheKey) -> Option<ThumbnailMetadata> {
        let result = self
            .conn()
            .query_row(
                "SELECT cache_key, width, height, aspect, source_path, source_mtime, updated_at
                 FROM thumbnails WHERE cache_key = ?1",
                [key.as_str()],
                |row| {
                    Ok(ThumbnailMetadata {
                        cache_key: row.get(0)?,
                        width: row.get::<_, i64>(1)? as u32,
                        height: row.get::<_, i64>(2)? as u32,
                        aspect: row.get::<_, f64>(3)? as f32,
                        source_path: row.get(4)?,
                        source_mtime: row.get(5)?,
                        updated_at: from_unix_seconds(row.get(6)?),
                    })
                },
            )
            .optional();

        result.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "thumbnail metadata lookup failed");
            None
        })
    }

    /// Delete the metadata row for `key`. Deleting a missing row is a no-op.
    pub fn remove_thumbnail(&self, key: &CacheKey) {
        if let Err(e) = self
            .conn()
            .execute("DELETE FROM thumbnails WHERE cache_key = ?1", [key.as_str()])
        {
            warn!(key = %key, error = %e, "failed to remove thumbnail metadata");
        }
    }

    /// Every known cache key. Used by the orphan sweep, so errors propagate
    /// instead of reading as an empty set.
    pub fn all_thumbnail_keys(&self) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT cache_key FROM thumbnails")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(keys)
    }

    // ========== File metadata ==========

    /// Cached capture date for `path`, valid only if the stored signature
    /// matches `(mtime, file_size)` and the file was checked.
    ///
    /// Returns `None` for never-checked or stale rows.
    pub fn cached_file_metadata(&self, path: &Path, mtime: f64, file_size: u64) -> Option<CaptureDate> {
        let row = self.file_metadata(path)?;

        if !row.capture_checked || row.mtime != mtime || row.file_size != file_size {
            return None;
        }

        Some(match row.capture_date {
            Some(date) => CaptureDate::Date(date),
            None => CaptureDate::Missing,
        })
    }

    /// Record a capture-date check. A `None` date is a valid negative result.
    /// Cached dimensions for the path are kept.
    pub fn upsert_file_metadata(
        &self,
        path: &Path,
        mtime: f64,
        file_size: u64,
        capture_date: Option<DateTime<Utc>>,
    ) {
        let result = self.conn().execute(
            "INSERT INTO file_metadata (path, mtime, file_size, capture_date, capture_checked, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(path) DO UPDATE SET
                mtime = excluded.mtime,
                file_size = excluded.file_size,
                capture_date = excluded.capture_date,
                capture_checked = 1,
                updated_at = excluded.updated_at",
            params![
                path.to_string_lossy(),
                mtime,
                file_size as i64,
                capture_date.map(|d| d.timestamp_millis()),
                Utc::now().timestamp(),
            ],
        );

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to record file metadata");
        }
    }

    /// Full row for `path`, if any
    pub fn file_metadata(&self, path: &Path) -> Option<FileMetadata> {
        let result = self
            .conn()
            .query_row(
                "SELECT path, mtime, file_size, capture_date, capture_checked,
                        pixel_width, pixel_height, updated_at
                 FROM file_metadata WHERE path = ?1",
                [path.to_string_lossy()],
                |row| {
                    Ok(FileMetadata {
                        path: row.get(0)?,
                        mtime: row.get(1)?,
                        file_size: row.get::<_, i64>(2)? as u64,
                        capture_date: row
                            .get::<_, Option<i64>>(3)?
                            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                        capture_checked: row.get(4)?,
                        pixel_width: row.get::<_, Option<i64>>(5)?.map(|w| w as u32),
                        pixel_height: row.get::<_, Option<i64>>(6)?.map(|h| h as u32),
                        updated_at: from_unix_seconds(row.get(7)?),
                    })
                },
            )
            .optional();

        result.unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "file metadata lookup failed");
            None
        })
    }

    /// Cached pixel dimensions for `path`. No signature check.
    pub fn cached_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        let row = self.file_metadata(path)?;
        Some((row.pixel_width?, row.pixel_height?))
    }

    /// Record pixel dimensions, keeping any capture-date state
    pub fn upsert_dimensions(&self, path: &Path, width: u32, height: u32) {
        let result = self.conn().execute(
            "INSERT INTO file_metadata (path, pixel_width, pixel_height, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                pixel_width = excluded.pixel_width,
                pixel_height = excluded.pixel_height,
                updated_at = excluded.updated_at",
            params![
                path.to_string_lossy(),
                width as i64,
                height as i64,
                Utc::now().timestamp(),
            ],
        );

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to record dimensions");
        }
    }

    /// Capture date for `path`, reading it with `read` only when the cache
    /// has no valid answer. Negative results are cached too.
    pub fn capture_date_or_else<F>(
        &self,
        path: &Path,
        signature: FileSignature,
        read: F,
    ) -> Option<DateTime<Utc>>
    where
        F: FnOnce(&Path) -> Option<DateTime<Utc>>,
    {
        if let Some(cached) = self.cached_file_metadata(path, signature.mtime, signature.size) {
            return cached.date();
        }

        let date = read(path);
        self.upsert_file_metadata(path, signature.mtime, signature.size, date);
        date
    }

    /// Pixel dimensions for `path`, probing and back-filling on a miss
    pub fn dimensions_or_probe<F>(&self, path: &Path, probe: F) -> Option<(u32, u32)>
    where
        F: FnOnce(&Path) -> Option<(u32, u32)>,
    {
        if let Some(dims) = self.cached_dimensions(path) {
            return Some(dims);
        }

        let (width, height) = probe(path)?;
        self.upsert_dimensions(path, width, height);
        Some((width, height))
    }

    // ========== Directory listings ==========

    /// Every stored entry under `dir_path`, filtered by extension and,
    /// when `bounds` is given, by cached dimensions. Entries whose
    /// dimensions are unknown pass through.
    ///
    /// An empty `extensions` slice accepts every extension.
    pub fn cached_directory_entries(
        &self,
        dir_path: &Path,
        extensions: &[String],
        bounds: Option<SizeBounds>,
    ) -> Vec<PathBuf> {
        let (lower, upper) = prefix_range(dir_path);

        let rows = (|| -> rusqlite::Result<Vec<(String, Option<i64>, Option<i64>)>> {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT d.path, f.pixel_width, f.pixel_height
                 FROM directory_entries d
                 LEFT JOIN file_metadata f ON f.path = d.path
                 WHERE d.path >= ?1 AND d.path < ?2
                 ORDER BY d.path",
            )?;
            let rows = stmt
                .query_map([&lower, &upper], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect();
            rows
        })();

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(dir = %dir_path.display(), error = %e, "directory listing lookup failed");
                return Vec::new();
            }
        };

        rows.into_iter()
            .filter(|(path, _, _)| has_supported_extension(Path::new(path), extensions))
            .filter(|(_, width, height)| match (bounds, width, height) {
                (Some(bounds), Some(w), Some(h)) => bounds.contains(*w as u32, *h as u32),
                _ => true,
            })
            .map(|(path, _, _)| PathBuf::from(path))
            .collect()
    }

    /// Replace the stored listing under `dir_path` with `paths`.
    ///
    /// Runs in one transaction: either the whole new listing lands or the
    /// previous one is left untouched. Paths outside `dir_path` are skipped.
    pub fn replace_directory_entries(&self, dir_path: &Path, paths: &[PathBuf]) -> Result<()> {
        let (lower, upper) = prefix_range(dir_path);
        let now = Utc::now().timestamp();

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM directory_entries WHERE path >= ?1 AND path < ?2",
            [&lower, &upper],
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO directory_entries (path, updated_at) VALUES (?1, ?2)",
            )?;
            for path in paths {
                let path = path.to_string_lossy().into_owned();
                if path < lower || path >= upper {
                    debug!(path = %path, dir = %dir_path.display(), "skipping entry outside directory");
                    continue;
                }
                insert.execute(params![path, now])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Row counts per table
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn();
        let count = |table: &str| -> rusqlite::Result<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
        };

        Ok(StoreCounts {
            thumbnails: count("thumbnails")?,
            files: count("file_metadata")?,
            directory_entries: count("directory_entries")?,
        })
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

/// Half-open key range `[dir/, dir0)` covering everything below `dir`.
/// `'0'` is the first ASCII character after `'/'`.
fn prefix_range(dir_path: &Path) -> (String, String) {
    let dir = dir_path.to_string_lossy();
    let dir = dir.trim_end_matches('/');
    (format!("{dir}/"), format!("{dir}0"))
}

fn from_unix_seconds(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(path: &str, mtime: f64) -> CacheKey {
        CacheKey::new(Path::new(path), mtime)
    }

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_upsert_thumbnail_overwrites() {
        let store = MetadataStore::open_in_memory().unwrap();
        let k = key("/photos/a.jpg", 1000.0);

        store.upsert_thumbnail(&k, Path::new("/photos/a.jpg"), 1000.0, 256, 171, 1.497);
        store.upsert_thumbnail(&k, Path::new("/photos/a.jpg"), 1000.0, 171, 256, 0.668);

        let meta = store.thumbnail(&k).unwrap();
        assert_eq!((meta.width, meta.height), (171, 256));
        assert!((meta.aspect - 0.668).abs() < 1e-6);
        assert_eq!(store.all_thumbnail_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_thumbnail_is_idempotent() {
        let store = MetadataStore::open_in_memory().unwrap();
        let k = key("/photos/a.jpg", 1000.0);

        store.upsert_thumbnail(&k, Path::new("/photos/a.jpg"), 1000.0, 10, 10, 1.0);
        store.remove_thumbnail(&k);
        store.remove_thumbnail(&k);

        assert!(store.thumbnail(&k).is_none());
        assert!(store.all_thumbnail_keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_metadata_signature_invalidation() {
        let store = MetadataStore::open_in_memory().unwrap();
        let path = Path::new("/photos/a.nef");
        let date = Utc.with_ymd_and_hms(2024, 1, 23, 9, 30, 0).unwrap();

        // Never checked
        assert_eq!(store.cached_file_metadata(path, 1000.0, 5000), None);

        store.upsert_file_metadata(path, 1000.0, 5000, Some(date));
        assert_eq!(
            store.cached_file_metadata(path, 1000.0, 5000),
            Some(CaptureDate::Date(date))
        );

        // Changed mtime, same size
        assert_eq!(store.cached_file_metadata(path, 2000.0, 5000), None);
        // Same mtime, changed size
        assert_eq!(store.cached_file_metadata(path, 1000.0, 5001), None);
    }

    #[test]
    fn test_negative_capture_result_is_cached() {
        let store = MetadataStore::open_in_memory().unwrap();
        let path = Path::new("/photos/scan.png");

        store.upsert_file_metadata(path, 1000.0, 42, None);
        assert_eq!(
            store.cached_file_metadata(path, 1000.0, 42),
            Some(CaptureDate::Missing)
        );

        let mut reads = 0;
        let sig = FileSignature { mtime: 1000.0, size: 42 };
        let date = store.capture_date_or_else(path, sig, |_| {
            reads += 1;
            None
        });
        assert_eq!(date, None);
        assert_eq!(reads, 0);
    }

    #[test]
    fn test_capture_date_read_through() {
        let store = MetadataStore::open_in_memory().unwrap();
        let path = Path::new("/photos/a.cr2");
        let date = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let sig = FileSignature { mtime: 5.5, size: 10 };

        let mut reads = 0;
        for _ in 0..3 {
            let got = store.capture_date_or_else(path, sig, |_| {
                reads += 1;
                Some(date)
            });
            assert_eq!(got, Some(date));
        }
        assert_eq!(reads, 1);
    }

    #[test]
    fn test_dimensions_and_capture_state_coexist() {
        let store = MetadataStore::open_in_memory().unwrap();
        let path = Path::new("/photos/a.jpg");

        store.upsert_dimensions(path, 6000, 4000);
        // A dimensions-only row is not a checked capture date
        assert_eq!(store.cached_file_metadata(path, 0.0, 0), None);

        store.upsert_file_metadata(path, 7.0, 99, None);
        assert_eq!(store.cached_dimensions(path), Some((6000, 4000)));

        store.upsert_dimensions(path, 4000, 6000);
        assert_eq!(store.cached_file_metadata(path, 7.0, 99), Some(CaptureDate::Missing));
        assert_eq!(store.cached_dimensions(path), Some((4000, 6000)));
    }

    #[test]
    fn test_dimensions_or_probe_backfills() {
        let store = MetadataStore::open_in_memory().unwrap();
        let path = Path::new("/photos/b.jpg");

        assert_eq!(store.dimensions_or_probe(path, |_| None), None);
        assert_eq!(store.dimensions_or_probe(path, |_| Some((30, 20))), Some((30, 20)));
        assert_eq!(store.dimensions_or_probe(path, |_| panic!("cached")), Some((30, 20)));
    }

    #[test]
    fn test_prefix_scan_excludes_siblings() {
        let store = MetadataStore::open_in_memory().unwrap();
        let listing: Vec<PathBuf> = [
            "/photos/vacation/a.jpg",
            "/photos/vacation/day2/b.jpg",
            "/photos/vacation-2/c.jpg",
            "/photos/work/d.jpg",
            "/photos/e.jpg",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        store.replace_directory_entries(Path::new("/photos"), &listing).unwrap();

        let vacation = store.cached_directory_entries(Path::new("/photos/vacation"), &[], None);
        assert_eq!(
            vacation,
            vec![
                PathBuf::from("/photos/vacation/a.jpg"),
                PathBuf::from("/photos/vacation/day2/b.jpg"),
            ]
        );

        let all = store.cached_directory_entries(Path::new("/photos/"), &[], None);
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_replace_with_empty_clears_listing() {
        let store = MetadataStore::open_in_memory().unwrap();
        let dir = Path::new("/photos");

        store
            .replace_directory_entries(dir, &[PathBuf::from("/photos/a.jpg"), PathBuf::from("/photos/b.jpg")])
            .unwrap();
        store.replace_directory_entries(dir, &[]).unwrap();

        assert!(store.cached_directory_entries(dir, &[], None).is_empty());
    }

    #[test]
    fn test_replace_keeps_other_directories() {
        let store = MetadataStore::open_in_memory().unwrap();

        store
            .replace_directory_entries(Path::new("/a"), &[PathBuf::from("/a/1.jpg")])
            .unwrap();
        store
            .replace_directory_entries(Path::new("/b"), &[PathBuf::from("/b/2.jpg"), PathBuf::from("/a/stray.jpg")])
            .unwrap();

        assert_eq!(
            store.cached_directory_entries(Path::new("/a"), &[], None),
            vec![PathBuf::from("/a/1.jpg")]
        );
        assert_eq!(store.counts().unwrap().directory_entries, 2);
    }

    #[test]
    fn test_listing_filters() {
        let store = MetadataStore::open_in_memory().unwrap();
        let dir = Path::new("/shoot");
        store
            .replace_directory_entries(
                dir,
                &[
                    PathBuf::from("/shoot/big.JPG"),
                    PathBuf::from("/shoot/small.jpg"),
                    PathBuf::from("/shoot/unknown.jpg"),
                    PathBuf::from("/shoot/notes.txt"),
                ],
            )
            .unwrap();
        store.upsert_dimensions(Path::new("/shoot/big.JPG"), 6000, 4000);
        store.upsert_dimensions(Path::new("/shoot/small.jpg"), 64, 64);

        let listed = store.cached_directory_entries(dir, &exts(&["jpg"]), Some(SizeBounds::at_least(200, 200)));
        assert_eq!(
            listed,
            vec![PathBuf::from("/shoot/big.JPG"), PathBuf::from("/shoot/unknown.jpg")]
        );
    }

    #[test]
    fn test_failed_replace_keeps_previous_listing() {
        let store = MetadataStore::open_in_memory().unwrap();
        let dir = Path::new("/photos");
        let previous = vec![PathBuf::from("/photos/a.jpg"), PathBuf::from("/photos/b.jpg")];
        store.replace_directory_entries(dir, &previous).unwrap();

        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER reject_entry BEFORE INSERT ON directory_entries
                 WHEN NEW.path = '/photos/bad.jpg'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = store.replace_directory_entries(
            dir,
            &[
                PathBuf::from("/photos/c.jpg"),
                PathBuf::from("/photos/bad.jpg"),
                PathBuf::from("/photos/d.jpg"),
            ],
        );

        assert!(result.is_err());
        assert_eq!(store.cached_directory_entries(dir, &[], None), previous);
    }

    #[test]
    fn test_migrates_v1_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("metadata.sqlite");
        let k = key("/photos/a.jpg", 3.0);

        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE thumbnails (
                    cache_key TEXT PRIMARY KEY, width INTEGER NOT NULL,
                    height INTEGER NOT NULL, aspect REAL NOT NULL,
                    source_path TEXT NOT NULL, source_mtime REAL NOT NULL,
                    updated_at INTEGER NOT NULL
                 );
                 CREATE TABLE file_metadata (
                    path TEXT PRIMARY KEY, mtime REAL NOT NULL DEFAULT 0,
                    file_size INTEGER NOT NULL DEFAULT 0, capture_date INTEGER,
                    capture_checked INTEGER NOT NULL DEFAULT 0,
                    pixel_width INTEGER, pixel_height INTEGER,
                    updated_at INTEGER NOT NULL
                 );
                 PRAGMA user_version = 1;",
            )
            .unwrap();
            conn.execute(
                "INSERT INTO thumbnails VALUES (?1, 200, 100, 2.0, '/photos/a.jpg', 3.0, 0)",
                [k.as_str()],
            )
            .unwrap();
        }

        let store = MetadataStore::open(&db_path).unwrap();
        let version: i32 = store
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        // v1 rows survive, v2 table exists
        assert_eq!(store.thumbnail(&k).unwrap().width, 200);
        store
            .replace_directory_entries(Path::new("/photos"), &[PathBuf::from("/photos/a.jpg")])
            .unwrap();
        assert_eq!(store.counts().unwrap().directory_entries, 1);
    }

    #[test]
    fn test_newer_schema_is_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("metadata.sqlite");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }

        let store = MetadataStore::open(&db_path).unwrap();
        let version: i32 = store
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 99);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("metadata.sqlite");
        let k = key("/photos/a.jpg", 3.0);

        {
            let store = MetadataStore::open(&db_path).unwrap();
            store.upsert_thumbnail(&k, Path::new("/photos/a.jpg"), 3.0, 200, 100, 2.0);
        }

        let store = MetadataStore::open(&db_path).unwrap();
        assert_eq!(store.path(), Some(db_path.as_path()));
        assert_eq!(store.thumbnail(&k).unwrap().width, 200);
    }

    #[test]
    fn test_open_failure_disables_store() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the database file should be
        let db_path = temp_dir.path().join("taken");
        std::fs::create_dir_all(&db_path).unwrap();

        assert!(MetadataStore::open_or_disable(&db_path).is_none());
    }
}
