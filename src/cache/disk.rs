//! Sharded on-disk thumbnail store.
//!
//! # File Layout
//!
//! ```text
//! {thumb_dir}/{key[0..2]}/{key}.jpg
//! ```
//!
//! Files are written to a temporary name in the shard directory and renamed
//! into place, so readers never see a partial JPEG. The orphan sweep
//! reconciles the tree against the metadata store after crashes or layout
//! changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::key::CacheKey;
use crate::error::Result;
use crate::state::store::MetadataStore;

/// Extension of persisted thumbnails
const THUMB_EXTENSION: &str = "jpg";

/// Extension of in-flight writes
const TEMP_EXTENSION: &str = "tmp";

/// Temporary files younger than this may still be renamed into place
const TEMP_GRACE: Duration = Duration::from_secs(10 * 60);

/// Unrecorded thumbnails younger than this may still get their metadata row
const ORPHAN_GRACE: Duration = Duration::from_secs(60);

/// Distinguishes temp files of concurrent writers for the same key
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Location of the thumbnail for `key` under `thumb_dir`
pub fn disk_path(key: &CacheKey, thumb_dir: &Path) -> PathBuf {
    thumb_dir
        .join(key.shard())
        .join(format!("{}.{}", key.as_str(), THUMB_EXTENSION))
}

/// Outcome of one orphan sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Current-format files with no metadata row
    pub orphans_removed: u64,
    /// Files that do not follow the current layout
    pub legacy_removed: u64,
    /// Files kept because the store knows their key
    pub retained: u64,
}

/// What a file found under the thumbnail directory is
enum SweepEntry {
    /// Key, path, and whether the file is inside `ORPHAN_GRACE`
    Thumbnail(CacheKey, PathBuf, bool),
    Legacy(PathBuf),
    InFlight,
}

/// Handle to the thumbnail directory. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DiskCache {
    thumb_dir: Arc<PathBuf>,
}

impl DiskCache {
    pub fn new(thumb_dir: PathBuf) -> Self {
        Self {
            thumb_dir: Arc::new(thumb_dir),
        }
    }

    pub fn thumb_dir(&self) -> &Path {
        &self.thumb_dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        disk_path(key, &self.thumb_dir)
    }

    /// Read the encoded thumbnail for `key`
    pub fn read(&self, key: &CacheKey) -> Result<Vec<u8>> {
        Ok(fs::read(self.path_for(key))?)
    }

    /// Write encoded bytes for `key` atomically (temp file, then rename)
    pub fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let shard = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.thumb_dir.to_path_buf());
        fs::create_dir_all(&shard)?;

        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp_path = shard.join(format!(
            "{}.{}-{}.{}",
            key.as_str(),
            std::process::id(),
            seq,
            TEMP_EXTENSION
        ));

        if let Err(e) = fs::write(&temp_path, bytes).and_then(|_| fs::rename(&temp_path, &path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        Ok(())
    }

    /// Delete the file for `key`, if present
    pub fn remove(&self, key: &CacheKey) {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %path.display(), error = %e, "failed to remove thumbnail"),
        }
    }

    /// Delete every file whose key has no metadata row, and every file not
    /// in the current layout.
    ///
    /// A thumbnail is renamed into place before its row is written, so
    /// unrecorded files younger than `ORPHAN_GRACE` are left for the next
    /// sweep.
    pub fn sweep_orphans(&self, store: &MetadataStore) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        if !self.thumb_dir.exists() {
            return Ok(stats);
        }

        let entries: Vec<SweepEntry> = WalkDir::new(self.thumb_dir.as_path())
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| self.classify(e.path()))
            .collect();

        let known = store.all_thumbnail_keys()?;

        for entry in entries {
            match entry {
                SweepEntry::Thumbnail(key, path, fresh) => {
                    if known.contains(key.as_str()) {
                        stats.retained += 1;
                    } else if fresh {
                        debug!(path = %path.display(), "skipping unrecorded thumbnail still in grace period");
                    } else if remove_logged(&path) {
                        stats.orphans_removed += 1;
                    }
                }
                SweepEntry::Legacy(path) => {
                    if remove_logged(&path) {
                        stats.legacy_removed += 1;
                    }
                }
                SweepEntry::InFlight => {}
            }
        }

        info!(
            orphans = stats.orphans_removed,
            legacy = stats.legacy_removed,
            retained = stats.retained,
            "🧹 thumbnail sweep complete"
        );

        Ok(stats)
    }

    fn classify(&self, path: &Path) -> SweepEntry {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        if extension == TEMP_EXTENSION {
            return if modified_within(path, TEMP_GRACE) {
                SweepEntry::InFlight
            } else {
                SweepEntry::Legacy(path.to_path_buf())
            };
        }

        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(CacheKey::from_stem);

        match key {
            Some(key) if extension == THUMB_EXTENSION && self.path_for(&key) == path => {
                SweepEntry::Thumbnail(key, path.to_path_buf(), modified_within(path, ORPHAN_GRACE))
            }
            _ => SweepEntry::Legacy(path.to_path_buf()),
        }
    }
}

/// Run the orphan sweep once on the blocking pool, off the load path
pub fn spawn_orphan_sweep(disk: DiskCache, store: Arc<MetadataStore>) -> JoinHandle<Option<SweepStats>> {
    tokio::task::spawn_blocking(move || match disk.sweep_orphans(&store) {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(error = %e, "thumbnail sweep aborted");
            None
        }
    })
}

/// Whether `path` was modified less than `grace` ago
fn modified_within(path: &Path, grace: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age < grace)
}

fn remove_logged(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to delete cached file");
            false
        }
    }
}
