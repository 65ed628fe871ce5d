/// Directory listing for the browser grid
///
/// Walks a folder tree and emits image paths in batches so the grid can
/// fill while the walk continues. Finished walks are recorded in the
/// metadata store; the next visit to the same tree (or any folder under it)
/// is answered from the store without touching the filesystem.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::raw::thumbnail::probe_dimensions;
use crate::state::data::SizeBounds;
use crate::state::store::MetadataStore;

/// Supported RAW file extensions (common formats)
pub const RAW_EXTENSIONS: &[&str] = &[
    "nef", "dng", "cr2", "cr3", "arw", "raf", "orf", "rw2", "pef", "srw", "erf", "kdc", "dcr",
    "mos", "raw", "rwl",
];

/// Paths emitted per batch while walking
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Check if this is a RAW file by extension
pub fn is_raw(path: &Path) -> bool {
    match path.extension() {
        Some(extension) => {
            let ext = extension.to_string_lossy().to_lowercase();
            RAW_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Check the extension against a list of lowercase extensions.
/// An empty list accepts everything.
pub fn has_supported_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    match path.extension() {
        Some(extension) => {
            let ext = extension.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| *e == ext)
        }
        None => false,
    }
}

/// Walk `root` recursively, emitting matching files in batches of
/// `batch_size`. Returns every matching path in traversal order.
pub fn walk_directory<F>(root: &Path, extensions: &[String], batch_size: usize, mut emit: F) -> Vec<PathBuf>
where
    F: FnMut(Vec<PathBuf>),
{
    let batch_size = batch_size.max(1);
    let mut all = Vec::new();
    let mut batch = Vec::with_capacity(batch_size);

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        // Only process files (not directories)
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !has_supported_extension(path, extensions) {
            continue;
        }

        batch.push(path.to_path_buf());
        if batch.len() == batch_size {
            all.extend(batch.iter().cloned());
            emit(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)));
        }
    }

    if !batch.is_empty() {
        all.extend(batch.iter().cloned());
        emit(batch);
    }

    all
}

/// List `root`, preferring the cached listing.
///
/// A cache hit is emitted as a single batch. On a miss the tree is walked
/// and the full listing recorded for next time. Without a store this is a
/// plain walk.
pub fn list_directory<F>(
    store: Option<&MetadataStore>,
    root: &Path,
    extensions: &[String],
    bounds: Option<SizeBounds>,
    batch_size: usize,
    mut emit: F,
) -> Vec<PathBuf>
where
    F: FnMut(Vec<PathBuf>),
{
    if let Some(store) = store {
        let cached = store.cached_directory_entries(root, extensions, bounds);
        if !cached.is_empty() {
            debug!(root = %root.display(), entries = cached.len(), "serving cached listing");
            emit(cached.clone());
            return cached;
        }
    }

    rescan_directory(store, root, extensions, batch_size, emit)
}

/// Walk `root` and replace its cached listing with the result
pub fn rescan_directory<F>(
    store: Option<&MetadataStore>,
    root: &Path,
    extensions: &[String],
    batch_size: usize,
    emit: F,
) -> Vec<PathBuf>
where
    F: FnMut(Vec<PathBuf>),
{
    info!(root = %root.display(), "🔍 scanning folder");
    let paths = walk_directory(root, extensions, batch_size, emit);

    if let Some(store) = store {
        if let Err(e) = store.replace_directory_entries(root, &paths) {
            warn!(root = %root.display(), error = %e, "failed to cache directory listing");
        }
    }

    info!(root = %root.display(), entries = paths.len(), "✅ scan complete");
    paths
}

/// Apply `bounds` to `paths`, probing and back-filling dimensions that are
/// not cached yet. Files that cannot be probed are kept.
pub fn filter_by_dimensions(
    store: Option<&MetadataStore>,
    paths: &[PathBuf],
    bounds: SizeBounds,
) -> Vec<PathBuf> {
    paths
        .iter()
        .filter(|path| {
            let dims = match store {
                Some(store) => store.dimensions_or_probe(path, probe_dimensions),
                None => probe_dimensions(path),
            };
            dims.map_or(true, |(w, h)| bounds.contains(w, h))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::fs;
    use tempfile::TempDir;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        touch(&root.join("a.jpg"));
        touch(&root.join("b.NEF"));
        touch(&root.join("notes.txt"));
        touch(&root.join("trip/c.jpg"));
        touch(&root.join("trip/d.jpg"));
        touch(&root.join("trip/deep/e.jpg"));
        temp_dir
    }

    #[test]
    fn test_is_raw() {
        assert!(is_raw(Path::new("/x/DSC_0001.NEF")));
        assert!(is_raw(Path::new("/x/img.cr3")));
        assert!(!is_raw(Path::new("/x/img.jpg")));
        assert!(!is_raw(Path::new("/x/README")));
    }

    #[test]
    fn test_walk_emits_batches() {
        let temp_dir = tree();
        let mut batches = Vec::new();

        let all = walk_directory(temp_dir.path(), &exts(&["jpg", "nef"]), 2, |b| batches.push(b));

        assert_eq!(all.len(), 5);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(batches.concat(), all);
        assert!(all.iter().all(|p| p.extension().unwrap() != "txt"));
    }

    #[test]
    fn test_listing_is_cached_and_serves_subfolders() {
        let temp_dir = tree();
        let root = temp_dir.path();
        let store = MetadataStore::open_in_memory().unwrap();
        let jpg = exts(&["jpg"]);

        let first = list_directory(Some(&store), root, &jpg, None, 100, |_| {});
        assert_eq!(first.len(), 4);

        // Remove a file: the cached listing still answers
        fs::remove_file(root.join("a.jpg")).unwrap();
        let mut batches = 0;
        let second = list_directory(Some(&store), root, &jpg, None, 100, |_| batches += 1);
        assert_eq!(second.len(), 4);
        assert_eq!(batches, 1);

        // Sub-folder query answered from the parent's listing
        let trip = list_directory(Some(&store), &root.join("trip"), &jpg, None, 100, |_| {});
        assert_eq!(trip.len(), 3);
        assert!(trip.iter().all(|p| p.starts_with(root.join("trip"))));

        // Rescan picks up the deletion
        let fresh = rescan_directory(Some(&store), root, &jpg, 100, |_| {});
        assert_eq!(fresh.len(), 3);
        assert_eq!(store.cached_directory_entries(root, &jpg, None).len(), 3);
    }

    #[test]
    fn test_listing_without_store() {
        let temp_dir = tree();
        let all = list_directory(None, temp_dir.path(), &[], None, 10, |_| {});
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn test_filter_by_dimensions_backfills() {
        let temp_dir = TempDir::new().unwrap();
        let big = temp_dir.path().join("big.png");
        let small = temp_dir.path().join("small.png");
        RgbImage::new(400, 300).save(&big).unwrap();
        RgbImage::new(20, 20).save(&small).unwrap();
        let raw = temp_dir.path().join("c.nef");
        touch(&raw);

        let store = MetadataStore::open_in_memory().unwrap();
        let kept = filter_by_dimensions(
            Some(&store),
            &[big.clone(), small.clone(), raw.clone()],
            SizeBounds::at_least(100, 100),
        );

        assert_eq!(kept, vec![big.clone(), raw]);
        assert_eq!(store.cached_dimensions(&big), Some((400, 300)));
        assert_eq!(store.cached_dimensions(&small), Some((20, 20)));
    }
}
