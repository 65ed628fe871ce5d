use std::path::{Path, PathBuf};
use std::sync::Arc;

use raw_browser::cache::disk::{spawn_orphan_sweep, DiskCache};
use raw_browser::raw::thumbnail::ImageThumbnailer;
use raw_browser::scan::{filter_by_dimensions, list_directory, rescan_directory, DEFAULT_BATCH_SIZE};
use raw_browser::state::data::SizeBounds;
use raw_browser::{CacheConfig, MetadataStore, ThumbnailCache};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Thumbnails warmed per step, like one screen of the grid
const WINDOW: usize = 120;
/// Extra rows fetched ahead of the visible window
const PREFETCH: usize = 60;

/// Command line options
#[derive(Debug, Default)]
struct Options {
    folder: Option<PathBuf>,
    rescan: bool,
    min_size: Option<u32>,
}

impl Options {
    fn parse() -> Result<Self, String> {
        let mut options = Options::default();
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--rescan" => options.rescan = true,
                "--min-size" => {
                    let value = args.next().ok_or("--min-size needs a value")?;
                    let size = value.parse().map_err(|_| format!("invalid --min-size: {value}"))?;
                    options.min_size = Some(size);
                }
                _ if options.folder.is_none() => options.folder = Some(PathBuf::from(arg)),
                _ => return Err(format!("unexpected argument: {arg}")),
            }
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = match Options::parse() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: raw-browser <folder> [--rescan] [--min-size N]");
            std::process::exit(2);
        }
    };

    let config = CacheConfig::load();
    let store = MetadataStore::open_or_disable(&config.database_path);
    let disk = DiskCache::new(config.thumb_dir.clone());

    let sweep = match (&store, config.sweep_on_startup) {
        (Some(store), true) => Some(spawn_orphan_sweep(disk, Arc::clone(store))),
        _ => None,
    };

    if let Some(folder) = &options.folder {
        browse(&config, store.clone(), folder, &options).await;
    } else {
        info!("no folder given, running maintenance only");
    }

    if let Some(sweep) = sweep {
        match sweep.await {
            Ok(Some(stats)) => info!(
                orphans = stats.orphans_removed,
                legacy = stats.legacy_removed,
                retained = stats.retained,
                "🧹 orphan sweep finished"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "orphan sweep task failed"),
        }
    }

    if let Some(store) = &store {
        match store.counts() {
            Ok(counts) => info!(
                thumbnails = counts.thumbnails,
                files = counts.files,
                directory_entries = counts.directory_entries,
                "📊 metadata store"
            ),
            Err(e) => warn!(error = %e, "could not count metadata rows"),
        }
    }
}

/// List `folder` and walk the grid over it one window at a time, the way
/// scrolling through the browser would
async fn browse(config: &CacheConfig, store: Option<Arc<MetadataStore>>, folder: &Path, options: &Options) {
    let root = folder.to_path_buf();
    let extensions = config.extensions.clone();
    let rescan = options.rescan;
    let listing_store = store.clone();

    let listed = tokio::task::spawn_blocking(move || {
        let mut batches = 0usize;
        let emit = |batch: Vec<PathBuf>| {
            batches += 1;
            info!(batch = batches, files = batch.len(), "⏳ listed batch");
        };
        if rescan {
            rescan_directory(listing_store.as_deref(), &root, &extensions, DEFAULT_BATCH_SIZE, emit)
        } else {
            list_directory(listing_store.as_deref(), &root, &extensions, None, DEFAULT_BATCH_SIZE, emit)
        }
    })
    .await;

    let mut paths = match listed {
        Ok(paths) => paths,
        Err(e) => {
            warn!(error = %e, "listing task failed");
            return;
        }
    };

    if let Some(min_size) = options.min_size {
        let filter_store = store.clone();
        let bounds = SizeBounds::at_least(min_size, min_size);
        match tokio::task::spawn_blocking(move || filter_by_dimensions(filter_store.as_deref(), &paths, bounds)).await {
            Ok(kept) => paths = kept,
            Err(e) => {
                warn!(error = %e, "dimension filter task failed");
                return;
            }
        }
    }

    info!(folder = %folder.display(), files = paths.len(), "🎨 warming thumbnails");

    let source = Arc::new(ImageThumbnailer::new(config.jpeg_quality));
    let mut cache = ThumbnailCache::new(config, store, source, Handle::current());

    let mut start = 0;
    while start < paths.len() {
        let visible = start..(start + WINDOW).min(paths.len());
        let requested = start.saturating_sub(PREFETCH)..visible.end + PREFETCH;

        cache.ensure_loaded(requested, visible, &paths, |_| {});
        cache.settle().await;

        let stats = cache.stats();
        info!(
            window = start / WINDOW,
            resident = stats.resident,
            budget = stats.budget,
            "window ready"
        );
        start += WINDOW;
    }

    cache.flush_writes().await;

    let stats = cache.stats();
    info!(
        disk_hits = stats.disk_hits,
        generated = stats.generated,
        failed = stats.failed,
        discarded = stats.discarded,
        "✅ thumbnails warmed"
    );
}
