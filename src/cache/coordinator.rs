//! Background thumbnail loading for the browser grid.
//!
//! # Ownership
//!
//! [`ThumbnailCache`] is owned by one thread (the UI loop). The LRU, the
//! `loading` set, the generation counter and the prefetch range live on it
//! and are only mutated through `&mut self`. Fetches run as tokio tasks; they
//! never touch owner state. Each fetch posts exactly one [`Delivery`] back
//! over a channel, and the owner applies it in `process_deliveries`,
//! `next_delivery` or `settle`.
//!
//! # Staleness
//!
//! Every `ensure_loaded` call bumps the generation and publishes the new
//! prefetch range through a `watch` channel. A fetch is stale when the path
//! list was replaced, or when its generation is old *and* its index left the
//! prefetch range. Fetches check before and after waiting on the semaphore,
//! and the owner checks once more on delivery.

use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::disk::DiskCache;
use crate::cache::key::CacheKey;
use crate::cache::lru::TextureLru;
use crate::error::{CacheError, Result};
use crate::raw::thumbnail::{Texture, ThumbnailSource};
use crate::state::config::CacheConfig;
use crate::state::data::FileSignature;
use crate::state::store::MetadataStore;

/// What a fetch captured when it was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    index: usize,
    generation: u64,
    list_version: u64,
}

/// Snapshot of owner state that fetches may read
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoadEpoch {
    generation: u64,
    list_version: u64,
    prefetch: Range<usize>,
}

impl LoadEpoch {
    fn is_stale(&self, ticket: &Ticket) -> bool {
        ticket.list_version != self.list_version
            || (self.generation > ticket.generation && !self.prefetch.contains(&ticket.index))
    }
}

/// Where a resident texture came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    DiskCache,
    Generated,
}

/// Encoded thumbnail waiting to be written to disk and recorded
#[derive(Debug)]
struct PendingWrite {
    key: CacheKey,
    source_path: PathBuf,
    source_mtime: f64,
    encoded: Vec<u8>,
    width: u32,
    height: u32,
    aspect: f32,
}

#[derive(Debug)]
enum Outcome {
    Ready {
        texture: Texture,
        aspect: f32,
        origin: Origin,
        write: Option<PendingWrite>,
    },
    Stale,
    Failed,
}

/// Message from a finished fetch to the owner
#[derive(Debug)]
struct Delivery {
    ticket: Ticket,
    outcome: Outcome,
}

/// Counters and sizes for logging and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub resident: usize,
    pub loading: usize,
    pub budget: usize,
    pub generation: u64,
    pub list_version: u64,
    /// Deliveries served from the disk cache
    pub disk_hits: u64,
    /// Deliveries generated from the source file
    pub generated: u64,
    /// Fetches that found nothing usable
    pub failed: u64,
    /// Fetches dropped as stale
    pub discarded: u64,
}

type UpdateFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Worker-side half: everything a fetch needs, shared by all fetches
struct Fetcher {
    store: Option<Arc<MetadataStore>>,
    disk: DiskCache,
    source: Arc<dyn ThumbnailSource>,
    permits: Arc<Semaphore>,
    max_pixel_size: u32,
    epoch: watch::Receiver<LoadEpoch>,
}

impl Fetcher {
    fn is_stale(&self, ticket: &Ticket) -> bool {
        self.epoch.borrow().is_stale(ticket)
    }

    async fn fetch(self: Arc<Self>, ticket: Ticket, path: PathBuf) -> Delivery {
        let stale = Delivery {
            ticket,
            outcome: Outcome::Stale,
        };

        if self.is_stale(&ticket) {
            return stale;
        }

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Delivery {
                    ticket,
                    outcome: Outcome::Failed,
                }
            }
        };

        // Waiting for a permit can take long enough to go stale
        if self.is_stale(&ticket) {
            drop(permit);
            return stale;
        }

        let fetcher = Arc::clone(&self);
        let loaded = tokio::task::spawn_blocking(move || fetcher.load_blocking(&path))
            .await
            .map_err(CacheError::from)
            .and_then(|result| result);
        drop(permit);

        let outcome = match loaded {
            Ok(outcome) => outcome,
            Err(e @ CacheError::TaskJoin(_)) => {
                warn!(index = ticket.index, error = %e, "thumbnail task panicked");
                Outcome::Failed
            }
            Err(e) => {
                debug!(index = ticket.index, error = %e, "thumbnail load failed");
                Outcome::Failed
            }
        };

        Delivery { ticket, outcome }
    }

    /// Disk cache first, then a fresh thumbnail from the source
    fn load_blocking(&self, path: &Path) -> Result<Outcome> {
        let signature = FileSignature::of(path)?;
        let key = CacheKey::new(path, signature.mtime);

        if let Some(store) = &self.store {
            if let Some(meta) = store.thumbnail(&key) {
                let cached = self
                    .disk
                    .read(&key)
                    .and_then(|bytes| self.source.decode(&bytes, meta.width, meta.height));

                match cached {
                    Ok(texture) => {
                        return Ok(Outcome::Ready {
                            texture,
                            aspect: meta.aspect,
                            origin: Origin::DiskCache,
                            write: None,
                        });
                    }
                    Err(e) => {
                        // Corrupt or mismatched: forget it and regenerate
                        debug!(path = %path.display(), key = %key, error = %e, "discarding cached thumbnail");
                        store.remove_thumbnail(&key);
                    }
                }
            }
        }

        let generated = self.source.generate(path, self.max_pixel_size)?;

        let write = self.store.is_some().then(|| PendingWrite {
            key,
            source_path: path.to_path_buf(),
            source_mtime: signature.mtime,
            encoded: generated.encoded,
            width: generated.width,
            height: generated.height,
            aspect: generated.aspect,
        });

        Ok(Outcome::Ready {
            texture: generated.texture,
            aspect: generated.aspect,
            origin: Origin::Generated,
            write,
        })
    }

    /// Write the file, then record it. A failed write records nothing.
    fn persist(&self, write: PendingWrite) {
        let Some(store) = &self.store else {
            return;
        };

        if let Err(e) = self.disk.write(&write.key, &write.encoded) {
            debug!(key = %write.key, error = %e, "thumbnail not persisted");
            return;
        }

        store.upsert_thumbnail(
            &write.key,
            &write.source_path,
            write.source_mtime,
            write.width,
            write.height,
            write.aspect,
        );
    }
}

/// In-memory thumbnail cache with cancellable background loading
pub struct ThumbnailCache {
    config: CacheConfig,
    fetcher: Arc<Fetcher>,
    runtime: Handle,

    lru: TextureLru<Texture>,
    loading: HashSet<usize>,
    /// Path list from the last `ensure_loaded`, for re-dispatching
    paths: Arc<[PathBuf]>,
    budget: usize,
    pinned: Range<usize>,
    generation: u64,
    list_version: u64,
    epoch: watch::Sender<LoadEpoch>,

    deliveries_tx: mpsc::UnboundedSender<Delivery>,
    deliveries_rx: mpsc::UnboundedReceiver<Delivery>,
    on_update: Option<UpdateFn>,
    writes: Vec<JoinHandle<()>>,
    stats: LoaderStats,
}

impl ThumbnailCache {
    /// Create a cache whose fetches run on `runtime`.
    ///
    /// With `store` set to `None` the disk cache is bypassed entirely:
    /// nothing is read back and nothing is persisted.
    pub fn new(
        config: &CacheConfig,
        store: Option<Arc<MetadataStore>>,
        source: Arc<dyn ThumbnailSource>,
        runtime: Handle,
    ) -> Self {
        let initial = LoadEpoch {
            generation: 0,
            list_version: 0,
            prefetch: 0..0,
        };
        let (epoch, epoch_rx) = watch::channel(initial);
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();

        let fetcher = Arc::new(Fetcher {
            store,
            disk: DiskCache::new(config.thumb_dir.clone()),
            source,
            permits: Arc::new(Semaphore::new(config.max_concurrent_loads.max(1))),
            max_pixel_size: config.max_pixel_size.max(1),
            epoch: epoch_rx,
        });

        Self {
            config: config.clone(),
            fetcher,
            runtime,
            lru: TextureLru::new(),
            loading: HashSet::new(),
            paths: Arc::from(Vec::new()),
            budget: config.base_budget,
            pinned: 0..0,
            generation: 0,
            list_version: 0,
            epoch,
            deliveries_tx,
            deliveries_rx,
            on_update: None,
            writes: Vec::new(),
            stats: LoaderStats::default(),
        }
    }

    /// Resident texture for `index`, marking it most recently used
    pub fn get(&mut self, index: usize) -> Option<&Texture> {
        self.lru.get(index)
    }

    /// Aspect ratio of a resident thumbnail, 1.0 until it is loaded
    pub fn aspect(&self, index: usize) -> f32 {
        self.lru.aspect(index).unwrap_or(1.0)
    }

    pub fn is_loading(&self, index: usize) -> bool {
        self.loading.contains(&index)
    }

    /// Start loading every index in `requested` that is neither resident nor
    /// already loading. Returns immediately.
    ///
    /// `pinned` is the visible range; it is never evicted. `on_update` is
    /// called on the owner with each index that becomes resident.
    pub fn ensure_loaded<F>(
        &mut self,
        requested: Range<usize>,
        pinned: Range<usize>,
        paths: &[PathBuf],
        on_update: F,
    ) where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let requested = clamp_range(requested, paths.len());
        let pinned = clamp_range(pinned, paths.len());

        self.generation += 1;
        self.budget = self.config.budget_for(requested.len().max(pinned.len()));
        self.pinned = pinned;
        self.on_update = Some(Arc::new(on_update));
        self.paths = Arc::from(paths);
        self.publish(requested.clone());

        for index in requested {
            if self.lru.contains(index) || self.loading.contains(&index) {
                continue;
            }
            self.dispatch(index);
        }

        self.evict();
    }

    fn dispatch(&mut self, index: usize) {
        let Some(path) = self.paths.get(index).cloned() else {
            return;
        };
        self.loading.insert(index);

        let ticket = Ticket {
            index,
            generation: self.generation,
            list_version: self.list_version,
        };
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.deliveries_tx.clone();

        self.runtime.spawn(async move {
            let delivery = fetcher.fetch(ticket, path).await;
            // The owner may be gone; nothing left to deliver to
            let _ = tx.send(delivery);
        });
    }

    /// Drop everything resident and in flight; used when the path list
    /// changes. In-flight fetches discard themselves.
    pub fn invalidate_all(&mut self) {
        self.lru.clear();
        self.loading.clear();
        self.paths = Arc::from(Vec::new());
        self.budget = self.config.base_budget;
        self.pinned = 0..0;
        self.list_version += 1;
        self.publish(0..0);
    }

    /// Apply every delivery that is already waiting, without blocking.
    /// Returns how many became resident.
    pub fn process_deliveries(&mut self) -> usize {
        let mut inserted = 0;
        while let Ok(delivery) = self.deliveries_rx.try_recv() {
            if self.apply(delivery) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Wait for the next delivery and apply it.
    /// `Some(true)` if it became resident.
    pub async fn next_delivery(&mut self) -> Option<bool> {
        let delivery = self.deliveries_rx.recv().await?;
        Some(self.apply(delivery))
    }

    /// Apply deliveries until nothing is loading
    pub async fn settle(&mut self) {
        while !self.loading.is_empty() {
            if self.next_delivery().await.is_none() {
                break;
            }
        }
    }

    /// Wait for every background write started so far
    pub async fn flush_writes(&mut self) {
        for handle in self.writes.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "thumbnail write task failed");
            }
        }
    }

    pub fn resident_count(&self) -> usize {
        self.lru.len()
    }

    pub fn loading_count(&self) -> usize {
        self.loading.len()
    }

    /// Current resident budget, recomputed by every `ensure_loaded`
    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            resident: self.lru.len(),
            loading: self.loading.len(),
            budget: self.budget,
            generation: self.generation,
            list_version: self.list_version,
            ..self.stats
        }
    }

    fn publish(&mut self, prefetch: Range<usize>) {
        self.epoch.send_replace(LoadEpoch {
            generation: self.generation,
            list_version: self.list_version,
            prefetch,
        });
    }

    fn apply(&mut self, delivery: Delivery) -> bool {
        let Delivery { ticket, outcome } = delivery;

        let (texture, aspect, origin) = match outcome {
            Outcome::Ready {
                texture,
                aspect,
                origin,
                write,
            } => {
                // The thumbnail is valid for its file whatever the grid does now
                if let Some(write) = write {
                    self.spawn_persist(write);
                }
                (texture, aspect, origin)
            }
            Outcome::Stale => {
                self.stats.discarded += 1;
                if ticket.list_version == self.list_version {
                    self.loading.remove(&ticket.index);
                    // Scrolled back into the window while this fetch was
                    // dropping out; `ensure_loaded` skipped it as loading
                    let wanted = self.epoch.borrow().prefetch.contains(&ticket.index);
                    if wanted && !self.lru.contains(ticket.index) {
                        debug!(index = ticket.index, "re-dispatching thumbnail back in range");
                        self.dispatch(ticket.index);
                    }
                }
                return false;
            }
            Outcome::Failed => {
                if ticket.list_version == self.list_version {
                    self.loading.remove(&ticket.index);
                }
                self.stats.failed += 1;
                return false;
            }
        };

        // From before the path list changed: the index may be loading again
        if ticket.list_version != self.list_version {
            self.stats.discarded += 1;
            return false;
        }

        self.loading.remove(&ticket.index);

        if self.epoch.borrow().is_stale(&ticket) {
            debug!(index = ticket.index, "dropping stale thumbnail");
            self.stats.discarded += 1;
            return false;
        }

        match origin {
            Origin::DiskCache => self.stats.disk_hits += 1,
            Origin::Generated => self.stats.generated += 1,
        }

        self.lru.insert(ticket.index, texture, aspect);
        self.evict();

        if let Some(on_update) = &self.on_update {
            on_update(ticket.index);
        }
        true
    }

    fn spawn_persist(&mut self, write: PendingWrite) {
        self.writes.retain(|handle| !handle.is_finished());

        let fetcher = Arc::clone(&self.fetcher);
        let handle = self.runtime.spawn_blocking(move || fetcher.persist(write));
        self.writes.push(handle);
    }

    fn evict(&mut self) {
        let evicted = self.lru.evict_to(self.budget, &self.pinned);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), budget = self.budget, "evicted thumbnails");
        }
    }
}

fn clamp_range(range: Range<usize>, len: usize) -> Range<usize> {
    let end = range.end.min(len);
    range.start.min(end)..end
}
