/// Thumbnail caching
///
/// - `key`: content-derived cache keys
/// - `disk`: sharded JPEG files plus the orphan sweep
/// - `lru`: in-memory textures with pinned-range eviction
/// - `coordinator`: background loading that ties the three together

pub mod coordinator;
pub mod disk;
pub mod key;
pub mod lru;
