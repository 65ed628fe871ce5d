/// Content fingerprint for cached thumbnails
///
/// `sha256(path + ":" + mtime)` with the modification time printed at six
/// fixed decimals, so two timestamps equal to a microsecond always hash the
/// same regardless of how the float was produced.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Deterministic key for one (path, mtime) pair, as 64 lowercase hex chars
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(path: &Path, mtime: f64) -> Self {
        let material = format!("{}:{:.6}", path.to_string_lossy(), mtime);
        let digest = Sha256::digest(material.as_bytes());
        CacheKey(hex::encode(digest))
    }

    /// Rebuild a key from a file stem found on disk.
    /// Returns `None` unless the stem looks like a key this module produced.
    pub fn from_stem(stem: &str) -> Option<Self> {
        let valid = stem.len() == 64
            && stem
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| CacheKey(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard directory name
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
