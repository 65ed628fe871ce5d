/// Error type shared by the thumbnail cache subsystem
///
/// Nothing in here ever reaches the UI as a hard failure. Callers at the
/// edges (disk writes, metadata upserts, background fetches) log these and
/// degrade to "not cached yet".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The metadata database could not be opened, migrated, or queried
    #[error("metadata store error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image codec rejected the source or cached bytes
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to decode RAW sensor data: {0}")]
    Raw(String),

    /// Cached bytes decoded to a size the metadata store does not agree with
    #[error("cached thumbnail is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        CacheError::TaskJoin(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
