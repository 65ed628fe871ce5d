/// Shared record types for the metadata store
///
/// These structs represent the rows that flow between
/// the SQLite layer and the thumbnail loader.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Stored facts about one generated thumbnail on disk
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailMetadata {
    /// Content fingerprint, also the file stem on disk
    pub cache_key: String,
    /// Decoded thumbnail width in pixels
    pub width: u32,
    /// Decoded thumbnail height in pixels
    pub height: u32,
    /// width / height
    pub aspect: f32,
    /// Full path of the source image
    pub source_path: String,
    /// Source modification time (seconds since epoch) the key was built from
    pub source_mtime: f64,
    pub updated_at: DateTime<Utc>,
}

/// Per-file metadata row
///
/// The capture date is trusted only while `capture_checked` is set and the
/// stored signature matches the file on disk. Dimensions carry no signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub path: String,
    pub mtime: f64,
    pub file_size: u64,
    pub capture_date: Option<DateTime<Utc>>,
    pub capture_checked: bool,
    pub pixel_width: Option<u32>,
    pub pixel_height: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a capture-date lookup that matched the file signature
///
/// `Missing` is a cached negative: the file was inspected and has no date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDate {
    Missing,
    Date(DateTime<Utc>),
}

impl CaptureDate {
    /// Collapse into the plain optional date
    pub fn date(self) -> Option<DateTime<Utc>> {
        match self {
            CaptureDate::Missing => None,
            CaptureDate::Date(d) => Some(d),
        }
    }
}

/// A file's (modification time, size) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileSignature {
    /// Fractional seconds since the Unix epoch
    pub mtime: f64,
    pub size: u64,
}

impl FileSignature {
    /// Read the signature of a file from the filesystem
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Ok(Self {
            mtime,
            size: meta.len(),
        })
    }
}

/// Optional pixel-dimension bounds for directory listings
///
/// Entries whose dimensions are not cached yet always pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeBounds {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl SizeBounds {
    /// Bounds that only enforce a minimum size
    pub fn at_least(min_width: u32, min_height: u32) -> Self {
        Self {
            min_width,
            min_height,
            ..Self::default()
        }
    }

    /// Check a known pair of dimensions against the bounds
    pub fn contains(&self, width: u32, height: u32) -> bool {
        width >= self.min_width
            && height >= self.min_height
            && self.max_width.map_or(true, |m| width <= m)
            && self.max_height.map_or(true, |m| height <= m)
    }
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub thumbnails: u64,
    pub files: u64,
    pub directory_entries: u64,
}
