/// Image decoding for thumbnails
///
/// This module handles:
/// - Extracting embedded JPEGs from RAW files
/// - Decoding RAW sensor data when no preview is embedded
/// - Generating and decoding cached thumbnails

pub mod loader;
pub mod preview;
pub mod thumbnail;
