//! Audio Tag Extraction
//!
//! Extracts the catalog-relevant metadata from in-memory audio bytes using the
//! `lofty` crate (ID3v2, Vorbis Comments, MP4 atoms, APE tags, RIFF INFO).
//!
//! Extraction is best-effort: a file whose tags cannot be parsed still gets
//! usable metadata derived from its file name, following the common
//! `Artist - Title.ext` convention.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::MetadataExtractor;
//!
//! let extractor = MetadataExtractor::new();
//! let metadata = extractor.extract(&bytes, "Daft Punk - Digital Love.mp3");
//! println!("{} by {}", metadata.title, metadata.artist);
//! ```

use bytes::Bytes;
use lofty::config::ParseOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::{MimeType, PictureType};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{MetadataError, Result};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_TITLE: &str = "Untitled";

/// Metadata the catalog stores for a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: u32,
    /// Embedded front cover, if the file carries one
    pub cover: Option<CoverArt>,
}

impl TrackMetadata {
    /// Metadata derived from the file name alone.
    ///
    /// `"Artist - Title.ext"` splits on the first `" - "`; anything else
    /// becomes the title with an unknown artist.
    pub fn from_file_name(file_name: &str) -> Self {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(normalize_text)
            .unwrap_or_default();

        let (artist, title) = match stem.split_once(" - ") {
            Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
                (artist.trim().to_string(), title.trim().to_string())
            }
            _ if !stem.is_empty() => (UNKNOWN_ARTIST.to_string(), stem.clone()),
            _ => (UNKNOWN_ARTIST.to_string(), UNKNOWN_TITLE.to_string()),
        };

        Self {
            title,
            artist,
            album: UNKNOWN_ALBUM.to_string(),
            duration_seconds: 0,
            cover: None,
        }
    }
}

/// Embedded artwork image.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverArt {
    pub data: Bytes,
    pub mime_type: String,
}

impl CoverArt {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            "image/tiff" => "tiff",
            _ => "jpg",
        }
    }
}

/// Hex-encoded SHA-256 of the content, used as its identity for deduplication.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Audio metadata extractor
pub struct MetadataExtractor {
    parse_options: ParseOptions,
}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self {
            parse_options: ParseOptions::new(),
        }
    }

    pub fn with_options(parse_options: ParseOptions) -> Self {
        Self { parse_options }
    }

    /// Extract metadata, falling back to the file name for anything the tags
    /// do not provide. Never fails.
    pub fn extract(&self, data: &[u8], file_name: &str) -> TrackMetadata {
        match self.try_extract(data, file_name) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(file_name, error = %e, "Tag extraction failed, using file name");
                TrackMetadata::from_file_name(file_name)
            }
        }
    }

    /// Strict extraction: errors when the container cannot be parsed at all.
    ///
    /// Missing individual tags are still filled from the file name.
    pub fn try_extract(&self, data: &[u8], file_name: &str) -> Result<TrackMetadata> {
        let tagged_file = Probe::new(Cursor::new(data))
            .options(self.parse_options)
            .guess_file_type()
            .map_err(|e| MetadataError::ExtractionFailed(format!("Failed to probe file: {}", e)))?
            .read()
            .map_err(|e| MetadataError::ExtractionFailed(format!("Failed to parse file: {}", e)))?;

        let duration_seconds = tagged_file.properties().duration().as_secs() as u32;
        let fallback = TrackMetadata::from_file_name(file_name);

        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag());

        let Some(tag) = tag else {
            debug!(file_name, "No tags found, deriving metadata from file name");
            return Ok(TrackMetadata {
                duration_seconds,
                ..fallback
            });
        };

        Ok(TrackMetadata {
            title: pick(tag.title(), fallback.title),
            artist: pick(tag.artist(), fallback.artist),
            album: pick(tag.album(), fallback.album),
            duration_seconds,
            cover: Self::extract_cover(tag),
        })
    }

    /// Front cover if present, otherwise the first picture with a known image type.
    fn extract_cover(tag: &lofty::tag::Tag) -> Option<CoverArt> {
        let pictures = tag.pictures();
        let front = pictures
            .iter()
            .find(|pic| pic.pic_type() == PictureType::CoverFront)
            .or_else(|| pictures.first())?;

        let mime_type = front.mime_type().and_then(Self::mime_type_to_string)?;
        if front.data().is_empty() {
            return None;
        }

        Some(CoverArt {
            data: Bytes::copy_from_slice(front.data()),
            mime_type: mime_type.to_string(),
        })
    }

    fn mime_type_to_string(mime_type: &MimeType) -> Option<&'static str> {
        match mime_type {
            MimeType::Png => Some("image/png"),
            MimeType::Jpeg => Some("image/jpeg"),
            MimeType::Tiff => Some("image/tiff"),
            MimeType::Bmp => Some("image/bmp"),
            MimeType::Gif => Some("image/gif"),
            _ => None,
        }
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn pick(value: Option<Cow<'_, str>>, default: String) -> String {
    value
        .map(|s| normalize_text(s.as_ref()))
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}

/// Collapse whitespace runs and drop control characters.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hello   World  "), "Hello World");
        assert_eq!(normalize_text("Title\nWith\tWhitespace"), "Title With Whitespace");
    }

    #[test]
    fn test_content_hash() {
        let hash = content_hash(b"test data");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, content_hash(b"test data"));
        assert_ne!(hash, content_hash(b"different data"));
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_file_name_fallback() {
        let metadata = TrackMetadata::from_file_name("Daft Punk - Digital Love.mp3");
        assert_eq!(metadata.artist, "Daft Punk");
        assert_eq!(metadata.title, "Digital Love");
        assert_eq!(metadata.album, UNKNOWN_ALBUM);

        let metadata = TrackMetadata::from_file_name("track01.flac");
        assert_eq!(metadata.artist, UNKNOWN_ARTIST);
        assert_eq!(metadata.title, "track01");

        let metadata = TrackMetadata::from_file_name("A - B - C.ogg");
        assert_eq!(metadata.artist, "A");
        assert_eq!(metadata.title, "B - C");

        let metadata = TrackMetadata::from_file_name("");
        assert_eq!(metadata.title, UNKNOWN_TITLE);
    }

    #[test]
    fn test_extract_garbage_falls_back() {
        let extractor = MetadataExtractor::new();
        let bytes = b"fLaC this is not really a flac stream at all";

        assert!(extractor.try_extract(bytes, "x.flac").is_err());

        let metadata = extractor.extract(bytes, "Nina Simone - Sinnerman.flac");
        assert_eq!(metadata.artist, "Nina Simone");
        assert_eq!(metadata.title, "Sinnerman");
        assert_eq!(metadata.duration_seconds, 0);
        assert!(metadata.cover.is_none());
    }

    #[test]
    fn test_cover_extension() {
        let cover = CoverArt {
            data: Bytes::from_static(b"\x89PNG"),
            mime_type: "image/png".to_string(),
        };
        assert_eq!(cover.extension(), "png");
        let cover = CoverArt {
            data: Bytes::from_static(b"\xFF\xD8"),
            mime_type: "image/jpeg".to_string(),
        };
        assert_eq!(cover.extension(), "jpg");
    }
}
