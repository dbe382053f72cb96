//! # Ingest Boundary
//!
//! Everything the content store needs to accept raw audio bytes.
//!
//! ## Overview
//!
//! This module handles:
//! - Audio container detection from byte signatures ([`format`])
//! - Best-effort tag extraction with a filename fallback ([`extractor`])
//! - Content hashing for deduplication ([`content_hash`])

pub mod error;
pub mod extractor;
pub mod format;

pub use error::{MetadataError, Result};
pub use extractor::{content_hash, CoverArt, MetadataExtractor, TrackMetadata};
pub use format::{detect_format, AudioFormat};
