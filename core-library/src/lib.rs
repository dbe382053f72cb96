//! # Content Library
//!
//! The kiosk's local collection of audio files and playlists.
//!
//! ## Overview
//!
//! This module manages:
//! - Content-addressed blob storage with SHA-256 deduplication
//! - The in-memory catalog, persisted as `catalog.json`
//! - Playlists whose references may dangle after deletes
//! - Catalog snapshots used for cloud backups
//!
//! Transfer backends read content through the [`ContentSource`] trait.

pub mod error;
pub mod models;
pub mod store;

pub use error::{LibraryError, Result};
pub use models::{
    CatalogSnapshot, FileId, LibraryFile, LibraryFilter, Playlist, PlaylistEntry, PlaylistId,
    CATALOG_FORMAT_VERSION,
};
pub use store::{ContentSource, ContentStore};
