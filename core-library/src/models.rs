//! Domain models for the content library
//!
//! The catalog is small and fully in memory; these types double as the
//! on-disk `catalog.json` format and the cloud backup document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Version written into every [`CatalogSnapshot`].
pub const CATALOG_FORMAT_VERSION: u32 = 1;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a library file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(pub Uuid);

impl PlaylistId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for PlaylistId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Domain Models
// =============================================================================

/// Audio file held by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFile {
    pub id: FileId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: u32,
    pub size_bytes: u64,
    /// Hex SHA-256 of the content; unique across the catalog
    pub content_hash: String,
    /// File name under the covers directory, when the file has embedded art
    pub cover_ref: Option<String>,
    /// Canonical extension of the detected container, without the dot
    pub extension: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

impl LibraryFile {
    /// Human-facing file name, `Artist - Title.ext`.
    pub fn display_name(&self) -> String {
        format!("{} - {}.{}", self.artist, self.title, self.extension)
    }

    pub(crate) fn matches(&self, filter: &LibraryFilter) -> bool {
        if let Some(text) = &filter.text {
            let needle = text.to_lowercase();
            let hit = [&self.title, &self.artist, &self.album]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if let Some(artist) = &filter.artist {
            if &self.artist != artist {
                return false;
            }
        }

        if let Some(album) = &filter.album {
            if &self.album != album {
                return false;
            }
        }

        true
    }
}

/// Filter for [`ContentStore::list`](crate::store::ContentStore::list).
///
/// All set criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryFilter {
    /// Case-insensitive substring of title, artist or album
    pub text: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl LibraryFilter {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }
}

/// Ordered list of file references. References may dangle after a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub track_ids: Vec<FileId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Playlist {
    pub fn new(name: String, now: DateTime<Utc>) -> Self {
        Self {
            id: PlaylistId::new(),
            name,
            track_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Playlist name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// One playlist slot with its file, if the file still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub file_id: FileId,
    pub file: Option<LibraryFile>,
}

impl PlaylistEntry {
    pub fn is_dangling(&self) -> bool {
        self.file.is_none()
    }
}

/// Serializable image of the whole catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub files: Vec<LibraryFile>,
    pub playlists: Vec<Playlist>,
}

impl CatalogSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            format_version: CATALOG_FORMAT_VERSION,
            exported_at: now,
            files: Vec::new(),
            playlists: Vec::new(),
        }
    }

    /// Every cover referenced by the snapshot's files, deduplicated.
    pub fn cover_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self
            .files
            .iter()
            .filter_map(|file| file.cover_ref.clone())
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }
}
