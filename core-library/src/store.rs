//! # Content Store
//!
//! Owns the kiosk's audio files, their metadata and the playlists that
//! reference them.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── catalog.json                  # CatalogSnapshot, rewritten after every mutation
//! ├── blobs/{hash[0..2]}/{hash}.{ext}
//! └── covers/{cover_ref}
//! ```
//!
//! Files are content-addressed: putting the same bytes twice returns the
//! first [`LibraryFile`] unchanged. The hash index and the catalog live under
//! one async `RwLock`, so the duplicate check and the insert are atomic.

use async_trait::async_trait;
use bridge_traits::{
    error::BridgeError,
    storage::FileSystemAccess,
    time::{Clock, SystemClock},
};
use bytes::Bytes;
use core_metadata::{content_hash, detect_format, AudioFormat, CoverArt, MetadataExtractor, TrackMetadata};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{LibraryError, Result};
use crate::models::{
    CatalogSnapshot, FileId, LibraryFile, LibraryFilter, Playlist, PlaylistEntry, PlaylistId,
    CATALOG_FORMAT_VERSION,
};

const CATALOG_FILE: &str = "catalog.json";
const BLOBS_DIR: &str = "blobs";
const COVERS_DIR: &str = "covers";

/// Read access to stored content, as needed by the transfer backends.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load_content(&self, file: &LibraryFile) -> Result<Bytes>;

    async fn load_cover(&self, cover_ref: &str) -> Result<Bytes>;
}

#[derive(Default)]
struct CatalogState {
    files: HashMap<FileId, LibraryFile>,
    /// Insertion order, which is creation order
    order: Vec<FileId>,
    by_hash: HashMap<String, FileId>,
    playlists: Vec<Playlist>,
}

impl CatalogState {
    fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut state = Self::default();
        let mut files = snapshot.files;
        files.sort_by_key(|file| file.created_at);
        for file in files {
            state.insert(file);
        }
        state.playlists = snapshot.playlists;
        state
    }

    fn to_snapshot(&self, exported_at: chrono::DateTime<chrono::Utc>) -> CatalogSnapshot {
        CatalogSnapshot {
            format_version: CATALOG_FORMAT_VERSION,
            exported_at,
            files: self.ordered().cloned().collect(),
            playlists: self.playlists.clone(),
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &LibraryFile> {
        self.order.iter().filter_map(|id| self.files.get(id))
    }

    fn insert(&mut self, file: LibraryFile) {
        self.by_hash.insert(file.content_hash.clone(), file.id);
        self.order.push(file.id);
        self.files.insert(file.id, file);
    }

    fn remove(&mut self, id: FileId) -> Option<LibraryFile> {
        let file = self.files.remove(&id)?;
        self.by_hash.remove(&file.content_hash);
        self.order.retain(|other| *other != id);
        Some(file)
    }

    fn cover_in_use(&self, cover_ref: &str) -> bool {
        self.files
            .values()
            .any(|file| file.cover_ref.as_deref() == Some(cover_ref))
    }

    fn playlist_index(&self, id: PlaylistId) -> Result<usize> {
        self.playlists
            .iter()
            .position(|playlist| playlist.id == id)
            .ok_or_else(|| LibraryError::not_found("playlist", id))
    }
}

/// Catalog and blob storage for the kiosk library.
pub struct ContentStore {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
    extractor: MetadataExtractor,
    clock: Arc<dyn Clock>,
    event_bus: Option<Arc<EventBus>>,
    state: RwLock<CatalogState>,
}

impl ContentStore {
    /// Open (or create) the store rooted at `root`, reloading `catalog.json`.
    #[instrument(skip(fs, root), fields(root = %root.as_ref().display()))]
    pub async fn open(fs: Arc<dyn FileSystemAccess>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs.create_dir_all(&root).await?;

        let catalog_path = root.join(CATALOG_FILE);
        let state = if fs.exists(&catalog_path).await? {
            let data = fs.read_file(&catalog_path).await?;
            let snapshot: CatalogSnapshot = serde_json::from_slice(&data)?;
            if snapshot.format_version > CATALOG_FORMAT_VERSION {
                return Err(LibraryError::Catalog(format!(
                    "catalog format {} is newer than supported {}",
                    snapshot.format_version, CATALOG_FORMAT_VERSION
                )));
            }
            CatalogState::from_snapshot(snapshot)
        } else {
            CatalogState::default()
        };

        info!(
            files = state.files.len(),
            playlists = state.playlists.len(),
            "Content store opened"
        );

        Ok(Self {
            fs,
            root,
            extractor: MetadataExtractor::new(),
            clock: Arc::new(SystemClock),
            event_bus: None,
            state: RwLock::new(state),
        })
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Store content with caller-supplied metadata.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::UnsupportedFormat`] when the bytes are not a known audio container
    /// - [`LibraryError::InvalidInput`] when the title is blank
    #[instrument(skip(self, data, metadata), fields(size = data.len(), title = %metadata.title))]
    pub async fn put(&self, data: Bytes, metadata: TrackMetadata) -> Result<LibraryFile> {
        let format = AudioFormat::detect(&data).ok_or_else(|| {
            LibraryError::UnsupportedFormat("unrecognized byte signature".to_string())
        })?;
        self.put_detected(data, metadata, format).await
    }

    /// Detect, extract and store an uploaded file.
    ///
    /// `declared_mime` is advisory; the byte signature decides the format.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn ingest(
        &self,
        data: Bytes,
        file_name: &str,
        declared_mime: Option<&str>,
    ) -> Result<LibraryFile> {
        let format = detect_format(&data, declared_mime)?;
        let metadata = self.extractor.extract(&data, file_name);
        self.put_detected(data, metadata, format).await
    }

    async fn put_detected(
        &self,
        data: Bytes,
        metadata: TrackMetadata,
        format: AudioFormat,
    ) -> Result<LibraryFile> {
        let hash = content_hash(&data);
        let mut state = self.state.write().await;

        if let Some(existing) = state.by_hash.get(&hash).and_then(|id| state.files.get(id)) {
            debug!(file_id = %existing.id, "Content already stored, returning existing file");
            return Ok(existing.clone());
        }

        if metadata.title.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "title".to_string(),
                message: "title cannot be empty".to_string(),
            });
        }

        let blob_path = self.blob_path(&hash, format.extension());
        self.fs.write_file(&blob_path, data.clone()).await?;

        let cover_ref = match &metadata.cover {
            Some(cover) => Some(self.store_cover(cover).await?),
            None => None,
        };

        let file = LibraryFile {
            id: FileId::new(),
            title: metadata.title,
            artist: metadata.artist,
            album: metadata.album,
            duration_seconds: metadata.duration_seconds,
            size_bytes: data.len() as u64,
            content_hash: hash,
            cover_ref,
            extension: format.extension().to_string(),
            mime_type: format.mime_type().to_string(),
            created_at: self.clock.now(),
        };

        state.insert(file.clone());
        if let Err(e) = self.persist(&state).await {
            state.remove(file.id);
            self.remove_quietly(&blob_path).await;
            return Err(e);
        }
        drop(state);

        info!(file_id = %file.id, hash = %file.content_hash, "Stored library file");
        self.emit(LibraryEvent::TrackAdded {
            track_id: file.id.to_string(),
            title: file.title.clone(),
            content_hash: file.content_hash.clone(),
        });
        Ok(file)
    }

    /// Remove a file and its blob. Playlist entries are left dangling.
    ///
    /// Returns `false` when the id was unknown.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: FileId) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(file) = state.remove(id) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&state).await {
            state.insert(file);
            return Err(e);
        }

        let orphaned_cover = file
            .cover_ref
            .as_deref()
            .filter(|cover_ref| !state.cover_in_use(cover_ref))
            .map(|cover_ref| self.root.join(COVERS_DIR).join(cover_ref));

        // Blobs go while the write lock is held, so a concurrent put of the
        // same bytes cannot have its fresh blob removed.
        self.remove_quietly(&self.blob_path(&file.content_hash, &file.extension))
            .await;
        if let Some(cover_path) = orphaned_cover {
            self.remove_quietly(&cover_path).await;
        }
        drop(state);

        info!(file_id = %id, "Deleted library file");
        self.emit(LibraryEvent::TrackDeleted {
            track_id: id.to_string(),
        });
        Ok(true)
    }

    /// Files in creation order, optionally filtered.
    pub async fn list(&self, filter: Option<&LibraryFilter>) -> Vec<LibraryFile> {
        let state = self.state.read().await;
        state
            .ordered()
            .filter(|file| filter.map_or(true, |f| file.matches(f)))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: FileId) -> Option<LibraryFile> {
        self.state.read().await.files.get(&id).cloned()
    }

    pub async fn find_by_hash(&self, hash: &str) -> Option<LibraryFile> {
        let state = self.state.read().await;
        state
            .by_hash
            .get(hash)
            .and_then(|id| state.files.get(id))
            .cloned()
    }

    /// Resolve ids to files, failing on the first unknown id.
    pub async fn get_many(&self, ids: &[FileId]) -> Result<Vec<LibraryFile>> {
        let state = self.state.read().await;
        ids.iter()
            .map(|id| {
                state
                    .files
                    .get(id)
                    .cloned()
                    .ok_or_else(|| LibraryError::not_found("file", id))
            })
            .collect()
    }

    pub async fn read_content(&self, id: FileId) -> Result<Bytes> {
        let file = self
            .get(id)
            .await
            .ok_or_else(|| LibraryError::not_found("file", id))?;
        self.load_content(&file).await
    }

    pub async fn read_cover(&self, cover_ref: &str) -> Result<Bytes> {
        if cover_ref.contains('/') || cover_ref.contains("..") {
            return Err(LibraryError::InvalidInput {
                field: "cover_ref".to_string(),
                message: format!("not a cover reference: {cover_ref}"),
            });
        }
        let path = self.root.join(COVERS_DIR).join(cover_ref);
        self.fs.read_file(&path).await.map_err(|e| match e {
            BridgeError::NotFound(_) => LibraryError::not_found("cover", cover_ref),
            other => other.into(),
        })
    }

    /// Re-run tag extraction against the stored content.
    ///
    /// Only descriptive metadata changes; id, hash and size are immutable.
    #[instrument(skip(self))]
    pub async fn reextract_metadata(&self, id: FileId) -> Result<LibraryFile> {
        let current = self
            .get(id)
            .await
            .ok_or_else(|| LibraryError::not_found("file", id))?;
        let data = self.load_content(&current).await?;
        let metadata = self
            .extractor
            .try_extract(&data, &current.display_name())?;

        let cover_ref = match &metadata.cover {
            Some(cover) => Some(self.store_cover(cover).await?),
            None => current.cover_ref.clone(),
        };

        let mut state = self.state.write().await;
        let Some(file) = state.files.get_mut(&id) else {
            return Err(LibraryError::not_found("file", id));
        };
        let previous = file.clone();
        file.title = metadata.title;
        file.artist = metadata.artist;
        file.album = metadata.album;
        file.duration_seconds = metadata.duration_seconds;
        file.cover_ref = cover_ref;
        let updated = file.clone();

        if let Err(e) = self.persist(&state).await {
            state.files.insert(id, previous);
            return Err(e);
        }
        drop(state);

        self.emit(LibraryEvent::TrackUpdated {
            track_id: id.to_string(),
        });
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Playlists
    // ------------------------------------------------------------------

    pub async fn create_playlist(&self, name: &str) -> Result<Playlist> {
        let playlist = Playlist::new(name.trim().to_string(), self.clock.now());
        playlist
            .validate()
            .map_err(|message| LibraryError::InvalidInput {
                field: "name".to_string(),
                message,
            })?;

        let mut state = self.state.write().await;
        state.playlists.push(playlist.clone());
        if let Err(e) = self.persist(&state).await {
            state.playlists.pop();
            return Err(e);
        }
        drop(state);

        self.emit(LibraryEvent::PlaylistCreated {
            playlist_id: playlist.id.to_string(),
            name: playlist.name.clone(),
        });
        Ok(playlist)
    }

    /// Append files to a playlist. All ids must exist or nothing changes.
    #[instrument(skip(self, file_ids), fields(count = file_ids.len()))]
    pub async fn add_to_playlist(
        &self,
        playlist_id: PlaylistId,
        file_ids: &[FileId],
    ) -> Result<Playlist> {
        let mut state = self.state.write().await;
        let index = state.playlist_index(playlist_id)?;

        if let Some(missing) = file_ids.iter().find(|id| !state.files.contains_key(*id)) {
            return Err(LibraryError::not_found("file", missing));
        }

        let previous = state.playlists[index].clone();
        let now = self.clock.now();
        let playlist = &mut state.playlists[index];
        playlist.track_ids.extend_from_slice(file_ids);
        playlist.updated_at = now;
        let updated = playlist.clone();

        if let Err(e) = self.persist(&state).await {
            state.playlists[index] = previous;
            return Err(e);
        }
        drop(state);

        self.emit(LibraryEvent::PlaylistUpdated {
            playlist_id: playlist_id.to_string(),
            change_type: "tracks_added".to_string(),
        });
        Ok(updated)
    }

    /// Remove every occurrence of the given ids. Unknown ids are ignored.
    pub async fn remove_from_playlist(
        &self,
        playlist_id: PlaylistId,
        file_ids: &[FileId],
    ) -> Result<Playlist> {
        let remove: HashSet<FileId> = file_ids.iter().copied().collect();

        let mut state = self.state.write().await;
        let index = state.playlist_index(playlist_id)?;
        let previous = state.playlists[index].clone();
        let now = self.clock.now();
        let playlist = &mut state.playlists[index];
        playlist.track_ids.retain(|id| !remove.contains(id));
        playlist.updated_at = now;
        let updated = playlist.clone();

        if let Err(e) = self.persist(&state).await {
            state.playlists[index] = previous;
            return Err(e);
        }
        drop(state);

        self.emit(LibraryEvent::PlaylistUpdated {
            playlist_id: playlist_id.to_string(),
            change_type: "tracks_removed".to_string(),
        });
        Ok(updated)
    }

    pub async fn list_playlists(&self) -> Vec<Playlist> {
        self.state.read().await.playlists.clone()
    }

    pub async fn get_playlist(&self, id: PlaylistId) -> Option<Playlist> {
        self.state
            .read()
            .await
            .playlists
            .iter()
            .find(|playlist| playlist.id == id)
            .cloned()
    }

    /// Playlist slots paired with their files; deleted files yield `None`.
    pub async fn resolve_playlist(&self, id: PlaylistId) -> Result<Vec<PlaylistEntry>> {
        let state = self.state.read().await;
        let index = state.playlist_index(id)?;
        Ok(state.playlists[index]
            .track_ids
            .iter()
            .map(|file_id| PlaylistEntry {
                file_id: *file_id,
                file: state.files.get(file_id).cloned(),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub async fn snapshot(&self) -> CatalogSnapshot {
        self.state.read().await.to_snapshot(self.clock.now())
    }

    /// The snapshot as pretty JSON, the format used for cloud backups.
    pub async fn catalog_bytes(&self) -> Result<Bytes> {
        let snapshot = self.snapshot().await;
        Ok(Bytes::from(serde_json::to_vec_pretty(&snapshot)?))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn blob_path(&self, hash: &str, extension: &str) -> PathBuf {
        let shard = hash.get(..2).unwrap_or("00");
        self.root
            .join(BLOBS_DIR)
            .join(shard)
            .join(format!("{hash}.{extension}"))
    }

    /// Covers are content-addressed too, so tracks of one album share a file.
    async fn store_cover(&self, cover: &CoverArt) -> Result<String> {
        let cover_ref = format!("{}.{}", content_hash(&cover.data), cover.extension());
        let path = self.root.join(COVERS_DIR).join(&cover_ref);
        if !self.fs.exists(&path).await? {
            self.fs.write_file(&path, cover.data.clone()).await?;
        }
        Ok(cover_ref)
    }

    async fn persist(&self, state: &CatalogState) -> Result<()> {
        let snapshot = state.to_snapshot(self.clock.now());
        let data = serde_json::to_vec_pretty(&snapshot)?;
        let staging = self.root.join(format!("{CATALOG_FILE}.tmp"));
        self.fs.write_file(&staging, Bytes::from(data)).await?;
        self.fs.rename(&staging, &self.root.join(CATALOG_FILE)).await?;
        Ok(())
    }

    async fn remove_quietly(&self, path: &Path) {
        match self.fs.delete_file(path).await {
            Ok(()) | Err(BridgeError::NotFound(_)) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stored file"),
        }
    }

    fn emit(&self, event: LibraryEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Library(event)).ok();
        }
    }
}

#[async_trait]
impl ContentSource for ContentStore {
    async fn load_content(&self, file: &LibraryFile) -> Result<Bytes> {
        let path = self.blob_path(&file.content_hash, &file.extension);
        self.fs.read_file(&path).await.map_err(|e| match e {
            BridgeError::NotFound(_) => LibraryError::not_found("file content", file.id),
            other => other.into(),
        })
    }

    async fn load_cover(&self, cover_ref: &str) -> Result<Bytes> {
        self.read_cover(cover_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use chrono::{Duration, TimeZone, Utc};
    use bridge_traits::time::ManualClock;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("kiosk-store-{}", uuid::Uuid::new_v4()))
    }

    fn fake_audio(tag: &str) -> Bytes {
        let mut bytes = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
        bytes.extend_from_slice(tag.as_bytes());
        Bytes::from(bytes)
    }

    fn metadata(title: &str, artist: &str, album: &str) -> TrackMetadata {
        TrackMetadata {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
            duration_seconds: 180,
            cover: None,
        }
    }

    async fn open_store(root: &Path) -> ContentStore {
        let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::with_data_directory(root.to_path_buf()));
        ContentStore::open(fs, root).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_is_content_addressed() {
        let root = scratch_dir();
        let store = open_store(&root).await;

        let first = store
            .put(fake_audio("one"), metadata("One", "A", "X"))
            .await
            .unwrap();
        let again = store
            .put(fake_audio("one"), metadata("Other Title", "B", "Y"))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_eq!(store.list(None).await.len(), 1);
        assert_eq!(store.read_content(first.id).await.unwrap(), fake_audio("one"));
        assert_eq!(first.extension, "mp3");
        assert_eq!(first.size_bytes, fake_audio("one").len() as u64);
    }

    #[tokio::test]
    async fn test_duplicate_with_blank_tags_returns_existing_file() {
        let root = scratch_dir();
        let store = open_store(&root).await;

        let first = store
            .put(fake_audio("blank"), metadata("Blank", "A", "X"))
            .await
            .unwrap();
        let again = store
            .put(fake_audio("blank"), metadata("  ", "", ""))
            .await
            .unwrap();
        assert_eq!(first.id, again.id);

        let err = store
            .put(fake_audio("new"), metadata("", "A", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_delete_and_put_keep_listed_content_readable() {
        let root = scratch_dir();
        let store = Arc::new(open_store(&root).await);

        for round in 0..20 {
            let data = fake_audio(&format!("race-{round}"));
            let file = store
                .put(data.clone(), metadata("Race", "A", "X"))
                .await
                .unwrap();

            let deleting = {
                let store = store.clone();
                tokio::spawn(async move { store.delete(file.id).await })
            };
            let putting = {
                let store = store.clone();
                let data = data.clone();
                tokio::spawn(async move { store.put(data, metadata("Race", "A", "X")).await })
            };
            deleting.await.unwrap().unwrap();
            putting.await.unwrap().unwrap();

            for listed in store.list(None).await {
                assert_eq!(store.read_content(listed.id).await.unwrap(), data);
                store.delete(listed.id).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_put_rejects_non_audio() {
        let root = scratch_dir();
        let store = open_store(&root).await;

        let err = store
            .put(Bytes::from_static(b"%PDF-1.7 not audio"), metadata("Doc", "A", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::UnsupportedFormat(_)));
        assert!(store.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_leaves_dangling_refs() {
        let root = scratch_dir();
        let store = open_store(&root).await;
        let file = store.put(fake_audio("x"), metadata("X", "A", "B")).await.unwrap();
        let playlist = store.create_playlist("Morning").await.unwrap();
        store.add_to_playlist(playlist.id, &[file.id]).await.unwrap();

        assert!(store.delete(file.id).await.unwrap());
        assert!(!store.delete(file.id).await.unwrap());

        let entries = store.resolve_playlist(playlist.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dangling());
        assert!(matches!(
            store.read_content(file.id).await,
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_add_to_playlist_is_atomic() {
        let root = scratch_dir();
        let store = open_store(&root).await;
        let file = store.put(fake_audio("a"), metadata("A", "A", "A")).await.unwrap();
        let playlist = store.create_playlist("Mix").await.unwrap();

        let err = store
            .add_to_playlist(playlist.id, &[file.id, FileId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
        assert!(store
            .get_playlist(playlist.id)
            .await
            .unwrap()
            .track_ids
            .is_empty());

        let updated = store
            .add_to_playlist(playlist.id, &[file.id, file.id])
            .await
            .unwrap();
        assert_eq!(updated.track_ids, vec![file.id, file.id]);

        let updated = store.remove_from_playlist(playlist.id, &[file.id]).await.unwrap();
        assert!(updated.track_ids.is_empty());

        assert!(matches!(
            store.add_to_playlist(PlaylistId::new(), &[file.id]).await,
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_playlist_rejects_blank_name() {
        let root = scratch_dir();
        let store = open_store(&root).await;
        assert!(matches!(
            store.create_playlist("  ").await,
            Err(LibraryError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_order_and_filter() {
        let root = scratch_dir();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let store = open_store(&root).await.with_clock(clock.clone());

        store.put(fake_audio("1"), metadata("Around the World", "Daft Punk", "Homework")).await.unwrap();
        clock.advance(Duration::seconds(1));
        store.put(fake_audio("2"), metadata("Teardrop", "Massive Attack", "Mezzanine")).await.unwrap();
        clock.advance(Duration::seconds(1));
        store.put(fake_audio("3"), metadata("Da Funk", "Daft Punk", "Homework")).await.unwrap();

        let titles: Vec<_> = store.list(None).await.into_iter().map(|f| f.title).collect();
        assert_eq!(titles, vec!["Around the World", "Teardrop", "Da Funk"]);

        let daft = store
            .list(Some(&LibraryFilter::default().with_artist("Daft Punk")))
            .await;
        assert_eq!(daft.len(), 2);

        let search = store.list(Some(&LibraryFilter::text("MEZZ"))).await;
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].title, "Teardrop");
    }

    #[tokio::test]
    async fn test_catalog_survives_reopen() {
        let root = scratch_dir();
        let (file, playlist) = {
            let store = open_store(&root).await;
            let file = store.put(fake_audio("keep"), metadata("Keep", "A", "B")).await.unwrap();
            let playlist = store.create_playlist("Saved").await.unwrap();
            store.add_to_playlist(playlist.id, &[file.id]).await.unwrap();
            (file, playlist)
        };

        let reopened = open_store(&root).await;
        assert_eq!(reopened.get(file.id).await, Some(file.clone()));
        assert_eq!(reopened.find_by_hash(&file.content_hash).await, Some(file.clone()));
        let saved = reopened.get_playlist(playlist.id).await.unwrap();
        assert_eq!(saved.track_ids, vec![file.id]);

        let snapshot: CatalogSnapshot =
            serde_json::from_slice(&reopened.catalog_bytes().await.unwrap()).unwrap();
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.playlists.len(), 1);
    }

    #[tokio::test]
    async fn test_cover_is_shared_and_removed_with_last_reference() {
        let root = scratch_dir();
        let store = open_store(&root).await;
        let cover = CoverArt {
            data: Bytes::from_static(b"\xFF\xD8\xFF\xE0 jpeg"),
            mime_type: "image/jpeg".to_string(),
        };

        let mut first_meta = metadata("One", "A", "Album");
        first_meta.cover = Some(cover.clone());
        let mut second_meta = metadata("Two", "A", "Album");
        second_meta.cover = Some(cover.clone());

        let first = store.put(fake_audio("c1"), first_meta).await.unwrap();
        let second = store.put(fake_audio("c2"), second_meta).await.unwrap();
        let cover_ref = first.cover_ref.clone().unwrap();
        assert_eq!(second.cover_ref.as_deref(), Some(cover_ref.as_str()));
        assert!(cover_ref.ends_with(".jpg"));

        store.delete(first.id).await.unwrap();
        assert_eq!(store.read_cover(&cover_ref).await.unwrap(), cover.data);

        store.delete(second.id).await.unwrap();
        assert!(matches!(
            store.read_cover(&cover_ref).await,
            Err(LibraryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let root = scratch_dir();
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let store = open_store(&root).await.with_event_bus(bus);

        let file = store.put(fake_audio("evt"), metadata("Evt", "A", "B")).await.unwrap();
        match rx.recv().await.unwrap() {
            CoreEvent::Library(LibraryEvent::TrackAdded { track_id, .. }) => {
                assert_eq!(track_id, file.id.to_string())
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
