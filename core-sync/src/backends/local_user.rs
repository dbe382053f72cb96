//! Local OS user copy
//!
//! Tracks land at `{home_music_path}/{artist}/{album}/{title}.{ext}`, written
//! through a `.part` file and renamed into place. A hidden
//! `.{file}.sha256` sidecar records the content hash; a destination whose
//! sidecar matches is left alone.
//!
//! Two library files with identical tags map to the same name. When the
//! sidecar at that name records a different hash, the track goes to
//! `{title} [{hash8}].{ext}` instead, so neither copy overwrites the other.

use async_trait::async_trait;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use core_library::{ContentSource, LibraryFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::{
    settings_document, wrong_target, PushContext, PushReport, TransferBackend, TransferItem,
    TransferPlan,
};
use crate::error::{Result, SyncError};
use crate::target::{ReplicationSettings, ReplicationTarget};

/// Engine-owned directory inside the user's music folder.
const KIOSK_DIR: &str = ".kiosk";
const SETTINGS_FILE: &str = "replication.json";
/// Hash prefix length used to tell same-named tracks apart.
const HASH_SUFFIX_LEN: usize = 8;

pub struct LocalUserCopy {
    fs: Arc<dyn FileSystemAccess>,
    source: Arc<dyn ContentSource>,
    chunk_size: usize,
}

impl LocalUserCopy {
    pub fn new(
        fs: Arc<dyn FileSystemAccess>,
        source: Arc<dyn ContentSource>,
        chunk_size: usize,
    ) -> Self {
        Self {
            fs,
            source,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Destination of a track under the user's music folder.
    pub fn track_path(home: &Path, file: &LibraryFile) -> PathBuf {
        home.join(sanitize_segment(&file.artist))
            .join(sanitize_segment(&file.album))
            .join(format!(
                "{}.{}",
                sanitize_segment(&file.title),
                sanitize_segment(&file.extension)
            ))
    }

    /// Alternative destination used when [`Self::track_path`] belongs to
    /// different content.
    pub fn disambiguated_path(home: &Path, file: &LibraryFile) -> PathBuf {
        let short_hash: String = file.content_hash.chars().take(HASH_SUFFIX_LEN).collect();
        Self::track_path(home, file).with_file_name(format!(
            "{} [{}].{}",
            sanitize_segment(&file.title),
            short_hash,
            sanitize_segment(&file.extension)
        ))
    }

    /// Pick the preferred path unless another track already owns it.
    async fn destination(&self, home: &Path, file: &LibraryFile) -> Result<PathBuf> {
        let preferred = Self::track_path(home, file);
        match self.recorded_hash(&preferred).await? {
            Some(owner) if owner != file.content_hash => {
                debug!(path = %preferred.display(), "Name taken by other content");
                Ok(Self::disambiguated_path(home, file))
            }
            _ => Ok(preferred),
        }
    }

    /// Hash in the sidecar of an existing destination.
    async fn recorded_hash(&self, path: &Path) -> Result<Option<String>> {
        if !self.fs.exists(path).await? {
            return Ok(None);
        }
        let sidecar = Self::sidecar_path(path);
        if !self.fs.exists(&sidecar).await? {
            return Ok(None);
        }
        let recorded = self.fs.read_file(&sidecar).await?;
        Ok(Some(String::from_utf8_lossy(&recorded).trim().to_string()))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.sha256"))
    }

    fn part_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{name}.part"))
    }

    async fn is_current(&self, path: &Path, content_hash: &str) -> Result<bool> {
        Ok(self.recorded_hash(path).await?.as_deref() == Some(content_hash))
    }

    /// Stream `data` into `path` via a `.part` file, chunk by chunk.
    async fn write_atomically(
        &self,
        path: &Path,
        data: &Bytes,
        label: &str,
        ctx: &PushContext,
    ) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.fs.create_dir_all(parent).await?;
        }

        let part = Self::part_path(path);
        let total = data.len() as u64;
        let mut writer = self.fs.open_write_stream(&part).await?;
        let mut sent = 0u64;

        for chunk in data.chunks(self.chunk_size) {
            if ctx.check_cancelled().is_err() {
                drop(writer);
                self.discard(&part).await;
                return Err(SyncError::Cancelled);
            }
            if let Err(e) = writer.write_all(chunk).await {
                drop(writer);
                self.discard(&part).await;
                return Err(bridge_traits::error::BridgeError::Io(e).into());
            }
            sent += chunk.len() as u64;
            ctx.progress.report(label, sent, total);
        }

        if let Err(e) = writer.shutdown().await {
            drop(writer);
            self.discard(&part).await;
            return Err(bridge_traits::error::BridgeError::Io(e).into());
        }
        drop(writer);

        if total == 0 {
            ctx.progress.report(label, 0, 0);
        }
        self.fs.rename(&part, path).await?;
        Ok(())
    }

    async fn discard(&self, part: &Path) {
        if let Err(e) = self.fs.delete_file(part).await {
            warn!(path = %part.display(), error = %e, "Failed to remove partial file");
        }
    }

    async fn copy_track(
        &self,
        home: &Path,
        file: &LibraryFile,
        ctx: &PushContext,
        report: &mut PushReport,
    ) -> Result<()> {
        let path = self.destination(home, file).await?;
        let label = file.display_name();

        if self.is_current(&path, &file.content_hash).await? {
            debug!(path = %path.display(), "Identical file already present");
            ctx.progress.report(&label, file.size_bytes, file.size_bytes);
            report.skipped();
            return Ok(());
        }

        let data = self.source.load_content(file).await?;
        self.write_atomically(&path, &data, &label, ctx).await?;
        self.fs
            .write_file(
                &Self::sidecar_path(&path),
                Bytes::from(file.content_hash.clone()),
            )
            .await?;

        report.transferred(data.len() as u64);
        Ok(())
    }

    async fn copy_auxiliary(&self, home: &Path, item: &TransferItem, ctx: &PushContext) -> Result<()> {
        let kiosk = home.join(KIOSK_DIR);
        match item {
            TransferItem::Track(_) => Ok(()),
            TransferItem::Cover { cover_ref } => {
                let path = kiosk.join("covers").join(sanitize_segment(cover_ref));
                // Covers are content-addressed.
                if self.fs.exists(&path).await? {
                    return Ok(());
                }
                let data = self.source.load_cover(cover_ref).await?;
                self.write_atomically(&path, &data, cover_ref, ctx).await
            }
            TransferItem::Inline { key, data } => {
                let mut path = kiosk.clone();
                for segment in key.split('/').filter(|s| !s.is_empty()) {
                    path.push(sanitize_segment(segment));
                }
                self.write_atomically(&path, data, key, ctx).await
            }
        }
    }
}

#[async_trait]
impl TransferBackend for LocalUserCopy {
    #[instrument(skip_all, fields(target = %ctx.target_key, attempt = ctx.attempt))]
    async fn push(
        &self,
        plan: &TransferPlan,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<PushReport> {
        let ReplicationTarget::LocalUser {
            home_music_path, ..
        } = target
        else {
            return Err(wrong_target("local user copy", target));
        };

        let mut report = PushReport::default();
        for item in plan.items() {
            ctx.check_cancelled()?;
            match item {
                TransferItem::Track(file) => {
                    self.copy_track(home_music_path, file, ctx, &mut report)
                        .await?
                }
                other => self.copy_auxiliary(home_music_path, other, ctx).await?,
            }
        }

        info!(
            files = report.files_count,
            transferred = report.files_transferred,
            skipped = report.files_skipped,
            "Local user copy finished"
        );
        Ok(report)
    }

    async fn push_settings(
        &self,
        settings: &ReplicationSettings,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<()> {
        let ReplicationTarget::LocalUser {
            home_music_path, ..
        } = target
        else {
            return Err(wrong_target("local user copy", target));
        };

        let path = home_music_path.join(KIOSK_DIR).join(SETTINGS_FILE);
        let document = settings_document(settings)?;
        self.write_atomically(&path, &document, SETTINGS_FILE, ctx)
            .await
    }
}

/// Make a metadata value safe as a single path component.
pub fn sanitize_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, library_file};
    use super::*;
    use bridge_desktop::TokioFileSystem;
    use core_library::LibraryError;
    use std::collections::HashMap;

    struct MapSource {
        content: HashMap<String, Bytes>,
    }

    #[async_trait]
    impl ContentSource for MapSource {
        async fn load_content(&self, file: &LibraryFile) -> core_library::Result<Bytes> {
            self.content
                .get(&file.content_hash)
                .cloned()
                .ok_or_else(|| LibraryError::not_found("file", file.id))
        }

        async fn load_cover(&self, cover_ref: &str) -> core_library::Result<Bytes> {
            Err(LibraryError::not_found("cover", cover_ref))
        }
    }

    fn temp_home() -> PathBuf {
        std::env::temp_dir().join(format!("kiosk-home-{}", uuid::Uuid::new_v4()))
    }

    fn backend(files: &[(&LibraryFile, &[u8])], chunk_size: usize) -> LocalUserCopy {
        let content = files
            .iter()
            .map(|(f, data)| (f.content_hash.clone(), Bytes::copy_from_slice(data)))
            .collect();
        LocalUserCopy::new(
            Arc::new(TokioFileSystem::with_data_directory(std::env::temp_dir())),
            Arc::new(MapSource { content }),
            chunk_size,
        )
    }

    fn target(home: &Path) -> ReplicationTarget {
        ReplicationTarget::LocalUser {
            username: "ana".into(),
            home_music_path: home.to_path_buf(),
        }
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment("AC/DC"), "AC_DC");
        assert_eq!(sanitize_segment(".."), "_");
        assert_eq!(sanitize_segment("  What?  "), "What_");
        assert_eq!(sanitize_segment(""), "_");
    }

    #[tokio::test]
    async fn test_copies_into_artist_album_layout() {
        let home = temp_home();
        let file = library_file("One More Time", b"0123456789");
        let backend = backend(&[(&file, b"0123456789")], 4);
        let plan = TransferPlan::for_files(vec![file.clone()], &ReplicationSettings::default());
        let (ctx, mut progress) = context("user:ana");

        let report = backend.push(&plan, &target(&home), &ctx).await.unwrap();
        assert_eq!(report.files_transferred, 1);

        let dest = home.join("Daft Punk").join("Discovery").join("One More Time.mp3");
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        let sidecar = home.join("Daft Punk").join("Discovery").join(".One More Time.mp3.sha256");
        assert_eq!(std::fs::read_to_string(sidecar).unwrap(), file.content_hash);
        assert!(!home
            .join("Daft Punk")
            .join("Discovery")
            .join("One More Time.mp3.part")
            .exists());

        let mut last = 0;
        while let Ok(sample) = progress.try_recv() {
            assert!(sample.bytes_sent >= last);
            last = sample.bytes_sent;
        }
        assert_eq!(last, 10);

        std::fs::remove_dir_all(&home).ok();
    }

    #[tokio::test]
    async fn test_identical_file_is_skipped() {
        let home = temp_home();
        let file = library_file("Aerodynamic", b"abc");
        let backend = backend(&[(&file, b"abc")], 1024);
        let plan = TransferPlan::for_files(vec![file], &ReplicationSettings::default());

        let (ctx, _rx) = context("user:ana");
        backend.push(&plan, &target(&home), &ctx).await.unwrap();

        let (ctx, _rx) = context("user:ana");
        let report = backend.push(&plan, &target(&home), &ctx).await.unwrap();
        assert_eq!(report.files_count, 1);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_transferred, 0);

        std::fs::remove_dir_all(&home).ok();
    }

    #[tokio::test]
    async fn test_same_tags_different_content_get_distinct_paths() {
        let home = temp_home();
        let first = library_file("Voyager", b"first take");
        let second = library_file("Voyager", b"second take");
        let backend = backend(&[(&first, b"first take"), (&second, b"second take")], 1024);
        let plan = TransferPlan::for_files(
            vec![first.clone(), second.clone()],
            &ReplicationSettings::default(),
        );

        let (ctx, _rx) = context("user:ana");
        let report = backend.push(&plan, &target(&home), &ctx).await.unwrap();
        assert_eq!(report.files_count, 2);
        assert_eq!(report.files_transferred, 2);

        let preferred = LocalUserCopy::track_path(&home, &first);
        let alternative = LocalUserCopy::disambiguated_path(&home, &second);
        assert_ne!(preferred, alternative);
        assert_eq!(std::fs::read(&preferred).unwrap(), b"first take");
        assert_eq!(std::fs::read(&alternative).unwrap(), b"second take");

        let (ctx, _rx) = context("user:ana");
        let report = backend.push(&plan, &target(&home), &ctx).await.unwrap();
        assert_eq!(report.files_skipped, 2);
        assert_eq!(report.files_transferred, 0);
        assert_eq!(std::fs::read(&preferred).unwrap(), b"first take");

        std::fs::remove_dir_all(&home).ok();
    }

    #[tokio::test]
    async fn test_cancel_removes_partial_file() {
        let home = temp_home();
        let file = library_file("Digital Love", b"0123456789");
        let backend = backend(&[(&file, b"0123456789")], 2);
        let plan = TransferPlan::for_files(vec![file], &ReplicationSettings::default());
        let (ctx, _rx) = context("user:ana");
        ctx.cancel.cancel();

        let err = backend.push(&plan, &target(&home), &ctx).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(!home
            .join("Daft Punk")
            .join("Discovery")
            .join("Digital Love.mp3")
            .exists());

        std::fs::remove_dir_all(&home).ok();
    }

    #[tokio::test]
    async fn test_settings_written_under_kiosk_dir() {
        let home = temp_home();
        let backend = backend(&[], 1024);
        let (ctx, _rx) = context("user:ana");
        backend
            .push_settings(&ReplicationSettings::default(), &target(&home), &ctx)
            .await
            .unwrap();

        let written = std::fs::read_to_string(home.join(".kiosk").join("replication.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["includeCovers"], true);

        std::fs::remove_dir_all(&home).ok();
    }

    #[tokio::test]
    async fn test_rejects_other_target_kinds() {
        let backend = backend(&[], 1024);
        let (ctx, _rx) = context("bucket:b1");
        let err = backend
            .push(
                &TransferPlan::default(),
                &ReplicationTarget::cloud_bucket("b1"),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput { .. }));
    }
}
