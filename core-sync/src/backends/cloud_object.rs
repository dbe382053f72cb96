//! Cloud object upload
//!
//! Uploads a transfer plan into a bucket of an S3-compatible store.
//!
//! ## Key layout
//!
//! ```text
//! tracks/{content_hash}.{ext}
//! covers/{cover_ref}
//! catalog/catalog.json          # inline items keep their own key
//! config/replication.json
//! ```
//!
//! Tracks whose key already exists with the same size are skipped. Payloads
//! above the multipart threshold go through a multipart upload with parts of
//! threshold size; the upload is aborted on error or cancellation. Buckets
//! created with object lock receive a compliance retention deadline on every
//! write, using the bucket's stored default retention or the configured
//! fallback when the bucket has none.

use async_trait::async_trait;
use bridge_traits::object_store::{BucketInfo, CompletedPart, ObjectStore, PutOptions};
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_library::{ContentSource, LibraryFile};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{
    settings_document, wrong_target, PushContext, PushReport, TransferBackend, TransferItem,
    TransferPlan,
};
use crate::error::{Result, SyncError};
use crate::target::{ReplicationSettings, ReplicationTarget};

pub const SETTINGS_OBJECT_KEY: &str = "config/replication.json";

pub fn track_key(file: &LibraryFile) -> String {
    format!("tracks/{}.{}", file.content_hash, file.extension)
}

pub fn cover_key(cover_ref: &str) -> String {
    format!("covers/{cover_ref}")
}

pub struct CloudObjectUpload {
    store: Arc<dyn ObjectStore>,
    source: Arc<dyn ContentSource>,
    clock: Arc<dyn Clock>,
    multipart_threshold: usize,
    default_retention: Duration,
}

impl CloudObjectUpload {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        source: Arc<dyn ContentSource>,
        clock: Arc<dyn Clock>,
        multipart_threshold: usize,
        default_retention: Duration,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            multipart_threshold: multipart_threshold.max(1),
            default_retention,
        }
    }

    pub fn retention_for(&self, bucket: &BucketInfo) -> Duration {
        bucket.default_retention.unwrap_or(self.default_retention)
    }

    fn retain_until(&self, bucket: &BucketInfo) -> Result<Option<DateTime<Utc>>> {
        if !bucket.object_lock_enabled {
            return Ok(None);
        }
        let retention = chrono::Duration::from_std(self.retention_for(bucket))
            .map_err(|e| SyncError::invalid_input("retention", e.to_string()))?;
        Ok(Some(self.clock.now() + retention))
    }

    async fn already_uploaded(&self, bucket: &str, key: &str, size: Option<u64>) -> Result<bool> {
        Ok(match self.store.head_object(bucket, key).await? {
            Some(existing) => size.map_or(true, |size| existing.size_bytes == size),
            None => false,
        })
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        label: &str,
        data: Bytes,
        options: &PutOptions,
        ctx: &PushContext,
    ) -> Result<u64> {
        let total = data.len() as u64;
        ctx.progress.report(label, 0, total);

        if data.len() <= self.multipart_threshold {
            self.store.put_object(bucket, key, data, options).await?;
        } else {
            self.upload_multipart(bucket, key, label, data, options, ctx)
                .await?;
        }

        ctx.progress.report(label, total, total);
        Ok(total)
    }

    async fn upload_multipart(
        &self,
        bucket: &str,
        key: &str,
        label: &str,
        data: Bytes,
        options: &PutOptions,
        ctx: &PushContext,
    ) -> Result<()> {
        let upload_id = self.store.begin_multipart(bucket, key, options).await?;
        debug!(key, upload_id = %upload_id, "Started multipart upload");

        match self
            .upload_parts(bucket, key, &upload_id, label, &data, ctx)
            .await
        {
            Ok(parts) => {
                self.store
                    .complete_multipart(bucket, key, &upload_id, &parts)
                    .await?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self.store.abort_multipart(bucket, key, &upload_id).await {
                    warn!(key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        label: &str,
        data: &Bytes,
        ctx: &PushContext,
    ) -> Result<Vec<CompletedPart>> {
        let total = data.len();
        let mut parts = Vec::new();
        let mut offset = 0;
        let mut part_number = 1u32;

        while offset < total {
            ctx.check_cancelled()?;
            let end = (offset + self.multipart_threshold).min(total);
            let part = self
                .store
                .upload_part(bucket, key, upload_id, part_number, data.slice(offset..end))
                .await?;
            parts.push(part);
            offset = end;
            part_number += 1;
            ctx.progress.report(label, offset as u64, total as u64);
        }

        Ok(parts)
    }

    async fn push_item(
        &self,
        bucket: &BucketInfo,
        item: &TransferItem,
        retain_until: Option<DateTime<Utc>>,
        ctx: &PushContext,
        report: &mut PushReport,
    ) -> Result<()> {
        match item {
            TransferItem::Track(file) => {
                let key = track_key(file);
                let label = file.display_name();
                if self
                    .already_uploaded(&bucket.name, &key, Some(file.size_bytes))
                    .await?
                {
                    ctx.progress.report(&label, file.size_bytes, file.size_bytes);
                    report.skipped();
                    return Ok(());
                }
                let data = self.source.load_content(file).await?;
                let options = PutOptions {
                    content_type: Some(file.mime_type.clone()),
                    retain_until,
                };
                let bytes = self
                    .upload(&bucket.name, &key, &label, data, &options, ctx)
                    .await?;
                report.transferred(bytes);
            }
            TransferItem::Cover { cover_ref } => {
                let key = cover_key(cover_ref);
                if self.already_uploaded(&bucket.name, &key, None).await? {
                    return Ok(());
                }
                let data = self.source.load_cover(cover_ref).await?;
                let options = PutOptions {
                    content_type: Some(image_content_type(cover_ref).to_string()),
                    retain_until,
                };
                self.upload(&bucket.name, &key, cover_ref, data, &options, ctx)
                    .await?;
            }
            TransferItem::Inline { key, data } => {
                let options = PutOptions {
                    content_type: Some("application/json".to_string()),
                    retain_until,
                };
                self.upload(&bucket.name, key, key, data.clone(), &options, ctx)
                    .await?;
            }
        }
        Ok(())
    }
}

fn image_content_type(cover_ref: &str) -> &'static str {
    match cover_ref.rsplit('.').next() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[async_trait]
impl TransferBackend for CloudObjectUpload {
    #[instrument(skip_all, fields(target = %ctx.target_key, attempt = ctx.attempt))]
    async fn push(
        &self,
        plan: &TransferPlan,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<PushReport> {
        let ReplicationTarget::CloudBucket { bucket_name } = target else {
            return Err(wrong_target("cloud object upload", target));
        };
        ctx.check_cancelled()?;

        let bucket = self.store.bucket_info(bucket_name).await?;
        let retain_until = self.retain_until(&bucket)?;
        let mut report = PushReport::default();

        for item in plan.items() {
            ctx.check_cancelled()?;
            self.push_item(&bucket, item, retain_until, ctx, &mut report)
                .await?;
        }

        info!(
            bucket = %bucket.name,
            transferred = report.files_transferred,
            skipped = report.files_skipped,
            "Cloud upload finished"
        );
        Ok(report)
    }

    async fn push_settings(
        &self,
        settings: &ReplicationSettings,
        target: &ReplicationTarget,
        ctx: &PushContext,
    ) -> Result<()> {
        let ReplicationTarget::CloudBucket { bucket_name } = target else {
            return Err(wrong_target("cloud object upload", target));
        };
        ctx.check_cancelled()?;

        let bucket = self.store.bucket_info(bucket_name).await?;
        let options = PutOptions {
            content_type: Some("application/json".to_string()),
            retain_until: self.retain_until(&bucket)?,
        };
        self.upload(
            &bucket.name,
            SETTINGS_OBJECT_KEY,
            "settings",
            settings_document(settings)?,
            &options,
            ctx,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, library_file};
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::object_store::{BucketSettings, ObjectInfo};
    use bridge_traits::time::{ManualClock, SystemClock};
    use core_library::LibraryError;
    use provider_s3::MemoryObjectStore;
    use std::collections::HashMap;

    struct StaticSource(HashMap<String, Bytes>);

    #[async_trait]
    impl ContentSource for StaticSource {
        async fn load_content(&self, file: &LibraryFile) -> core_library::Result<Bytes> {
            self.0
                .get(&file.content_hash)
                .cloned()
                .ok_or_else(|| LibraryError::not_found("file", file.id))
        }

        async fn load_cover(&self, cover_ref: &str) -> core_library::Result<Bytes> {
            self.0
                .get(cover_ref)
                .cloned()
                .ok_or_else(|| LibraryError::not_found("cover", cover_ref))
        }
    }

    fn source(entries: Vec<(String, &'static [u8])>) -> Arc<StaticSource> {
        Arc::new(StaticSource(
            entries
                .into_iter()
                .map(|(k, v)| (k, Bytes::from_static(v)))
                .collect(),
        ))
    }

    async fn store_with_bucket(settings: BucketSettings) -> Arc<MemoryObjectStore> {
        let store = Arc::new(MemoryObjectStore::new());
        store.create_bucket("meu-bucket", settings).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_uploads_tracks_covers_and_inline_documents() {
        let mut a = library_file("One More Time", b"track-a");
        a.cover_ref = Some("cover1.png".into());
        let store = store_with_bucket(BucketSettings::default()).await;
        let backend = CloudObjectUpload::new(
            store.clone(),
            source(vec![
                (a.content_hash.clone(), b"track-a"),
                ("cover1.png".into(), b"png"),
            ]),
            Arc::new(SystemClock),
            1024,
            Duration::from_secs(60),
        );

        let plan = TransferPlan::for_files(vec![a.clone()], &ReplicationSettings::default())
            .with_inline("catalog/catalog.json", Bytes::from_static(b"{}"));
        let (ctx, _rx) = context("bucket:meu-bucket");
        let report = backend
            .push(&plan, &ReplicationTarget::cloud_bucket("meu-bucket"), &ctx)
            .await
            .unwrap();

        assert_eq!(report.files_count, 1);
        assert_eq!(report.files_transferred, 1);
        assert_eq!(
            store.read_object("meu-bucket", &track_key(&a), None).unwrap(),
            Bytes::from_static(b"track-a")
        );
        assert!(store.read_object("meu-bucket", "covers/cover1.png", None).is_some());
        assert!(store.read_object("meu-bucket", "catalog/catalog.json", None).is_some());

        // Second push skips the track that is already there.
        let (ctx, _rx) = context("bucket:meu-bucket");
        let report = backend
            .push(&plan, &ReplicationTarget::cloud_bucket("meu-bucket"), &ctx)
            .await
            .unwrap();
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_transferred, 0);
    }

    #[tokio::test]
    async fn test_large_payload_uses_multipart() {
        let content: &'static [u8] = b"0123456789abcdefghij";
        let a = library_file("Big", content);
        let store = store_with_bucket(BucketSettings::default()).await;
        let backend = CloudObjectUpload::new(
            store.clone(),
            source(vec![(a.content_hash.clone(), content)]),
            Arc::new(SystemClock),
            8,
            Duration::from_secs(60),
        );

        let plan = TransferPlan::for_files(vec![a.clone()], &ReplicationSettings::default());
        let (ctx, mut rx) = context("bucket:meu-bucket");
        backend
            .push(&plan, &ReplicationTarget::cloud_bucket("meu-bucket"), &ctx)
            .await
            .unwrap();

        assert_eq!(
            store.read_object("meu-bucket", &track_key(&a), None).unwrap(),
            Bytes::from_static(content)
        );
        assert_eq!(store.pending_uploads(), 0);

        let mut sent = Vec::new();
        while let Ok(progress) = rx.try_recv() {
            sent.push(progress.bytes_sent);
        }
        assert_eq!(sent, vec![0, 8, 16, 20, 20]);
    }

    /// Delegates to a memory store and fires a cancel token after the first part.
    struct CancelAfterFirstPart {
        inner: Arc<MemoryObjectStore>,
        token: tokio_util::sync::CancellationToken,
    }

    #[async_trait]
    impl ObjectStore for CancelAfterFirstPart {
        async fn probe(&self) -> BridgeResult<()> {
            self.inner.probe().await
        }
        async fn create_bucket(&self, name: &str, settings: BucketSettings) -> BridgeResult<BucketInfo> {
            self.inner.create_bucket(name, settings).await
        }
        async fn delete_bucket(&self, name: &str) -> BridgeResult<()> {
            self.inner.delete_bucket(name).await
        }
        async fn list_buckets(&self) -> BridgeResult<Vec<BucketInfo>> {
            self.inner.list_buckets().await
        }
        async fn bucket_info(&self, name: &str) -> BridgeResult<BucketInfo> {
            self.inner.bucket_info(name).await
        }
        async fn head_object(&self, bucket: &str, key: &str) -> BridgeResult<Option<ObjectInfo>> {
            self.inner.head_object(bucket, key).await
        }
        async fn put_object(&self, bucket: &str, key: &str, data: Bytes, options: &PutOptions) -> BridgeResult<ObjectInfo> {
            self.inner.put_object(bucket, key, data, options).await
        }
        async fn begin_multipart(&self, bucket: &str, key: &str, options: &PutOptions) -> BridgeResult<String> {
            self.inner.begin_multipart(bucket, key, options).await
        }
        async fn upload_part(&self, bucket: &str, key: &str, upload_id: &str, part_number: u32, data: Bytes) -> BridgeResult<CompletedPart> {
            let part = self.inner.upload_part(bucket, key, upload_id, part_number, data).await;
            self.token.cancel();
            part
        }
        async fn complete_multipart(&self, bucket: &str, key: &str, upload_id: &str, parts: &[CompletedPart]) -> BridgeResult<ObjectInfo> {
            self.inner.complete_multipart(bucket, key, upload_id, parts).await
        }
        async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> BridgeResult<()> {
            self.inner.abort_multipart(bucket, key, upload_id).await
        }
        async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> BridgeResult<Vec<ObjectInfo>> {
            self.inner.list_objects(bucket, prefix).await
        }
        async fn list_object_versions(&self, bucket: &str, prefix: Option<&str>) -> BridgeResult<Vec<ObjectInfo>> {
            self.inner.list_object_versions(bucket, prefix).await
        }
        async fn object_retention(&self, bucket: &str, key: &str, version_id: Option<&str>) -> BridgeResult<Option<DateTime<Utc>>> {
            self.inner.object_retention(bucket, key, version_id).await
        }
        async fn delete_object(&self, bucket: &str, key: &str, version_id: Option<&str>) -> BridgeResult<()> {
            self.inner.delete_object(bucket, key, version_id).await
        }
    }

    #[tokio::test]
    async fn test_cancel_aborts_multipart() {
        let content: &'static [u8] = b"0123456789abcdefghij";
        let a = library_file("Big", content);
        let memory = store_with_bucket(BucketSettings::default()).await;
        let (ctx, _rx) = context("bucket:meu-bucket");
        let store = Arc::new(CancelAfterFirstPart {
            inner: memory.clone(),
            token: ctx.cancel.clone(),
        });
        let backend = CloudObjectUpload::new(
            store,
            source(vec![(a.content_hash.clone(), content)]),
            Arc::new(SystemClock),
            8,
            Duration::from_secs(60),
        );
        let plan = TransferPlan::for_files(vec![a.clone()], &ReplicationSettings::default());

        let err = backend
            .push(&plan, &ReplicationTarget::cloud_bucket("meu-bucket"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(memory.read_object("meu-bucket", &track_key(&a), None).is_none());
        assert_eq!(memory.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_object_lock_sets_retention() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryObjectStore::new().with_clock(clock.clone()));
        store
            .create_bucket(
                "locked",
                BucketSettings {
                    versioning: true,
                    object_lock: true,
                    default_retention: Some(Duration::from_secs(60)),
                },
            )
            .await
            .unwrap();

        // A fresh uploader knows nothing about the bucket beyond what the
        // store reports.
        let a = library_file("A", b"aaa");
        let backend = CloudObjectUpload::new(
            store.clone(),
            source(vec![(a.content_hash.clone(), b"aaa")]),
            clock.clone(),
            1024,
            Duration::from_secs(3600),
        );

        let plan = TransferPlan::for_files(vec![a.clone()], &ReplicationSettings::default());
        let (ctx, _rx) = context("bucket:locked");
        backend
            .push(&plan, &ReplicationTarget::cloud_bucket("locked"), &ctx)
            .await
            .unwrap();

        let retain = store
            .object_retention("locked", &track_key(&a), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retain, clock.now() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_locked_bucket_without_stored_retention_uses_fallback() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryObjectStore::new().with_clock(clock.clone()));
        store
            .create_bucket(
                "locked",
                BucketSettings {
                    versioning: true,
                    object_lock: true,
                    default_retention: None,
                },
            )
            .await
            .unwrap();

        let backend = CloudObjectUpload::new(
            store.clone(),
            source(vec![]),
            clock.clone(),
            1024,
            Duration::from_secs(3600),
        );
        let (ctx, _rx) = context("bucket:locked");
        backend
            .push_settings(
                &ReplicationSettings::default(),
                &ReplicationTarget::cloud_bucket("locked"),
                &ctx,
            )
            .await
            .unwrap();

        let retain = store
            .object_retention("locked", SETTINGS_OBJECT_KEY, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retain, clock.now() + chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_missing_bucket_is_not_found() {
        let backend = CloudObjectUpload::new(
            Arc::new(MemoryObjectStore::new()),
            source(vec![]),
            Arc::new(SystemClock),
            1024,
            Duration::from_secs(60),
        );
        let (ctx, _rx) = context("bucket:nope");
        let err = backend
            .push_settings(
                &ReplicationSettings::default(),
                &ReplicationTarget::cloud_bucket("nope"),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
