//! In-memory object store
//!
//! A faithful stand-in for an S3-compatible service: buckets, per-key version
//! stacks, multipart uploads and compliance-mode retention driven by an
//! injectable [`Clock`]. Used by kiosks running without cloud credentials and
//! by the engine's own tests.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::object_store::{
    BucketInfo, BucketSettings, CompletedPart, ObjectInfo, ObjectStore, PutOptions,
};
use bridge_traits::time::{Clock, SystemClock};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: Option<String>,
    data: Bytes,
    last_modified: DateTime<Utc>,
    etag: String,
    retain_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct MemoryBucket {
    info: BucketInfo,
    /// Oldest version first
    objects: BTreeMap<String, Vec<StoredVersion>>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    options: PutOptions,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: BTreeMap<String, MemoryBucket>,
    uploads: HashMap<String, PendingUpload>,
}

/// Versioned, lock-aware object store held entirely in memory.
pub struct MemoryObjectStore {
    clock: Arc<dyn Clock>,
    access_denied: bool,
    state: Mutex<MemoryState>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            access_denied: false,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reject every call as if the access grant were revoked.
    pub fn deny_access(mut self) -> Self {
        self.access_denied = true;
        self
    }

    /// Content of one version, or the latest when `version_id` is `None`.
    pub fn read_object(&self, bucket: &str, key: &str, version_id: Option<&str>) -> Option<Bytes> {
        let state = self.state.lock();
        let versions = state.buckets.get(bucket)?.objects.get(key)?;
        Self::find_version(versions, version_id).map(|v| v.data.clone())
    }

    /// Multipart uploads started but neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    fn check_access(&self) -> Result<()> {
        if self.access_denied {
            return Err(BridgeError::PermissionDenied(
                "access grant rejected".to_string(),
            ));
        }
        Ok(())
    }

    fn find_version<'a>(
        versions: &'a [StoredVersion],
        version_id: Option<&str>,
    ) -> Option<&'a StoredVersion> {
        match version_id {
            Some(id) => versions
                .iter()
                .find(|v| v.version_id.as_deref() == Some(id)),
            None => versions.last(),
        }
    }

    fn to_info(key: &str, version: &StoredVersion) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size_bytes: version.data.len() as u64,
            last_modified: version.last_modified,
            version_id: version.version_id.clone(),
            etag: Some(version.etag.clone()),
            retain_until: version.retain_until,
        }
    }

    fn bucket_mut<'a>(state: &'a mut MemoryState, name: &str) -> Result<&'a mut MemoryBucket> {
        state
            .buckets
            .get_mut(name)
            .ok_or_else(|| BridgeError::NotFound(format!("bucket {name}")))
    }

    /// Store a new version (versioned bucket) or overwrite (unversioned).
    fn commit(
        &self,
        state: &mut MemoryState,
        bucket: &str,
        key: &str,
        data: Bytes,
        etag: String,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        let now = self.clock.now();
        let bucket_state = Self::bucket_mut(state, bucket)?;

        if options.retain_until.is_some() && !bucket_state.info.object_lock_enabled {
            return Err(BridgeError::OperationFailed(format!(
                "bucket {bucket} does not have object lock enabled"
            )));
        }

        let versioned = bucket_state.info.versioning_enabled;
        let versions = bucket_state.objects.entry(key.to_string()).or_default();

        if !versioned {
            versions.clear();
        }

        let version = StoredVersion {
            version_id: versioned.then(|| Uuid::new_v4().simple().to_string()),
            data,
            last_modified: now,
            etag,
            retain_until: options.retain_until,
        };
        let info = Self::to_info(key, &version);
        versions.push(version);

        debug!(bucket, key, version = ?info.version_id, "Committed object");
        Ok(info)
    }

    fn etag_for(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        format!("\"{}\"", &hex::encode(digest)[..32])
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn probe(&self) -> Result<()> {
        self.check_access()
    }

    async fn create_bucket(&self, name: &str, settings: BucketSettings) -> Result<BucketInfo> {
        self.check_access()?;
        let mut state = self.state.lock();
        if state.buckets.contains_key(name) {
            return Err(BridgeError::AlreadyExists(format!("bucket {name}")));
        }

        let info = BucketInfo {
            name: name.to_string(),
            created_at: self.clock.now(),
            versioning_enabled: settings.versioning || settings.object_lock,
            object_lock_enabled: settings.object_lock,
            default_retention: settings.default_retention.filter(|_| settings.object_lock),
        };
        state.buckets.insert(
            name.to_string(),
            MemoryBucket {
                info: info.clone(),
                objects: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.check_access()?;
        let mut state = self.state.lock();
        let bucket = Self::bucket_mut(&mut state, name)?;
        if !bucket.objects.is_empty() {
            return Err(BridgeError::Conflict(format!("bucket {name} is not empty")));
        }
        state.buckets.remove(name);
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.check_access()?;
        Ok(self
            .state
            .lock()
            .buckets
            .values()
            .map(|bucket| bucket.info.clone())
            .collect())
    }

    async fn bucket_info(&self, name: &str) -> Result<BucketInfo> {
        self.check_access()?;
        self.state
            .lock()
            .buckets
            .get(name)
            .map(|bucket| bucket.info.clone())
            .ok_or_else(|| BridgeError::NotFound(format!("bucket {name}")))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>> {
        self.check_access()?;
        let mut state = self.state.lock();
        let bucket_state = Self::bucket_mut(&mut state, bucket)?;
        Ok(bucket_state
            .objects
            .get(key)
            .and_then(|versions| versions.last())
            .map(|version| Self::to_info(key, version)))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        self.check_access()?;
        let etag = Self::etag_for(&data);
        let mut state = self.state.lock();
        self.commit(&mut state, bucket, key, data, etag, options)
    }

    async fn begin_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<String> {
        self.check_access()?;
        let mut state = self.state.lock();
        Self::bucket_mut(&mut state, bucket)?;

        let upload_id = Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<CompletedPart> {
        self.check_access()?;
        let mut state = self.state.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.bucket == bucket && upload.key == key)
            .ok_or_else(|| BridgeError::NotFound(format!("upload {upload_id}")))?;

        let etag = Self::etag_for(&data);
        upload.parts.insert(part_number, data);
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectInfo> {
        self.check_access()?;
        let mut state = self.state.lock();
        let upload = match state.uploads.get(upload_id) {
            Some(upload) if upload.bucket == bucket && upload.key == key => upload,
            _ => return Err(BridgeError::NotFound(format!("upload {upload_id}"))),
        };

        let mut body = BytesMut::new();
        for part in parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                BridgeError::Conflict(format!("part {} was never uploaded", part.part_number))
            })?;
            body.extend_from_slice(data);
        }
        let options = upload.options.clone();
        let etag = format!(
            "{}-{}\"",
            Self::etag_for(&body).trim_end_matches('"'),
            parts.len()
        );

        let info = self.commit(&mut state, bucket, key, body.freeze(), etag, &options)?;
        state.uploads.remove(upload_id);
        Ok(info)
    }

    async fn abort_multipart(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        self.check_access()?;
        self.state.lock().uploads.remove(upload_id);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        self.check_access()?;
        let mut state = self.state.lock();
        let bucket_state = Self::bucket_mut(&mut state, bucket)?;
        Ok(bucket_state
            .objects
            .iter()
            .filter(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
            .filter_map(|(key, versions)| versions.last().map(|v| Self::to_info(key, v)))
            .collect())
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>> {
        self.check_access()?;
        let mut state = self.state.lock();
        let bucket_state = Self::bucket_mut(&mut state, bucket)?;
        Ok(bucket_state
            .objects
            .iter()
            .filter(|(key, _)| prefix.map_or(true, |p| key.starts_with(p)))
            .flat_map(|(key, versions)| {
                versions
                    .iter()
                    .rev()
                    .map(move |version| Self::to_info(key, version))
            })
            .collect())
    }

    async fn object_retention(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.check_access()?;
        let mut state = self.state.lock();
        let bucket_state = Self::bucket_mut(&mut state, bucket)?;
        let versions = bucket_state
            .objects
            .get(key)
            .ok_or_else(|| BridgeError::NotFound(format!("{bucket}/{key}")))?;
        let version = Self::find_version(versions, version_id)
            .ok_or_else(|| BridgeError::NotFound(format!("{bucket}/{key} version")))?;
        Ok(version.retain_until)
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<()> {
        self.check_access()?;
        let now = self.clock.now();
        let mut state = self.state.lock();
        let bucket_state = Self::bucket_mut(&mut state, bucket)?;

        let Some(versions) = bucket_state.objects.get_mut(key) else {
            return Ok(());
        };
        // `None` removes the latest version outright, as the S3 connector does.
        let index = match version_id {
            Some(id) => versions
                .iter()
                .position(|v| v.version_id.as_deref() == Some(id)),
            None => versions.len().checked_sub(1),
        };
        let Some(index) = index else {
            return Ok(());
        };

        if let Some(until) = versions[index].retain_until {
            if until > now {
                return Err(BridgeError::ObjectLocked(format!(
                    "{bucket}/{key} is retained until {until}"
                )));
            }
        }

        versions.remove(index);
        if versions.is_empty() {
            bucket_state.objects.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::{Duration, TimeZone};

    fn versioned() -> BucketSettings {
        BucketSettings {
            versioning: true,
            object_lock: false,
            default_retention: None,
        }
    }

    #[tokio::test]
    async fn test_versioned_puts_keep_history() {
        let store = MemoryObjectStore::new();
        store.create_bucket("kiosk", versioned()).await.unwrap();

        let first = store
            .put_object("kiosk", "catalog.json", Bytes::from_static(b"v1"), &PutOptions::default())
            .await
            .unwrap();
        let second = store
            .put_object("kiosk", "catalog.json", Bytes::from_static(b"v2"), &PutOptions::default())
            .await
            .unwrap();

        assert_ne!(first.version_id, second.version_id);
        let versions = store.list_object_versions("kiosk", None).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_id, second.version_id);
        assert_eq!(store.list_objects("kiosk", None).await.unwrap().len(), 1);
        assert_eq!(
            store.read_object("kiosk", "catalog.json", first.version_id.as_deref()),
            Some(Bytes::from_static(b"v1"))
        );
    }

    #[tokio::test]
    async fn test_delete_latest_restores_previous_without_marker() {
        let store = MemoryObjectStore::new();
        store.create_bucket("kiosk", versioned()).await.unwrap();
        let first = store
            .put_object("kiosk", "catalog.json", Bytes::from_static(b"v1"), &PutOptions::default())
            .await
            .unwrap();
        store
            .put_object("kiosk", "catalog.json", Bytes::from_static(b"v2"), &PutOptions::default())
            .await
            .unwrap();

        store.delete_object("kiosk", "catalog.json", None).await.unwrap();

        let current = store.head_object("kiosk", "catalog.json").await.unwrap().unwrap();
        assert_eq!(current.version_id, first.version_id);
        let versions = store.list_object_versions("kiosk", None).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_id, first.version_id);

        store.delete_object("kiosk", "catalog.json", None).await.unwrap();
        assert!(store.head_object("kiosk", "catalog.json").await.unwrap().is_none());
        assert!(store.list_object_versions("kiosk", None).await.unwrap().is_empty());
        store.delete_object("kiosk", "catalog.json", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_unversioned_put_overwrites() {
        let store = MemoryObjectStore::new();
        store.create_bucket("plain", BucketSettings::default()).await.unwrap();
        store
            .put_object("plain", "a", Bytes::from_static(b"1"), &PutOptions::default())
            .await
            .unwrap();
        let info = store
            .put_object("plain", "a", Bytes::from_static(b"22"), &PutOptions::default())
            .await
            .unwrap();

        assert!(info.version_id.is_none());
        assert_eq!(store.list_object_versions("plain", None).await.unwrap().len(), 1);
        assert_eq!(info.size_bytes, 2);
    }

    #[tokio::test]
    async fn test_retention_blocks_delete_until_expiry() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryObjectStore::new().with_clock(clock.clone());
        store
            .create_bucket(
                "locked",
                BucketSettings {
                    versioning: false,
                    object_lock: true,
                    default_retention: None,
                },
            )
            .await
            .unwrap();

        let info = store
            .put_object(
                "locked",
                "tracks/a.mp3",
                Bytes::from_static(b"audio"),
                &PutOptions {
                    content_type: None,
                    retain_until: Some(start + Duration::days(30)),
                },
            )
            .await
            .unwrap();
        assert!(info.version_id.is_some());

        let err = store
            .delete_object("locked", "tracks/a.mp3", info.version_id.as_deref())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ObjectLocked(_)));

        clock.advance(Duration::days(31));
        store
            .delete_object("locked", "tracks/a.mp3", info.version_id.as_deref())
            .await
            .unwrap();
        assert!(store.head_object("locked", "tracks/a.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retention_requires_lock_bucket() {
        let store = MemoryObjectStore::new();
        store.create_bucket("kiosk", versioned()).await.unwrap();
        let result = store
            .put_object(
                "kiosk",
                "a",
                Bytes::from_static(b"x"),
                &PutOptions {
                    content_type: None,
                    retain_until: Some(Utc::now()),
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_multipart_assembles_parts_in_order() {
        let store = MemoryObjectStore::new();
        store.create_bucket("kiosk", versioned()).await.unwrap();

        let upload = store
            .begin_multipart("kiosk", "big.flac", &PutOptions::default())
            .await
            .unwrap();
        let p2 = store
            .upload_part("kiosk", "big.flac", &upload, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let p1 = store
            .upload_part("kiosk", "big.flac", &upload, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        let info = store
            .complete_multipart("kiosk", "big.flac", &upload, &[p1, p2])
            .await
            .unwrap();

        assert_eq!(info.size_bytes, 11);
        assert_eq!(
            store.read_object("kiosk", "big.flac", None),
            Some(Bytes::from_static(b"hello world"))
        );
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_abort_discards_upload() {
        let store = MemoryObjectStore::new();
        store.create_bucket("kiosk", versioned()).await.unwrap();
        let upload = store
            .begin_multipart("kiosk", "big.flac", &PutOptions::default())
            .await
            .unwrap();
        store
            .upload_part("kiosk", "big.flac", &upload, 1, Bytes::from_static(b"x"))
            .await
            .unwrap();
        store.abort_multipart("kiosk", "big.flac", &upload).await.unwrap();

        assert_eq!(store.pending_uploads(), 0);
        assert!(store.head_object("kiosk", "big.flac").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bucket_lifecycle_errors() {
        let store = MemoryObjectStore::new();
        store.create_bucket("kiosk", versioned()).await.unwrap();
        assert!(matches!(
            store.create_bucket("kiosk", versioned()).await,
            Err(BridgeError::AlreadyExists(_))
        ));

        store
            .put_object("kiosk", "a", Bytes::from_static(b"x"), &PutOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            store.delete_bucket("kiosk").await,
            Err(BridgeError::Conflict(_))
        ));

        store.delete_object("kiosk", "a", None).await.unwrap();
        store.delete_bucket("kiosk").await.unwrap();
        assert!(matches!(
            store.bucket_info("kiosk").await,
            Err(BridgeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_denied_grant() {
        let store = MemoryObjectStore::new().deny_access();
        assert!(matches!(
            store.probe().await,
            Err(BridgeError::PermissionDenied(_))
        ));
    }
}
