//! Cloud object store abstraction
//!
//! S3-compatible semantics: buckets with optional versioning and object lock,
//! single and multipart PUT, versioned listings and retention queries.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub versioning_enabled: bool,
    pub object_lock_enabled: bool,
    /// Default retention from the bucket's object-lock configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retention: Option<Duration>,
}

/// Options applied when a bucket is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSettings {
    pub versioning: bool,
    pub object_lock: bool,
    /// Stored as the bucket's default object-lock retention. Ignored without
    /// `object_lock`. Stores with day granularity round up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retention: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub version_id: Option<String>,
    pub etag: Option<String>,
    /// Only populated where the backend returns it inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_until: Option<DateTime<Utc>>,
}

/// Write-time options for a single object version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    /// Compliance-mode retention for the written version.
    pub retain_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Access to an S3-compatible object store.
///
/// Deleting a version still under retention must fail with
/// [`BridgeError::ObjectLocked`](crate::error::BridgeError::ObjectLocked).
/// Creating a bucket whose name is taken fails with
/// [`BridgeError::AlreadyExists`](crate::error::BridgeError::AlreadyExists).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Validate the configured access grant with a cheap authenticated call.
    async fn probe(&self) -> Result<()>;

    async fn create_bucket(&self, name: &str, settings: BucketSettings) -> Result<BucketInfo>;

    /// Delete an empty bucket. Fails with `Conflict` when objects remain.
    async fn delete_bucket(&self, name: &str) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    async fn bucket_info(&self, name: &str) -> Result<BucketInfo>;

    /// Latest version of `key`, or `None` when absent.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<ObjectInfo>;

    /// Start a multipart upload and return its upload id.
    async fn begin_multipart(&self, bucket: &str, key: &str, options: &PutOptions)
        -> Result<String>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<CompletedPart>;

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectInfo>;

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// Current (latest) object versions under `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectInfo>>;

    /// Every stored version under `prefix`, newest first per key.
    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>>;

    /// Retention deadline of one version, if any.
    async fn object_retention(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Permanently delete one version.
    ///
    /// With `version_id` set to `None` the latest version is resolved and
    /// removed by id, so on a versioned bucket the previous version becomes
    /// current. No delete marker is written, unlike a bare S3 `DELETE`.
    /// Deleting a key or version that does not exist succeeds.
    async fn delete_object(&self, bucket: &str, key: &str, version_id: Option<&str>)
        -> Result<()>;
}
