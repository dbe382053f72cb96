//! S3 XML document types
//!
//! Request and response bodies of the S3 REST API, (de)serialized with
//! `quick-xml`'s serde support. Only the elements the engine reads are
//! modeled; unknown elements are ignored.

use serde::{Deserialize, Serialize};

/// `<Error>` body returned with every non-2xx response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDocument {
    #[serde(rename = "Code", default)]
    pub code: String,

    #[serde(rename = "Message", default)]
    pub message: String,
}

/// `GET /` (ListBuckets)
#[derive(Debug, Deserialize)]
pub struct ListAllMyBucketsResult {
    #[serde(rename = "Buckets", default)]
    pub buckets: BucketList,
}

#[derive(Debug, Default, Deserialize)]
pub struct BucketList {
    #[serde(rename = "Bucket", default)]
    pub bucket: Vec<BucketEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketEntry {
    #[serde(rename = "Name")]
    pub name: String,

    /// ISO 8601 timestamp
    #[serde(rename = "CreationDate")]
    pub creation_date: String,
}

/// `GET/PUT /{bucket}?versioning`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "VersioningConfiguration")]
pub struct VersioningConfiguration {
    /// `Enabled` or `Suspended`; absent when never enabled
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// `GET/PUT /{bucket}?object-lock`
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "ObjectLockConfiguration")]
pub struct ObjectLockConfiguration {
    #[serde(rename = "ObjectLockEnabled", default)]
    pub object_lock_enabled: Option<String>,

    #[serde(rename = "Rule", default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<ObjectLockRule>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ObjectLockRule {
    #[serde(rename = "DefaultRetention")]
    pub default_retention: DefaultRetention,
}

/// Exactly one of `Days` or `Years` is set.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DefaultRetention {
    #[serde(rename = "Mode")]
    pub mode: String,

    #[serde(rename = "Days", default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,

    #[serde(rename = "Years", default, skip_serializing_if = "Option::is_none")]
    pub years: Option<u32>,
}

/// `GET /{bucket}?list-type=2`
#[derive(Debug, Deserialize)]
pub struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    pub contents: Vec<ListedObject>,

    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,

    #[serde(rename = "NextContinuationToken", default)]
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListedObject {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "LastModified")]
    pub last_modified: String,

    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,

    #[serde(rename = "Size", default)]
    pub size: u64,
}

/// `GET /{bucket}?versions`
///
/// `Version` and `DeleteMarker` elements interleave, which is why the
/// `overlapped-lists` feature of quick-xml is enabled.
#[derive(Debug, Deserialize)]
pub struct ListVersionsResult {
    #[serde(rename = "Version", default)]
    pub versions: Vec<ListedVersion>,

    #[serde(rename = "DeleteMarker", default)]
    pub delete_markers: Vec<DeleteMarkerEntry>,

    #[serde(rename = "IsTruncated", default)]
    pub is_truncated: bool,

    #[serde(rename = "NextKeyMarker", default)]
    pub next_key_marker: Option<String>,

    #[serde(rename = "NextVersionIdMarker", default)]
    pub next_version_id_marker: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListedVersion {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "VersionId", default)]
    pub version_id: Option<String>,

    #[serde(rename = "IsLatest", default)]
    pub is_latest: bool,

    #[serde(rename = "LastModified")]
    pub last_modified: String,

    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,

    #[serde(rename = "Size", default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMarkerEntry {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "VersionId", default)]
    pub version_id: Option<String>,
}

/// `POST /{bucket}/{key}?uploads`
#[derive(Debug, Deserialize)]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

/// Body of `POST /{bucket}/{key}?uploadId=...`
#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUpload {
    #[serde(rename = "Part")]
    pub parts: Vec<CompletePart>,
}

#[derive(Debug, Serialize)]
pub struct CompletePart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,

    #[serde(rename = "ETag")]
    pub etag: String,
}

/// `GET /{bucket}/{key}?retention`
#[derive(Debug, Deserialize)]
pub struct Retention {
    #[serde(rename = "Mode", default)]
    pub mode: Option<String>,

    #[serde(rename = "RetainUntilDate", default)]
    pub retain_until_date: Option<String>,
}
