//! S3-compatible object store connector
//!
//! Implements [`ObjectStore`] against the S3 REST API using path-style
//! addressing (`{endpoint}/{bucket}/{key}`), which every S3-compatible
//! gateway (Storj, MinIO, Ceph RGW) accepts.
//!
//! The opaque access grant is sent as a bearer token; the gateway is expected
//! to terminate it. Each upload carries an `x-amz-checksum-sha256` header so
//! the service can reject corrupted bodies.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::object_store::{
    BucketInfo, BucketSettings, CompletedPart, ObjectInfo, ObjectStore, PutOptions,
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use core_runtime::config::CloudConfig;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::error::S3Error;
use crate::types::{
    BucketEntry, CompleteMultipartUpload, CompletePart, ErrorDocument, InitiateMultipartUploadResult,
    DefaultRetention, ListAllMyBucketsResult, ListBucketResult, ListVersionsResult,
    ObjectLockConfiguration, ObjectLockRule, Retention, VersioningConfiguration,
};

/// Object-lock mode applied to every retained version.
const LOCK_MODE: &str = "COMPLIANCE";

/// Keys per listing page (S3 maximum)
const MAX_KEYS: u32 = 1000;

const SECS_PER_DAY: u64 = 86_400;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// S3 REST connector
///
/// # Example
///
/// ```ignore
/// use provider_s3::S3ObjectStore;
/// use bridge_traits::object_store::ObjectStore;
///
/// let store = S3ObjectStore::new(http_client, "https://gateway.storjshare.io", grant);
/// store.probe().await?;
/// let buckets = store.list_buckets().await?;
/// ```
pub struct S3ObjectStore {
    http_client: Arc<dyn HttpClient>,
    endpoint: String,
    access_grant: String,
    timeout: Duration,
}

impl S3ObjectStore {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        endpoint: impl Into<String>,
        access_grant: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_grant: access_grant.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(http_client: Arc<dyn HttpClient>, config: &CloudConfig) -> Self {
        Self::new(http_client, &config.endpoint, &config.access_grant)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.endpoint, urlencoding::encode(bucket))
    }

    /// Keys keep their `/` separators; every segment is percent-encoded.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.bucket_url(bucket), encoded.join("/"))
    }

    fn request(&self, method: HttpMethod, url: String) -> HttpRequest {
        HttpRequest::new(method, url)
            .bearer_token(&self.access_grant)
            .timeout(self.timeout)
    }

    fn with_payload(request: HttpRequest, data: Bytes) -> HttpRequest {
        let digest = Sha256::digest(&data);
        request
            .header("x-amz-content-sha256", hex::encode(digest))
            .header("x-amz-checksum-sha256", BASE64.encode(digest))
            .body(data)
    }

    fn with_lock_headers(request: HttpRequest, options: &PutOptions) -> HttpRequest {
        let request = match &options.content_type {
            Some(content_type) => request.header("Content-Type", content_type),
            None => request,
        };
        match options.retain_until {
            Some(until) => request
                .header("x-amz-object-lock-mode", LOCK_MODE)
                .header(
                    "x-amz-object-lock-retain-until-date",
                    until.to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
            None => request,
        }
    }

    /// Execute a request and turn any non-2xx answer into a typed error.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            debug!(method = method.as_str(), url = %url, status = response.status, "S3 request succeeded");
            return Ok(response);
        }

        Err(Self::api_error(&response).into())
    }

    fn api_error(response: &HttpResponse) -> S3Error {
        let document: ErrorDocument = std::str::from_utf8(&response.body)
            .ok()
            .filter(|text| !text.trim().is_empty())
            .and_then(|text| quick_xml::de::from_str(text).ok())
            .unwrap_or_default();

        // HEAD responses carry no body; fall back to the status code.
        let code = if document.code.is_empty() {
            match response.status {
                404 => "NoSuchKey".to_string(),
                403 => "AccessDenied".to_string(),
                status => format!("Http{status}"),
            }
        } else {
            document.code
        };

        S3Error::ApiError {
            status_code: response.status,
            code,
            message: document.message,
        }
    }

    fn parse_xml<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
        let text = std::str::from_utf8(&response.body)
            .map_err(|e| S3Error::ParseError(format!("response is not UTF-8: {}", e)))?;
        quick_xml::de::from_str(text)
            .map_err(|e| S3Error::ParseError(format!("{}: {}", std::any::type_name::<T>(), e)).into())
    }

    fn parse_timestamp(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .or_else(|_| DateTime::parse_from_rfc2822(value))
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn header_timestamp(response: &HttpResponse, name: &str) -> Option<DateTime<Utc>> {
        response.header(name).map(Self::parse_timestamp)
    }

    fn object_from_headers(key: &str, response: &HttpResponse, fallback_size: u64) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size_bytes: response
                .header("content-length")
                .and_then(|value| value.parse().ok())
                .unwrap_or(fallback_size),
            last_modified: Self::header_timestamp(response, "last-modified").unwrap_or_else(Utc::now),
            version_id: response
                .header("x-amz-version-id")
                .filter(|id| *id != "null")
                .map(str::to_string),
            etag: response.header("etag").map(str::to_string),
            retain_until: Self::header_timestamp(response, "x-amz-object-lock-retain-until-date"),
        }
    }

    async fn list_bucket_entries(&self) -> Result<Vec<BucketEntry>> {
        let response = self
            .send(self.request(HttpMethod::Get, format!("{}/", self.endpoint)))
            .await?;
        let result: ListAllMyBucketsResult = Self::parse_xml(&response)?;
        Ok(result.buckets.bucket)
    }

    async fn versioning_enabled(&self, bucket: &str) -> Result<bool> {
        let url = format!("{}?versioning", self.bucket_url(bucket));
        let response = self.send(self.request(HttpMethod::Get, url)).await?;
        let config: VersioningConfiguration = Self::parse_xml(&response)?;
        Ok(config.status.as_deref() == Some("Enabled"))
    }

    /// Whether object lock is on, and the bucket's default retention.
    async fn object_lock(&self, bucket: &str) -> Result<(bool, Option<Duration>)> {
        let url = format!("{}?object-lock", self.bucket_url(bucket));
        match self.send(self.request(HttpMethod::Get, url)).await {
            Ok(response) => {
                let config: ObjectLockConfiguration = Self::parse_xml(&response)?;
                let enabled = config.object_lock_enabled.as_deref() == Some("Enabled");
                let retention = config
                    .rule
                    .and_then(|rule| Self::retention_period(&rule.default_retention));
                Ok((enabled, retention))
            }
            // ObjectLockConfigurationNotFoundError
            Err(BridgeError::NotFound(_)) => Ok((false, None)),
            Err(e) => Err(e),
        }
    }

    fn retention_period(retention: &DefaultRetention) -> Option<Duration> {
        let days = match (retention.days, retention.years) {
            (Some(days), _) => u64::from(days),
            (None, Some(years)) => u64::from(years) * 365,
            (None, None) => return None,
        };
        Some(Duration::from_secs(days * SECS_PER_DAY))
    }

    /// S3 stores default retention in whole days; round up, at least one.
    fn retention_days(retention: Duration) -> u32 {
        let days = retention.as_secs().div_ceil(SECS_PER_DAY).max(1);
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    async fn put_default_retention(&self, bucket: &str, retention: Duration) -> Result<Duration> {
        let days = Self::retention_days(retention);
        let body = quick_xml::se::to_string(&ObjectLockConfiguration {
            object_lock_enabled: Some("Enabled".to_string()),
            rule: Some(ObjectLockRule {
                default_retention: DefaultRetention {
                    mode: LOCK_MODE.to_string(),
                    days: Some(days),
                    years: None,
                },
            }),
        })
        .map_err(|e| S3Error::ParseError(e.to_string()))?;
        let url = format!("{}?object-lock", self.bucket_url(bucket));
        let request = Self::with_payload(self.request(HttpMethod::Put, url), Bytes::from(body));
        self.send(request).await?;
        debug!(bucket, days, "Set default retention");
        Ok(Duration::from_secs(u64::from(days) * SECS_PER_DAY))
    }

    async fn describe(&self, entry: BucketEntry) -> Result<BucketInfo> {
        let versioning_enabled = self.versioning_enabled(&entry.name).await?;
        let (object_lock_enabled, default_retention) = self.object_lock(&entry.name).await?;
        Ok(BucketInfo {
            created_at: Self::parse_timestamp(&entry.creation_date),
            name: entry.name,
            versioning_enabled: versioning_enabled || object_lock_enabled,
            object_lock_enabled,
            default_retention,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn probe(&self) -> Result<()> {
        self.list_bucket_entries().await?;
        info!(endpoint = %self.endpoint, "Access grant accepted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, name: &str, settings: BucketSettings) -> Result<BucketInfo> {
        let mut request = self.request(HttpMethod::Put, self.bucket_url(name));
        if settings.object_lock {
            request = request.header("x-amz-bucket-object-lock-enabled", "true");
        }
        self.send(request).await?;

        // Object lock turns versioning on implicitly.
        if settings.versioning && !settings.object_lock {
            let body = quick_xml::se::to_string(&VersioningConfiguration {
                status: Some("Enabled".to_string()),
            })
            .map_err(|e| S3Error::ParseError(e.to_string()))?;
            let url = format!("{}?versioning", self.bucket_url(name));
            let request = Self::with_payload(self.request(HttpMethod::Put, url), Bytes::from(body));
            self.send(request).await?;
        }

        let default_retention = match settings.default_retention {
            Some(retention) if settings.object_lock => {
                Some(self.put_default_retention(name, retention).await?)
            }
            _ => None,
        };

        info!(bucket = name, "Created bucket");
        Ok(BucketInfo {
            name: name.to_string(),
            created_at: Utc::now(),
            versioning_enabled: settings.versioning || settings.object_lock,
            object_lock_enabled: settings.object_lock,
            default_retention,
        })
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.send(self.request(HttpMethod::Delete, self.bucket_url(name)))
            .await?;
        info!(bucket = name, "Deleted bucket");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let mut buckets = Vec::new();
        for entry in self.list_bucket_entries().await? {
            buckets.push(self.describe(entry).await?);
        }
        Ok(buckets)
    }

    #[instrument(skip(self))]
    async fn bucket_info(&self, name: &str) -> Result<BucketInfo> {
        let entry = self
            .list_bucket_entries()
            .await?
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| BridgeError::NotFound(format!("bucket {name}")))?;
        self.describe(entry).await
    }

    #[instrument(skip(self))]
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>> {
        let request = self.request(HttpMethod::Head, self.object_url(bucket, key));
        match self.send(request).await {
            Ok(response) => Ok(Some(Self::object_from_headers(key, &response, 0))),
            Err(BridgeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, data, options), fields(size = data.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: &PutOptions,
    ) -> Result<ObjectInfo> {
        let size = data.len() as u64;
        let request = self.request(HttpMethod::Put, self.object_url(bucket, key));
        let request = Self::with_payload(Self::with_lock_headers(request, options), data);
        let response = self.send(request).await?;

        let mut info = Self::object_from_headers(key, &response, size);
        info.size_bytes = size;
        info.retain_until = options.retain_until;
        Ok(info)
    }

    #[instrument(skip(self, options))]
    async fn begin_multipart(
        &self,
        bucket: &str,
        key: &str,
        options: &PutOptions,
    ) -> Result<String> {
        let url = format!("{}?uploads", self.object_url(bucket, key));
        let request = Self::with_lock_headers(self.request(HttpMethod::Post, url), options);
        let response = self.send(request).await?;
        let result: InitiateMultipartUploadResult = Self::parse_xml(&response)?;
        debug!(upload_id = %result.upload_id, "Started multipart upload");
        Ok(result.upload_id)
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<CompletedPart> {
        let url = format!(
            "{}?partNumber={}&uploadId={}",
            self.object_url(bucket, key),
            part_number,
            urlencoding::encode(upload_id)
        );
        let request = Self::with_payload(self.request(HttpMethod::Put, url), data);
        let response = self.send(request).await?;
        let etag = response
            .header("etag")
            .ok_or_else(|| S3Error::ParseError("part response has no ETag".to_string()))?;
        Ok(CompletedPart {
            part_number,
            etag: etag.to_string(),
        })
    }

    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<ObjectInfo> {
        let document = CompleteMultipartUpload {
            parts: parts
                .iter()
                .map(|part| CompletePart {
                    part_number: part.part_number,
                    etag: part.etag.clone(),
                })
                .collect(),
        };
        let body = quick_xml::se::to_string(&document).map_err(|e| S3Error::ParseError(e.to_string()))?;
        let url = format!(
            "{}?uploadId={}",
            self.object_url(bucket, key),
            urlencoding::encode(upload_id)
        );
        let request = Self::with_payload(self.request(HttpMethod::Post, url), Bytes::from(body));
        let response = self.send(request).await?;

        // A 200 can still carry an error document for multipart completion.
        if let Ok(text) = std::str::from_utf8(&response.body) {
            if text.contains("<Error>") {
                let mut failed = response.clone();
                failed.status = 500;
                return Err(Self::api_error(&failed).into());
            }
        }

        let version_id = response
            .header("x-amz-version-id")
            .filter(|id| *id != "null")
            .map(str::to_string);
        let mut info = self
            .head_object(bucket, key)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("{bucket}/{key} after multipart upload")))?;
        if version_id.is_some() {
            info.version_id = version_id;
        }
        Ok(info)
    }

    #[instrument(skip(self))]
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        let url = format!(
            "{}?uploadId={}",
            self.object_url(bucket, key),
            urlencoding::encode(upload_id)
        );
        match self.send(self.request(HttpMethod::Delete, url)).await {
            Ok(_) | Err(BridgeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut url = format!("{}?list-type=2&max-keys={}", self.bucket_url(bucket), MAX_KEYS);
            if let Some(prefix) = prefix {
                url.push_str(&format!("&prefix={}", urlencoding::encode(prefix)));
            }
            if let Some(token) = &continuation {
                url.push_str(&format!("&continuation-token={}", urlencoding::encode(token)));
            }

            let response = self.send(self.request(HttpMethod::Get, url)).await?;
            let page: ListBucketResult = Self::parse_xml(&response)?;

            objects.extend(page.contents.into_iter().map(|entry| ObjectInfo {
                last_modified: Self::parse_timestamp(&entry.last_modified),
                key: entry.key,
                size_bytes: entry.size,
                version_id: None,
                etag: entry.etag,
                retain_until: None,
            }));

            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation = Some(token),
                _ => break,
            }
        }

        debug!(bucket, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectInfo>> {
        let mut versions = Vec::new();
        let mut markers: Option<(String, Option<String>)> = None;

        loop {
            let mut url = format!("{}?versions&max-keys={}", self.bucket_url(bucket), MAX_KEYS);
            if let Some(prefix) = prefix {
                url.push_str(&format!("&prefix={}", urlencoding::encode(prefix)));
            }
            if let Some((key_marker, version_marker)) = &markers {
                url.push_str(&format!("&key-marker={}", urlencoding::encode(key_marker)));
                if let Some(version_marker) = version_marker {
                    url.push_str(&format!(
                        "&version-id-marker={}",
                        urlencoding::encode(version_marker)
                    ));
                }
            }

            let response = self.send(self.request(HttpMethod::Get, url)).await?;
            let page: ListVersionsResult = Self::parse_xml(&response)?;

            versions.extend(page.versions.into_iter().map(|entry| ObjectInfo {
                last_modified: Self::parse_timestamp(&entry.last_modified),
                key: entry.key,
                size_bytes: entry.size,
                version_id: entry.version_id.filter(|id| id != "null"),
                etag: entry.etag,
                retain_until: None,
            }));

            match (page.is_truncated, page.next_key_marker) {
                (true, Some(key_marker)) => {
                    markers = Some((key_marker, page.next_version_id_marker))
                }
                _ => break,
            }
        }

        Ok(versions)
    }

    #[instrument(skip(self))]
    async fn object_retention(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut url = format!("{}?retention", self.object_url(bucket, key));
        if let Some(version_id) = version_id {
            url.push_str(&format!("&versionId={}", urlencoding::encode(version_id)));
        }

        match self.send(self.request(HttpMethod::Get, url)).await {
            Ok(response) => {
                let retention: Retention = Self::parse_xml(&response)?;
                Ok(retention
                    .retain_until_date
                    .as_deref()
                    .map(Self::parse_timestamp))
            }
            // NoSuchObjectLockConfiguration
            Err(BridgeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<()> {
        // Deleting without a version id on a versioned bucket would only add a
        // delete marker, so resolve the latest version first.
        let resolved = match version_id {
            Some(id) => Some(id.to_string()),
            None => match self.head_object(bucket, key).await? {
                Some(info) => info.version_id,
                None => return Ok(()),
            },
        };

        let mut url = self.object_url(bucket, key);
        if let Some(id) = &resolved {
            url.push_str(&format!("?versionId={}", urlencoding::encode(id)));
        }
        self.send(self.request(HttpMethod::Delete, url)).await?;
        debug!(bucket, key, version = ?resolved, "Deleted object version");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
            async fn is_connected(&self) -> bool;
        }
    }

    const ENDPOINT: &str = "https://gateway.example.test";

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn connector(mock: MockHttpClient) -> S3ObjectStore {
        S3ObjectStore::new(Arc::new(mock), format!("{ENDPOINT}/"), "grant-123")
    }

    #[test]
    fn test_object_url_encoding() {
        let store = connector(MockHttpClient::new());
        assert_eq!(
            store.object_url("kiosk", "covers/Side A & B.jpg"),
            format!("{ENDPOINT}/kiosk/covers/Side%20A%20%26%20B.jpg")
        );
    }

    #[tokio::test]
    async fn test_probe_sends_bearer_grant() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .withf(|req| {
                req.url == format!("{ENDPOINT}/")
                    && req.headers.get("Authorization").map(String::as_str) == Some("Bearer grant-123")
            })
            .returning(|_| {
                Ok(response(
                    200,
                    &[],
                    "<ListAllMyBucketsResult><Buckets></Buckets></ListAllMyBucketsResult>",
                ))
            });

        connector(mock).probe().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_rejected_grant() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(response(
                403,
                &[],
                "<Error><Code>InvalidAccessKeyId</Code><Message>bad grant</Message></Error>",
            ))
        });

        let err = connector(mock).probe().await.unwrap_err();
        assert!(matches!(err, BridgeError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_put_object_with_retention_headers() {
        let until = DateTime::parse_from_rfc3339("2025-01-31T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .withf(|req| {
                req.method == HttpMethod::Put
                    && req.url == format!("{ENDPOINT}/kiosk/tracks/abc.mp3")
                    && req.headers.get("x-amz-object-lock-mode").map(String::as_str) == Some("COMPLIANCE")
                    && req
                        .headers
                        .get("x-amz-object-lock-retain-until-date")
                        .map(String::as_str)
                        == Some("2025-01-31T00:00:00Z")
                    && req.headers.contains_key("x-amz-checksum-sha256")
                    && req.body.as_deref() == Some(&b"audio"[..])
            })
            .returning(|_| {
                Ok(response(
                    200,
                    &[("ETag", "\"e1\""), ("x-amz-version-id", "v-001")],
                    "",
                ))
            });

        let options = PutOptions {
            content_type: Some("audio/mpeg".to_string()),
            retain_until: Some(until),
        };
        let info = connector(mock)
            .put_object("kiosk", "tracks/abc.mp3", Bytes::from_static(b"audio"), &options)
            .await
            .unwrap();

        assert_eq!(info.version_id.as_deref(), Some("v-001"));
        assert_eq!(info.etag.as_deref(), Some("\"e1\""));
        assert_eq!(info.size_bytes, 5);
        assert_eq!(info.retain_until, Some(until));
    }

    #[tokio::test]
    async fn test_head_missing_object_is_none() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, &[], "")));

        let info = connector(mock).head_object("kiosk", "tracks/none.mp3").await.unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_server_errors_stay_transient() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(response(
                503,
                &[],
                "<Error><Code>SlowDown</Code><Message>Please reduce your request rate.</Message></Error>",
            ))
        });

        let err = connector(mock)
            .put_object("kiosk", "k", Bytes::from_static(b"x"), &PutOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_objects_follows_continuation() {
        let mut mock = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| !req.url.contains("continuation-token") && req.url.contains("prefix=tracks%2F"))
            .returning(|_| {
                Ok(response(
                    200,
                    &[],
                    r#"<ListBucketResult>
                        <Contents><Key>tracks/a.mp3</Key><LastModified>2024-05-01T10:00:00.000Z</LastModified><ETag>"1"</ETag><Size>10</Size></Contents>
                        <IsTruncated>true</IsTruncated>
                        <NextContinuationToken>page-2</NextContinuationToken>
                    </ListBucketResult>"#,
                ))
            });
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.url.contains("continuation-token=page-2"))
            .returning(|_| {
                Ok(response(
                    200,
                    &[],
                    r#"<ListBucketResult>
                        <Contents><Key>tracks/b.mp3</Key><LastModified>2024-05-01T11:00:00.000Z</LastModified><Size>20</Size></Contents>
                        <IsTruncated>false</IsTruncated>
                    </ListBucketResult>"#,
                ))
            });

        let objects = connector(mock)
            .list_objects("kiosk", Some("tracks/"))
            .await
            .unwrap();
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["tracks/a.mp3", "tracks/b.mp3"]);
        assert_eq!(objects[1].size_bytes, 20);
    }

    #[tokio::test]
    async fn test_delete_without_version_resolves_latest() {
        let mut mock = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.method == HttpMethod::Head)
            .returning(|_| {
                Ok(response(
                    200,
                    &[("Content-Length", "4"), ("x-amz-version-id", "v9")],
                    "",
                ))
            });
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.method == HttpMethod::Delete && req.url.ends_with("?versionId=v9"))
            .returning(|_| Ok(response(204, &[], "")));

        connector(mock)
            .delete_object("kiosk", "catalog/catalog.json", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_locked_version_delete_maps_to_object_locked() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(response(
                403,
                &[],
                "<Error><Code>AccessDenied</Code><Message>Access Denied because object protected by object lock.</Message></Error>",
            ))
        });

        let err = connector(mock)
            .delete_object("kiosk", "tracks/a.mp3", Some("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ObjectLocked(_)));
    }

    #[tokio::test]
    async fn test_create_versioned_bucket() {
        let mut mock = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.method == HttpMethod::Put && req.url == format!("{ENDPOINT}/kiosk-backup"))
            .returning(|_| Ok(response(200, &[], "")));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.url.ends_with("?versioning")
                    && req
                        .body
                        .as_ref()
                        .map(|b| String::from_utf8_lossy(b).contains("<Status>Enabled</Status>"))
                        .unwrap_or(false)
            })
            .returning(|_| Ok(response(200, &[], "")));

        let info = connector(mock)
            .create_bucket(
                "kiosk-backup",
                BucketSettings {
                    versioning: true,
                    object_lock: false,
                    default_retention: None,
                },
            )
            .await
            .unwrap();
        assert!(info.versioning_enabled);
        assert!(!info.object_lock_enabled);
    }

    #[tokio::test]
    async fn test_create_locked_bucket_stores_default_retention() {
        let mut mock = MockHttpClient::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.url == format!("{ENDPOINT}/vault")
                    && req.headers.get("x-amz-bucket-object-lock-enabled").map(String::as_str)
                        == Some("true")
            })
            .returning(|_| Ok(response(200, &[], "")));
        mock.expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                let body = req
                    .body
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                req.method == HttpMethod::Put
                    && req.url.ends_with("/vault?object-lock")
                    && body.contains("<Mode>COMPLIANCE</Mode>")
                    && body.contains("<Days>2</Days>")
            })
            .returning(|_| Ok(response(200, &[], "")));

        // 36 hours round up to two whole days.
        let info = connector(mock)
            .create_bucket(
                "vault",
                BucketSettings {
                    versioning: false,
                    object_lock: true,
                    default_retention: Some(Duration::from_secs(36 * 3600)),
                },
            )
            .await
            .unwrap();
        assert!(info.object_lock_enabled);
        assert_eq!(info.default_retention, Some(Duration::from_secs(2 * SECS_PER_DAY)));
    }

    #[tokio::test]
    async fn test_bucket_info_reads_default_retention() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().returning(|req| {
            let body = if req.url.ends_with("?versioning") {
                "<VersioningConfiguration><Status>Enabled</Status></VersioningConfiguration>"
            } else if req.url.ends_with("?object-lock") {
                "<ObjectLockConfiguration><ObjectLockEnabled>Enabled</ObjectLockEnabled>\
                 <Rule><DefaultRetention><Mode>COMPLIANCE</Mode><Years>1</Years>\
                 </DefaultRetention></Rule></ObjectLockConfiguration>"
            } else {
                "<ListAllMyBucketsResult><Buckets><Bucket><Name>vault</Name>\
                 <CreationDate>2024-05-01T12:00:00.000Z</CreationDate></Bucket>\
                 </Buckets></ListAllMyBucketsResult>"
            };
            Ok(response(200, &[], body))
        });

        let info = connector(mock).bucket_info("vault").await.unwrap();
        assert!(info.object_lock_enabled);
        assert_eq!(info.default_retention, Some(Duration::from_secs(365 * SECS_PER_DAY)));
    }
}
