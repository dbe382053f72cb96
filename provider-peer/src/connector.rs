//! HTTP peer transport
//!
//! Endpoints, relative to the instance base URL:
//!
//! | Operation          | Request                                                          |
//! |--------------------|------------------------------------------------------------------|
//! | begin transfer     | `POST /replication/transfers`                                    |
//! | upload chunk       | `PUT /replication/transfers/{session}/files/{hash}?offset={n}`   |
//! | finalize file      | `POST /replication/transfers/{session}/files/{hash}/finalize`    |
//! | complete transfer  | `POST /replication/transfers/{session}/complete`                 |
//! | abort transfer     | `DELETE /replication/transfers/{session}`                        |
//! | push settings      | `PUT /replication/settings`                                      |

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::peer::{ChunkAck, PeerSession, PeerTransport, TransferManifest};
use bytes::Bytes;
use core_runtime::config::PeerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::PeerError;

const API_PREFIX: &str = "replication";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Peer transport over the kiosk replication API
pub struct HttpPeerTransport {
    http_client: Arc<dyn HttpClient>,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpPeerTransport {
    pub fn new(http_client: Arc<dyn HttpClient>, auth_token: Option<String>) -> Self {
        Self {
            http_client,
            auth_token,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(http_client: Arc<dyn HttpClient>, config: &PeerConfig) -> Self {
        Self::new(http_client, config.auth_token.clone())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn transfers_url(base_url: &str) -> String {
        format!("{}/{}/transfers", base_url.trim_end_matches('/'), API_PREFIX)
    }

    fn session_url(base_url: &str, session_id: &str) -> String {
        format!(
            "{}/{}",
            Self::transfers_url(base_url),
            urlencoding::encode(session_id)
        )
    }

    fn file_url(base_url: &str, session_id: &str, content_hash: &str) -> String {
        format!(
            "{}/files/{}",
            Self::session_url(base_url, session_id),
            urlencoding::encode(content_hash)
        )
    }

    fn request(&self, method: HttpMethod, url: String) -> HttpRequest {
        let request = HttpRequest::new(method, url).timeout(self.timeout);
        match &self.auth_token {
            Some(token) => request.bearer_token(token),
            None => request,
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            debug!(method = method.as_str(), url = %url, status = response.status, "Peer request succeeded");
            return Ok(response);
        }

        let message = response
            .text()
            .ok()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| format!("{} {} failed", method.as_str(), url));
        warn!(url = %url, status = response.status, "Peer rejected request");

        Err(PeerError::ApiError {
            status_code: response.status,
            message,
        }
        .into())
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    #[instrument(skip(self, manifest), fields(files = manifest.entries.len()))]
    async fn begin_transfer(
        &self,
        base_url: &str,
        manifest: &TransferManifest,
    ) -> Result<PeerSession> {
        let request = self
            .request(HttpMethod::Post, Self::transfers_url(base_url))
            .json(manifest)?;
        let session: PeerSession = self.send(request).await?.json()?;

        info!(
            session_id = %session.session_id,
            resumable = session.resumable,
            already_present = session.present.len(),
            "Peer transfer session opened"
        );
        Ok(session)
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn upload_chunk(
        &self,
        base_url: &str,
        session_id: &str,
        content_hash: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<ChunkAck> {
        let expected = offset + data.len() as u64;
        let url = format!(
            "{}?offset={}",
            Self::file_url(base_url, session_id, content_hash),
            offset
        );
        let request = self
            .request(HttpMethod::Put, url)
            .header("Content-Type", "application/octet-stream")
            .body(data);

        let ack: ChunkAck = self.send(request).await?.json()?;
        if ack.committed_offset != expected {
            return Err(PeerError::OffsetMismatch {
                expected,
                acknowledged: ack.committed_offset,
            }
            .into());
        }
        Ok(ack)
    }

    async fn finalize_file(
        &self,
        base_url: &str,
        session_id: &str,
        content_hash: &str,
    ) -> Result<()> {
        let url = format!("{}/finalize", Self::file_url(base_url, session_id, content_hash));
        self.send(self.request(HttpMethod::Post, url)).await?;
        Ok(())
    }

    async fn complete_transfer(&self, base_url: &str, session_id: &str) -> Result<()> {
        let url = format!("{}/complete", Self::session_url(base_url, session_id));
        self.send(self.request(HttpMethod::Post, url)).await?;
        info!(session_id, "Peer transfer session completed");
        Ok(())
    }

    async fn abort_transfer(&self, base_url: &str, session_id: &str) -> Result<()> {
        let url = Self::session_url(base_url, session_id);
        match self.send(self.request(HttpMethod::Delete, url)).await {
            Ok(_) | Err(BridgeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn push_settings(&self, base_url: &str, settings: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{}/settings", base_url.trim_end_matches('/'), API_PREFIX);
        let request = self.request(HttpMethod::Put, url).json(settings)?;
        self.send(request).await?;
        Ok(())
    }
}
