//! Peer instance transport
//!
//! Push protocol spoken between kiosk instances. A transfer is a session:
//! the sender announces a manifest, streams each file in offset-addressed
//! chunks, commits files one at a time and finally closes or aborts the session.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// One file announced in a transfer manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub content_hash: String,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferManifest {
    pub entries: Vec<ManifestEntry>,
    /// Ask the peer to negotiate compressed chunk bodies.
    pub compress: bool,
    /// Session left open by an earlier, interrupted attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session: Option<String>,
}

/// Peer's answer to `begin_transfer`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSession {
    pub session_id: String,
    /// Peer keeps partially received files and accepts uploads at an offset.
    #[serde(default)]
    pub resumable: bool,
    /// Content hashes the peer has already committed.
    #[serde(default)]
    pub present: Vec<String>,
    /// Acknowledged byte offsets of partially received files.
    #[serde(default)]
    pub offsets: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub committed_offset: u64,
}

/// Authenticated transport to a peer's ingest endpoint.
///
/// `base_url` is the instance's registered base URL. Transport failures must
/// surface as transient [`BridgeError`](crate::error::BridgeError) variants so
/// the caller can retry; rejections (auth, validation) as non-transient ones.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn begin_transfer(
        &self,
        base_url: &str,
        manifest: &TransferManifest,
    ) -> Result<PeerSession>;

    async fn upload_chunk(
        &self,
        base_url: &str,
        session_id: &str,
        content_hash: &str,
        offset: u64,
        data: Bytes,
    ) -> Result<ChunkAck>;

    /// Commit a fully uploaded file on the peer.
    async fn finalize_file(&self, base_url: &str, session_id: &str, content_hash: &str)
        -> Result<()>;

    /// Close the session after every file has been committed.
    async fn complete_transfer(&self, base_url: &str, session_id: &str) -> Result<()>;

    /// Discard the session and any uncommitted data.
    async fn abort_transfer(&self, base_url: &str, session_id: &str) -> Result<()>;

    /// Replace the peer's replication settings document.
    async fn push_settings(&self, base_url: &str, settings: &serde_json::Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults_when_fields_missing() {
        let session: PeerSession = serde_json::from_str(r#"{"sessionId":"s-1"}"#).unwrap();
        assert_eq!(session.session_id, "s-1");
        assert!(!session.resumable);
        assert!(session.present.is_empty());
        assert!(session.offsets.is_empty());
    }

    #[test]
    fn test_manifest_omits_empty_resume_session() {
        let manifest = TransferManifest {
            entries: vec![ManifestEntry {
                content_hash: "abc".into(),
                file_name: "a.mp3".into(),
                size_bytes: 3,
            }],
            compress: false,
            resume_session: None,
        };
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("contentHash"));
        assert!(!json.contains("resumeSession"));
    }
}
