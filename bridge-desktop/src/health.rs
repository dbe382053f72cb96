//! Peer health probing over HTTP.

use async_trait::async_trait;
use bridge_traits::{
    http::{HttpClient, HttpMethod, HttpRequest},
    users::{HealthProbe, InstanceStatus},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Issues `GET {base_url}/health`; any 2xx means online.
pub struct HttpHealthProbe {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, base_url: &str) -> InstanceStatus {
        let url = format!("{}/health", base_url.trim_end_matches('/'));
        let request = HttpRequest::new(HttpMethod::Get, url).timeout(self.timeout);

        match self.http.execute(request).await {
            Ok(response) if response.is_success() => InstanceStatus::Online,
            Ok(response) => {
                debug!(base_url, status = response.status, "Peer answered health check with error");
                InstanceStatus::Offline
            }
            Err(e) => {
                debug!(base_url, error = %e, "Peer health check failed");
                InstanceStatus::Offline
            }
        }
    }
}
