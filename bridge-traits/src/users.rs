//! OS user enumeration and peer health probing.
//!
//! Both are external signals: the engine consumes them but never discovers
//! users or decides instance health on its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// A local OS account eligible for library replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsUserAccount {
    pub username: String,
    pub home_music_path: PathBuf,
}

impl OsUserAccount {
    pub fn new(username: impl Into<String>, home_music_path: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            home_music_path: home_music_path.into(),
        }
    }
}

/// Supplies the list of local accounts and their music directories.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<OsUserAccount>>;
}

/// Cached health signal for a peer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Online,
    Offline,
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Online => "online",
            InstanceStatus::Offline => "offline",
            InstanceStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "online" => InstanceStatus::Online,
            "offline" => InstanceStatus::Offline,
            _ => InstanceStatus::Unknown,
        }
    }
}

/// Probes a peer's base URL and reports reachability.
///
/// Implementations should never fail: an unreachable peer is
/// [`InstanceStatus::Offline`], not an error.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, base_url: &str) -> InstanceStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            InstanceStatus::Online,
            InstanceStatus::Offline,
            InstanceStatus::Unknown,
        ] {
            assert_eq!(InstanceStatus::parse(status.as_str()), status);
        }
        assert_eq!(InstanceStatus::parse("garbage"), InstanceStatus::Unknown);
    }
}
