//! Replication targets and per-call settings

use bridge_traits::users::OsUserAccount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, SyncError};
use crate::registry::InstanceId;

const BUCKET_NAME_MIN: usize = 3;
const BUCKET_NAME_MAX: usize = 63;

/// Destination of a replication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationTarget {
    LocalUser {
        username: String,
        home_music_path: PathBuf,
    },
    RemoteInstance {
        instance_id: InstanceId,
    },
    CloudBucket {
        bucket_name: String,
    },
}

impl ReplicationTarget {
    pub fn local_user(account: &OsUserAccount) -> Self {
        ReplicationTarget::LocalUser {
            username: account.username.clone(),
            home_music_path: account.home_music_path.clone(),
        }
    }

    pub fn remote_instance(instance_id: InstanceId) -> Self {
        ReplicationTarget::RemoteInstance { instance_id }
    }

    pub fn cloud_bucket(bucket_name: impl Into<String>) -> Self {
        ReplicationTarget::CloudBucket {
            bucket_name: bucket_name.into(),
        }
    }

    pub fn key(&self) -> TargetKey {
        match self {
            ReplicationTarget::LocalUser { username, .. } => TargetKey(format!("user:{username}")),
            ReplicationTarget::RemoteInstance { instance_id } => {
                TargetKey(format!("instance:{instance_id}"))
            }
            ReplicationTarget::CloudBucket { bucket_name } => {
                TargetKey(format!("bucket:{bucket_name}"))
            }
        }
    }

    /// Checks that do not need any collaborator.
    pub fn validate(&self) -> Result<()> {
        match self {
            ReplicationTarget::LocalUser {
                username,
                home_music_path,
            } => {
                if username.trim().is_empty() {
                    return Err(SyncError::invalid_input("username", "cannot be empty"));
                }
                if !home_music_path.is_absolute() {
                    return Err(SyncError::invalid_input(
                        "home_music_path",
                        format!("'{}' is not an absolute path", home_music_path.display()),
                    ));
                }
                Ok(())
            }
            ReplicationTarget::RemoteInstance { .. } => Ok(()),
            ReplicationTarget::CloudBucket { bucket_name } => validate_bucket_name(bucket_name),
        }
    }
}

/// Stable identity of a target in the tracker: `user:{name}`,
/// `instance:{uuid}` or `bucket:{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bucket names: lowercase letters, digits and `-`, 3 to 63 characters.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| SyncError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.len() < BUCKET_NAME_MIN || name.len() > BUCKET_NAME_MAX {
        return Err(invalid("must be between 3 and 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("only lowercase letters, digits and '-' are allowed"));
    }
    Ok(())
}

/// Options chosen by the operator for one replication call.
///
/// Passed explicitly into every call; the engine keeps no copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSettings {
    /// Replicate newly ingested files without an explicit request.
    pub auto_sync: bool,
    pub include_covers: bool,
    /// Ask peers to negotiate compressed chunk bodies.
    pub compress_transfer: bool,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            auto_sync: false,
            include_covers: true,
            compress_transfer: false,
        }
    }
}
