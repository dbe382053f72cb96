//! OS user enumeration for Linux kiosks.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    users::{OsUserAccount, UserDirectory},
};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Fixed list of accounts, typically loaded from the kiosk provisioning file.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: Vec<OsUserAccount>,
}

impl StaticUserDirectory {
    pub fn new(users: Vec<OsUserAccount>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn list_users(&self) -> Result<Vec<OsUserAccount>> {
        Ok(self.users.clone())
    }
}

/// Treats every directory under a homes root (`/home`) as an account whose
/// music lives in `<home>/<music_dir>`.
#[derive(Debug, Clone)]
pub struct HomeDirUserDirectory {
    homes_root: PathBuf,
    music_dir: String,
}

impl HomeDirUserDirectory {
    pub fn new(homes_root: impl Into<PathBuf>) -> Self {
        Self {
            homes_root: homes_root.into(),
            music_dir: "Music".to_string(),
        }
    }

    pub fn with_music_dir(mut self, music_dir: impl Into<String>) -> Self {
        self.music_dir = music_dir.into();
        self
    }
}

impl Default for HomeDirUserDirectory {
    fn default() -> Self {
        Self::new("/home")
    }
}

#[async_trait]
impl UserDirectory for HomeDirUserDirectory {
    async fn list_users(&self) -> Result<Vec<OsUserAccount>> {
        let mut read_dir = fs::read_dir(&self.homes_root).await.map_err(|e| {
            BridgeError::OperationFailed(format!(
                "cannot enumerate {}: {}",
                self.homes_root.display(),
                e
            ))
        })?;

        let mut users = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let Some(username) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if username.starts_with('.') || username == "lost+found" {
                continue;
            }
            users.push(OsUserAccount::new(
                username,
                entry.path().join(&self.music_dir),
            ));
        }

        users.sort_by(|a, b| a.username.cmp(&b.username));
        debug!(count = users.len(), root = ?self.homes_root, "Enumerated OS users");
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_home_dir_enumeration() {
        let root = std::env::temp_dir().join(format!("kiosk-homes-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(root.join("maria")).await.unwrap();
        fs::create_dir_all(root.join("caixa")).await.unwrap();
        fs::create_dir_all(root.join("lost+found")).await.unwrap();
        fs::write(root.join("README"), b"not a user").await.unwrap();

        let directory = HomeDirUserDirectory::new(&root);
        let users = directory.list_users().await.unwrap();

        let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["caixa", "maria"]);
        assert_eq!(users[1].home_music_path, root.join("maria").join("Music"));

        fs::remove_dir_all(&root).await.ok();
    }

    #[tokio::test]
    async fn test_static_directory() {
        let directory =
            StaticUserDirectory::new(vec![OsUserAccount::new("kiosk", "/home/kiosk/Music")]);
        assert_eq!(directory.list_users().await.unwrap().len(), 1);
    }
}
