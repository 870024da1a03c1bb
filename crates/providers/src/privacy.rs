//! Local privacy manager.
//!
//! Everything the assistant persists lives under one data directory that only
//! the current user can read. Initialization creates that directory and
//! tightens its permissions.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tabwise_core::environment::PrivacyManager;
use tabwise_core::error::{Error, Result};
use tracing::info;

pub struct LocalPrivacyManager {
    data_dir: PathBuf,
    allow_page_context: bool,
}

impl LocalPrivacyManager {
    pub fn new(data_dir: impl Into<PathBuf>, allow_page_context: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            allow_page_context,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Whether page text may be handed to the model.
    pub fn allows_page_context(&self) -> bool {
        self.allow_page_context
    }
}

#[async_trait]
impl PrivacyManager for LocalPrivacyManager {
    async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create data directory {}: {e}",
                    self.data_dir.display()
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.data_dir, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(|e| {
                    Error::Internal(format!(
                        "Failed to restrict data directory permissions: {e}"
                    ))
                })?;
        }

        info!(
            data_dir = %self.data_dir.display(),
            page_context = self.allow_page_context,
            "Privacy subsystem initialized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_private_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join("data");
        let manager = LocalPrivacyManager::new(&dir, true);

        manager.initialize().await.unwrap();
        assert!(dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let manager = LocalPrivacyManager::new(root.path().join("data"), false);
        manager.initialize().await.unwrap();
        manager.initialize().await.unwrap();
        assert!(!manager.allows_page_context());
    }

    #[tokio::test]
    async fn unwritable_location_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let manager = LocalPrivacyManager::new(blocker.join("data"), true);
        assert!(matches!(manager.initialize().await, Err(Error::Internal(_))));
    }
}
