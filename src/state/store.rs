use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::error::{BotError, Result};

/// A JSON document kept in memory and mirrored to disk.
///
/// Readers share a read lock. Writers hold the write lock for the whole
/// read-modify-write: the closure mutates a draft copy, the draft is saved
/// atomically, and only then does it replace the live value. A failed save
/// leaves the live value untouched.
///
/// Two separate calls are not atomic with respect to each other, so any
/// check-then-act sequence must live inside a single `update` closure.
pub struct JsonStore<T> {
    path: Option<PathBuf>,
    inner: RwLock<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone + Send + Sync,
{
    /// Load from a JSON file, or start from the default document if the file
    /// does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();

        let value = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| BotError::StateParse {
                    path: display,
                    source: e,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(e) => {
                return Err(BotError::StateLoad {
                    path: display,
                    source: e,
                })
            }
        };

        Ok(Self {
            path: Some(path),
            inner: RwLock::new(value),
        })
    }

    /// A store that never touches the filesystem
    pub fn in_memory(value: T) -> Self {
        Self {
            path: None,
            inner: RwLock::new(value),
        }
    }

    pub async fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.read().await;
        f(&guard)
    }

    /// Clone of the whole document
    pub async fn snapshot(&self) -> T {
        self.inner.read().await.clone()
    }

    /// Atomic read-modify-write
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.inner.write().await;
        let mut draft = guard.clone();
        let result = f(&mut draft);
        self.persist(&draft).await?;
        *guard = draft;
        Ok(result)
    }

    async fn persist(&self, value: &T) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let display = path.display().to_string();
        let content = serde_json::to_string_pretty(value)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BotError::StateSave {
                        path: display.clone(),
                        source: e,
                    })?;
            }
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = format!("{}.tmp", display);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| BotError::StateSave {
                path: display.clone(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| BotError::StateSave {
                path: display,
                source: e,
            })?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn temp_state_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("web-verifier-{}", uuid::Uuid::new_v4()))
        .join(name)
}
