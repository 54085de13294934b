//! Per-product secrets: credentials and reporting configuration.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::StoreError;

/// Read-only key/value secrets grouped by secret name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Raw value of `key` in secret `name`, `None` when absent.
    async fn get(&self, name: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// UTF-8 value with surrounding whitespace trimmed.
    async fn get_string(&self, name: &str, key: &str) -> Result<Option<String>, StoreError> {
        match self.get(name, key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(|s| Some(s.trim().to_string()))
                .map_err(|e| StoreError::Serialization(format!("{}/{}: {}", name, key, e))),
            None => Ok(None),
        }
    }
}

/// Secrets mounted as files: `<root>/<name>/<key>`.
#[derive(Debug, Clone)]
pub struct MountedSecrets {
    root: PathBuf,
}

impl MountedSecrets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SecretStore for MountedSecrets {
    async fn get(&self, name: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.root.join(name).join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Secret key not mounted");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory secrets for tests.
#[derive(Clone, Default)]
pub struct MemorySecrets {
    values: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` of secret `name`.
    pub async fn insert(&self, name: &str, key: &str, value: impl Into<Vec<u8>>) {
        self.values
            .write()
            .await
            .insert((name.to_string(), key.to_string()), value.into());
    }
}

#[async_trait]
impl SecretStore for MemorySecrets {
    async fn get(&self, name: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .values
            .read()
            .await
            .get(&(name.to_string(), key.to_string()))
            .cloned())
    }
}
