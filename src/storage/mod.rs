//! Core storage: durable alert state and the script key/value namespace
//!
//! Providers implement [`CoreStorage`], which hands out an [`AlertStore`]
//! (exclusive checkout/commit per alert name) and a [`KvStore`].

pub mod alert;
pub mod file;
pub mod memory;
pub mod sql;

pub use alert::{Alert, AlertArena, AlertHandle};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sql::SqlStorage;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CoreStoragesConfig;

/// Alert state with exclusive per-name checkout
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Check out `name`, creating it at the neutral level with zero count.
    /// Waits while another caller holds the same name.
    async fn get_or_new(&self, name: &str) -> Result<AlertHandle, StorageError>;

    /// Commit the record and end the checkout
    async fn release(&self, handle: AlertHandle) -> Result<(), StorageError>;

    async fn get(&self, name: &str) -> Result<Option<Alert>, StorageError>;

    async fn all(&self) -> Result<Vec<Alert>, StorageError>;
}

/// Flat string key/value namespace exposed to scripts
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn all(&self) -> Result<BTreeMap<String, String>, StorageError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert a new key; fails if the key exists
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn upsert(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key; fails if the key is absent
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait CoreStorage: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &'static str;

    fn alert(&self) -> Arc<dyn AlertStore>;

    fn kv(&self) -> Arc<dyn KvStore>;

    /// Release connections; called once at shutdown
    async fn stop(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Named core storages built from configuration
#[derive(Default)]
pub struct StorageManager {
    storages: HashMap<String, Arc<dyn CoreStorage>>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_config(config: &CoreStoragesConfig) -> Result<Self, StorageError> {
        let mut manager = Self::new();

        for cfg in &config.memory {
            manager.register(Arc::new(MemoryStorage::new(&cfg.name)));
        }
        for cfg in &config.file {
            manager.register(Arc::new(FileStorage::open(&cfg.name, &cfg.path)?));
        }
        for cfg in &config.sqlite {
            manager.register(Arc::new(SqlStorage::sqlite(cfg).await?));
        }
        for cfg in &config.postgres {
            manager.register(Arc::new(SqlStorage::postgres(cfg).await?));
        }

        Ok(manager)
    }

    pub fn register(&mut self, storage: Arc<dyn CoreStorage>) {
        tracing::info!(
            storage = %storage.name(),
            kind = storage.kind(),
            "Registered core storage"
        );
        self.storages.insert(storage.name().to_string(), storage);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn CoreStorage>, StorageError> {
        self.storages
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    pub async fn stop(&self) {
        for (name, storage) in &self.storages {
            if let Err(e) = storage.stop().await {
                tracing::error!(storage = %name, error = %e, "Failed to stop core storage");
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("key '{0}' already exists")]
    KeyExists(String),

    #[error("key '{0}' not found")]
    KeyNotFound(String),

    #[error("core storage '{0}' not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid storage configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileStorageConfig, MemoryStorageConfig, SqlTables, SqliteStorageConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn test_manager_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoreStoragesConfig {
            memory: vec![MemoryStorageConfig {
                name: "mem".to_string(),
            }],
            file: vec![FileStorageConfig {
                name: "disk".to_string(),
                path: dir.path().join("files"),
            }],
            sqlite: vec![SqliteStorageConfig {
                name: "local".to_string(),
                path: dir.path().join("state.db"),
                tables: SqlTables::default(),
                timeout: Duration::from_secs(5),
            }],
            postgres: Vec::new(),
        };

        let manager = StorageManager::from_config(&config).await.unwrap();
        assert_eq!(manager.get("mem").unwrap().kind(), "memory");
        assert_eq!(manager.get("disk").unwrap().kind(), "file");
        assert_eq!(manager.get("local").unwrap().kind(), "sqlite");
        assert!(matches!(
            manager.get("missing"),
            Err(StorageError::NotFound(_))
        ));
        manager.stop().await;
    }
}
