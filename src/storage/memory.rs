//! In-memory core storage, lives for the process lifetime

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::alert::{Alert, AlertArena, AlertHandle};
use super::{AlertStore, CoreStorage, KvStore, StorageError};

pub struct MemoryStorage {
    name: String,
    alerts: Arc<MemoryAlertStore>,
    kv: Arc<MemoryKvStore>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alerts: Arc::new(MemoryAlertStore::default()),
            kv: Arc::new(MemoryKvStore::default()),
        }
    }
}

impl CoreStorage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "memory"
    }

    fn alert(&self) -> Arc<dyn AlertStore> {
        Arc::clone(&self.alerts) as Arc<dyn AlertStore>
    }

    fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv) as Arc<dyn KvStore>
    }
}

#[derive(Default)]
pub struct MemoryAlertStore {
    arena: AlertArena,
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn get_or_new(&self, name: &str) -> Result<AlertHandle, StorageError> {
        Ok(self.arena.checkout(name).await)
    }

    async fn release(&self, mut handle: AlertHandle) -> Result<(), StorageError> {
        handle.commit();
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Alert>, StorageError> {
        Ok(self.arena.snapshot(name).await)
    }

    async fn all(&self) -> Result<Vec<Alert>, StorageError> {
        Ok(self.arena.snapshot_all().await)
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<String, String>>,
}

/// Shared put/upsert/delete semantics for map-backed KV stores
pub(crate) fn kv_apply(
    data: &mut BTreeMap<String, String>,
    op: KvOp<'_>,
) -> Result<(), StorageError> {
    match op {
        KvOp::Put(key, value) => {
            if data.contains_key(key) {
                return Err(StorageError::KeyExists(key.to_string()));
            }
            data.insert(key.to_string(), value.to_string());
        }
        KvOp::Upsert(key, value) => {
            data.insert(key.to_string(), value.to_string());
        }
        KvOp::Delete(key) => {
            if data.remove(key).is_none() {
                return Err(StorageError::KeyNotFound(key.to_string()));
            }
        }
    }
    Ok(())
}

pub(crate) enum KvOp<'a> {
    Put(&'a str, &'a str),
    Upsert(&'a str, &'a str),
    Delete(&'a str),
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        Ok(self.data.read().clone())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        kv_apply(&mut self.data.write(), KvOp::Put(key, value))
    }

    async fn upsert(&self, key: &str, value: &str) -> Result<(), StorageError> {
        kv_apply(&mut self.data.write(), KvOp::Upsert(key, value))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        kv_apply(&mut self.data.write(), KvOp::Delete(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Level;

    #[tokio::test]
    async fn test_alert_release_persists_in_memory() {
        let storage = MemoryStorage::new("mem");
        let alerts = storage.alert();

        let mut handle = alerts.get_or_new("disk").await.unwrap();
        handle.update_level(Level::Warning);
        handle.inc();
        alerts.release(handle).await.unwrap();

        let alert = alerts.get("disk").await.unwrap().unwrap();
        assert_eq!(alert.level, Level::Warning);
        assert_eq!(alert.count, 1);
        assert_eq!(alerts.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_kv_semantics() {
        let storage = MemoryStorage::new("mem");
        let kv = storage.kv();

        kv.put("a", "1").await.unwrap();
        assert!(matches!(
            kv.put("a", "2").await,
            Err(StorageError::KeyExists(_))
        ));
        kv.upsert("a", "3").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("3"));

        kv.delete("a").await.unwrap();
        assert!(matches!(
            kv.delete("a").await,
            Err(StorageError::KeyNotFound(_))
        ));
        assert!(kv.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kv_and_alerts_are_separate_namespaces() {
        let storage = MemoryStorage::new("mem");
        storage.kv().put("disk", "x").await.unwrap();
        assert!(storage.alert().get("disk").await.unwrap().is_none());
    }
}
