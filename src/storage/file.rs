//! File-backed core storage
//!
//! Every alert is kept as its own JSON document under `<dir>/alerts/`, named by
//! the SHA-256 of the alert name; the name itself lives inside the document.
//! The KV namespace is a single `<dir>/kv.json`. State is loaded at open time
//! and written through on every commit or mutation.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use super::alert::{Alert, AlertArena, AlertHandle};
use super::memory::{kv_apply, KvOp};
use super::{AlertStore, CoreStorage, KvStore, StorageError};

const ALERTS_DIR: &str = "alerts";
const KV_FILE: &str = "kv.json";

/// Directory of JSON documents with atomic replace-on-write
struct FileBackend {
    data_dir: PathBuf,
}

impl FileBackend {
    fn new(data_dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir.join(ALERTS_DIR))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
        })
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn alert_path(&self, name: &str) -> PathBuf {
        self.data_dir
            .join(ALERTS_DIR)
            .join(format!("{}.json", file_key(name)))
    }

    fn kv_path(&self) -> PathBuf {
        self.data_dir.join(KV_FILE)
    }

    fn load_alerts(&self) -> Result<Vec<Alert>, StorageError> {
        let mut alerts = Vec::new();
        for entry in fs::read_dir(self.data_dir.join(ALERTS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = fs::read(&path)?;
            let alert: Alert = serde_json::from_slice(&data).map_err(|e| {
                StorageError::Serialization(format!("{}: {}", path.display(), e))
            })?;
            alerts.push(alert);
        }
        Ok(alerts)
    }

    fn load_kv(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let path = self.kv_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read(&path)?;
        serde_json::from_slice(&data)
            .map_err(|e| StorageError::Serialization(format!("{}: {}", path.display(), e)))
    }
}

/// Fixed-length, filesystem-safe file stem for any alert name
fn file_key(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

pub struct FileStorage {
    name: String,
    alerts: Arc<FileAlertStore>,
    kv: Arc<FileKvStore>,
}

impl FileStorage {
    /// Open (or create) a storage directory and load its state
    pub fn open(name: impl Into<String>, data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let backend = Arc::new(FileBackend::new(data_dir.as_ref())?);
        let alerts = backend.load_alerts()?;
        let kv = backend.load_kv()?;

        tracing::debug!(
            path = %data_dir.as_ref().display(),
            alerts = alerts.len(),
            keys = kv.len(),
            "Loaded file storage"
        );

        Ok(Self {
            name: name.into(),
            alerts: Arc::new(FileAlertStore {
                arena: AlertArena::with_records(alerts),
                backend: Arc::clone(&backend),
            }),
            kv: Arc::new(FileKvStore {
                data: RwLock::new(kv),
                backend,
            }),
        })
    }
}

impl CoreStorage for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "file"
    }

    fn alert(&self) -> Arc<dyn AlertStore> {
        Arc::clone(&self.alerts) as Arc<dyn AlertStore>
    }

    fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv) as Arc<dyn KvStore>
    }
}

struct FileAlertStore {
    arena: AlertArena,
    backend: Arc<FileBackend>,
}

#[async_trait]
impl AlertStore for FileAlertStore {
    async fn get_or_new(&self, name: &str) -> Result<AlertHandle, StorageError> {
        Ok(self.arena.checkout(name).await)
    }

    async fn release(&self, mut handle: AlertHandle) -> Result<(), StorageError> {
        // Written while the checkout is still held
        let alert = handle.commit();
        let written = serde_json::to_vec_pretty(alert)
            .map_err(|e| StorageError::Serialization(e.to_string()))
            .and_then(|data| self.backend.write(&self.backend.alert_path(&alert.name), &data));

        if let Err(e) = written {
            handle.rollback();
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Alert>, StorageError> {
        Ok(self.arena.snapshot(name).await)
    }

    async fn all(&self) -> Result<Vec<Alert>, StorageError> {
        Ok(self.arena.snapshot_all().await)
    }
}

struct FileKvStore {
    data: RwLock<BTreeMap<String, String>>,
    backend: Arc<FileBackend>,
}

impl FileKvStore {
    fn mutate(&self, op: KvOp<'_>) -> Result<(), StorageError> {
        let mut data = self.data.write();
        let mut next = data.clone();
        kv_apply(&mut next, op)?;

        let bytes = serde_json::to_vec_pretty(&next)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.backend.write(&self.backend.kv_path(), &bytes)?;

        *data = next;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        Ok(self.data.read().clone())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(KvOp::Put(key, value))
    }

    async fn upsert(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(KvOp::Upsert(key, value))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(KvOp::Delete(key))
    }
}
