//! Alert records and the per-name checkout arena

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::alerts::Level;

/// Durable alert state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    pub level: Level,
    /// Consecutive same-level raises since the last transition
    pub count: u64,
    pub last_change: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// A never-seen alert: neutral level, zero count
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            level: Level::default(),
            count: 0,
            last_change: now,
            updated_at: now,
        }
    }
}

/// Exclusive checkout of one alert record.
///
/// The record is only reachable through the guard; dropping the handle (or
/// passing it to `AlertStore::release`) ends the checkout.
pub struct AlertHandle {
    guard: OwnedMutexGuard<Alert>,
    original: Alert,
}

impl AlertHandle {
    pub fn name(&self) -> &str {
        &self.guard.name
    }

    pub fn level(&self) -> Level {
        self.guard.level
    }

    pub fn count(&self) -> u64 {
        self.guard.count
    }

    pub fn inc(&mut self) {
        self.guard.count += 1;
    }

    /// Move to a new level; the occurrence counter restarts at 0.
    pub fn update_level(&mut self, level: Level) {
        self.guard.level = level;
        self.guard.count = 0;
        self.guard.last_change = Utc::now();
    }

    /// Stamp the commit time and expose the record for persisting.
    pub(crate) fn commit(&mut self) -> &Alert {
        self.guard.updated_at = Utc::now();
        &self.guard
    }

    /// Restore the record as it was at checkout, after a failed persist.
    pub(crate) fn rollback(&mut self) {
        *self.guard = self.original.clone();
    }
}

impl std::fmt::Debug for AlertHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertHandle")
            .field("alert", &*self.guard)
            .finish()
    }
}

/// Records keyed by name, each behind its own async mutex.
///
/// Checkouts of the same name serialize; different names never contend.
#[derive(Default)]
pub struct AlertArena {
    records: DashMap<String, Arc<Mutex<Alert>>>,
}

impl AlertArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = Alert>) -> Self {
        let arena = Self::new();
        for alert in records {
            arena
                .records
                .insert(alert.name.clone(), Arc::new(Mutex::new(alert)));
        }
        arena
    }

    fn slot(&self, name: &str) -> Arc<Mutex<Alert>> {
        let entry = self
            .records
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Alert::new(name))));
        Arc::clone(entry.value())
    }

    /// Check out the record for `name`, creating it if absent.
    pub async fn checkout(&self, name: &str) -> AlertHandle {
        // The map shard lock is released before awaiting the record lock.
        let slot = self.slot(name);
        let guard = slot.lock_owned().await;
        AlertHandle {
            original: guard.clone(),
            guard,
        }
    }

    pub async fn snapshot(&self, name: &str) -> Option<Alert> {
        let slot = self.records.get(name).map(|e| Arc::clone(e.value()))?;
        let alert = slot.lock().await;
        Some(alert.clone())
    }

    /// Snapshot of every record, sorted by name
    pub async fn snapshot_all(&self) -> Vec<Alert> {
        let slots: Vec<Arc<Mutex<Alert>>> = self
            .records
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut alerts = Vec::with_capacity(slots.len());
        for slot in slots {
            alerts.push(slot.lock().await.clone());
        }
        alerts.sort_by(|a, b| a.name.cmp(&b.name));
        alerts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
