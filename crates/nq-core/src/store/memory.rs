//! # In-Memory Notification Store
//!
//! Thread-safe store for tests and local runs. Follows the same write rules
//! as the PostgreSQL store and can simulate a database outage.

use super::{plan_insert, plan_update, sync_sibling, InsertPlan, NotificationStore, StoreError};
use crate::notification::{Notification, NotificationKey};
use crate::resource::CloudResource;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<String, Notification>,
    /// Record ids in insertion order
    order: Vec<String>,
    keys: HashMap<NotificationKey, String>,
    resources: HashMap<String, CloudResource>,
}

impl Tables {
    fn key_of(row: &Notification) -> NotificationKey {
        NotificationKey::new(row.source.clone(), row.source_id.clone(), row.primary_crn())
    }

    fn find(&self, key: &NotificationKey) -> Option<&Notification> {
        self.keys.get(key).and_then(|id| self.rows.get(id))
    }

    fn put(&mut self, row: Notification) {
        let id = row.record_id.clone().unwrap_or_default();
        self.keys.insert(Self::key_of(&row), id.clone());
        if self.rows.insert(id.clone(), row).is_none() {
            self.order.push(id);
        }
    }

    fn ordered(&self) -> impl Iterator<Item = &Notification> {
        self.order.iter().filter_map(|id| self.rows.get(id))
    }

    fn sync_siblings(&mut self, written: &Notification) {
        let now = Utc::now();
        let updates: Vec<Notification> = self
            .ordered()
            .filter(|r| {
                r.record_id != written.record_id
                    && r.source == written.source
                    && r.source_id == written.source_id
            })
            .filter_map(|r| sync_sibling(r, written, now))
            .collect();
        for row in updates {
            self.put(row);
        }
    }
}

// ============================================================================
// Default Implementations
// ============================================================================

/// In-memory [`NotificationStore`]
///
/// Rows are returned in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationStore {
    tables: Arc<RwLock<Tables>>,
    outage: Arc<AtomicBool>,
    resets: Arc<AtomicUsize>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until cleared
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Number of `reset` calls so far
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Number of stored rows
    pub fn row_count(&self) -> usize {
        self.read().map(|t| t.rows.len()).unwrap_or(0)
    }

    fn available(&self) -> Result<(), StoreError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "simulated database outage".to_string(),
            });
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.available()?;
        Ok(self
            .tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.available()?;
        Ok(self
            .tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn get_all(&self, include_removed: bool) -> Result<Vec<Notification>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .ordered()
            .filter(|r| include_removed || !r.pnp_removed)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, record_id: &str) -> Result<Option<Notification>, StoreError> {
        Ok(self.read()?.rows.get(record_id).cloned())
    }

    async fn get_by_key(
        &self,
        key: &NotificationKey,
    ) -> Result<Option<Notification>, StoreError> {
        Ok(self.read()?.find(key).cloned())
    }

    async fn insert(&self, notification: &Notification) -> Result<String, StoreError> {
        let mut tables = self.write()?;
        let existing = tables.find(&notification.row_key()).cloned();

        let plan = plan_insert(existing.as_ref(), notification, Utc::now())?;
        let record_id = plan.record_id().to_string();
        match plan {
            InsertPlan::Unchanged { .. } => {
                debug!(key = %notification.row_key(), "Source update time unchanged; row kept");
            }
            InsertPlan::Update(row) | InsertPlan::Create(row) => {
                tables.put(row.clone());
                tables.sync_siblings(&row);
            }
        }
        Ok(record_id)
    }

    async fn update(&self, notification: &Notification) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let key = notification.row_key();
        let current = tables.find(&key).cloned().ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;

        let row = plan_update(&current, notification, Utc::now())?;
        tables.put(row.clone());
        tables.sync_siblings(&row);
        Ok(())
    }

    async fn delete(&self, record_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        match tables.rows.remove(record_id) {
            Some(row) => {
                tables.keys.remove(&Tables::key_of(&row));
                tables.order.retain(|id| id != record_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_resource(&self, resource: &CloudResource) -> Result<String, StoreError> {
        resource.validate()?;
        let mut tables = self.write()?;

        let mut stored = resource.clone();
        stored.record_id = tables
            .resources
            .get(&resource.name)
            .and_then(|r| r.record_id.clone())
            .or_else(|| Some(ulid::Ulid::new().to_string()));
        stored.pnp_update_time = crate::time::now_rfc3339();

        let record_id = stored.record_id.clone().unwrap_or_default();
        tables.resources.insert(stored.name.clone(), stored);
        Ok(record_id)
    }

    async fn get_resource(&self, name: &str) -> Result<Option<CloudResource>, StoreError> {
        Ok(self.read()?.resources.get(name).cloned())
    }

    async fn is_active(&self) -> bool {
        self.available().is_ok()
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.available()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
