//! # PostgreSQL Notification Store
//!
//! `sqlx`-backed [`NotificationStore`]. Times are stored as RFC 3339 text and
//! localized text as JSONB. The pool sits behind an atomic swap so a reset
//! replaces it without blocking readers that already hold the old one.

use super::{plan_insert, plan_update, sync_sibling, InsertPlan, NotificationStore, StoreError};
use crate::notification::{LocalizedText, Notification, NotificationKey};
use crate::resource::CloudResource;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const NOTIFICATION_COLUMNS: &str = "record_id, source, source_id, crn_full, \
    pnp_creation_time, pnp_update_time, source_creation_time, source_update_time, \
    event_time_start, event_time_end, type, category, incident_id, \
    resource_display_names, short_description, long_description, pnp_removed, tags";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS notifications (
        record_id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        source_id TEXT NOT NULL,
        crn_full TEXT NOT NULL DEFAULT '',
        pnp_creation_time TEXT NOT NULL DEFAULT '',
        pnp_update_time TEXT NOT NULL DEFAULT '',
        source_creation_time TEXT NOT NULL DEFAULT '',
        source_update_time TEXT NOT NULL DEFAULT '',
        event_time_start TEXT NOT NULL DEFAULT '',
        event_time_end TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        incident_id TEXT NOT NULL DEFAULT '',
        resource_display_names JSONB NOT NULL DEFAULT '[]',
        short_description JSONB NOT NULL DEFAULT '[]',
        long_description JSONB NOT NULL DEFAULT '[]',
        pnp_removed BOOLEAN NOT NULL DEFAULT FALSE,
        tags TEXT NOT NULL DEFAULT ''
    )",
    "DROP INDEX IF EXISTS notifications_key",
    "CREATE UNIQUE INDEX IF NOT EXISTS notifications_row_key
        ON notifications (source, source_id, crn_full)",
    "CREATE TABLE IF NOT EXISTS resources (
        record_id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        tags JSONB NOT NULL DEFAULT '[]',
        overview JSONB NOT NULL DEFAULT '{}',
        pnp_update_time TEXT NOT NULL DEFAULT ''
    )",
];

/// Rows of one `(source, source_id)`
const GROUP_FILTER: &str = "source = $1 AND source_id = $2";

/// The row under one `(source, source_id, crn_full)` key
const KEY_FILTER: &str = "source = $1 AND source_id = $2 AND crn_full = $3";

fn select_notifications(filter: &str) -> String {
    format!("SELECT {} FROM notifications WHERE {}", NOTIFICATION_COLUMNS, filter)
}

// ============================================================================
// Configuration
// ============================================================================

/// Open-connection ceiling used when no `max_open` is configured
///
/// sqlx needs a ceiling and has no cap on the number of idle connections;
/// idle connections are closed after `idle_timeout` instead.
pub const DEFAULT_MAX_OPEN: u32 = 100;

/// Connection pool settings
#[derive(Debug, Clone)]
pub struct PostgresStoreConfig {
    pub url: String,
    /// Cap on open connections (`DB_MAX_OPEN_CONNS`)
    pub max_open: Option<u32>,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl PostgresStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_open: None,
            idle_timeout: Duration::from_secs(20),
            acquire_timeout: Duration::from_secs(10),
        }
    }

    /// Cap open connections; zero or `None` leaves the pool at its default ceiling
    pub fn with_max_open(mut self, max_open: Option<u32>) -> Self {
        self.max_open = max_open.filter(|m| *m > 0);
        self
    }

    pub fn max_connections(&self) -> u32 {
        self.max_open.unwrap_or(DEFAULT_MAX_OPEN)
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(0)
            .max_connections(self.max_connections())
            .idle_timeout(Some(self.idle_timeout))
            .acquire_timeout(self.acquire_timeout)
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Tls(_) => Self::Unavailable {
                message: err.to_string(),
            },
            sqlx::Error::RowNotFound => Self::NotFound {
                key: "row".to_string(),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Serialization {
                message: err.to_string(),
            },
            other => Self::Database {
                message: other.to_string(),
            },
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL-backed notification store
pub struct PostgresNotificationStore {
    config: PostgresStoreConfig,
    pool: ArcSwap<PgPool>,
}

impl PostgresNotificationStore {
    /// Open the pool and verify it answers
    pub async fn connect(config: PostgresStoreConfig) -> Result<Self, StoreError> {
        let pool = config.pool_options().connect(&config.url).await?;
        info!(
            max_connections = config.max_connections(),
            "Connected to notification database"
        );
        Ok(Self {
            config,
            pool: ArcSwap::from_pointee(pool),
        })
    }

    /// Create the tables when absent
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let pool = self.pool.load_full();
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool.as_ref()).await?;
        }
        Ok(())
    }

    fn pool(&self) -> Arc<PgPool> {
        self.pool.load_full()
    }

    async fn find_for_update(
        tx: &mut Transaction<'_, Postgres>,
        key: &NotificationKey,
    ) -> Result<Option<Notification>, StoreError> {
        let sql = format!("{} FOR UPDATE", select_notifications(KEY_FILTER));
        let row = sqlx::query(&sql)
            .bind(&key.source)
            .bind(&key.source_id)
            .bind(&key.crn_full)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|r| notification_from_row(&r)).transpose()
    }

    async fn write_row(
        tx: &mut Transaction<'_, Postgres>,
        row: &Notification,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO notifications ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (record_id) DO UPDATE SET \
                crn_full = EXCLUDED.crn_full, \
                pnp_update_time = EXCLUDED.pnp_update_time, \
                source_creation_time = EXCLUDED.source_creation_time, \
                source_update_time = EXCLUDED.source_update_time, \
                event_time_start = EXCLUDED.event_time_start, \
                event_time_end = EXCLUDED.event_time_end, \
                type = EXCLUDED.type, \
                category = EXCLUDED.category, \
                incident_id = EXCLUDED.incident_id, \
                resource_display_names = EXCLUDED.resource_display_names, \
                short_description = EXCLUDED.short_description, \
                long_description = EXCLUDED.long_description, \
                pnp_removed = EXCLUDED.pnp_removed, \
                tags = EXCLUDED.tags",
            NOTIFICATION_COLUMNS
        );
        sqlx::query(&sql)
            .bind(row.record_id.as_deref().unwrap_or_default())
            .bind(&row.source)
            .bind(&row.source_id)
            .bind(row.primary_crn())
            .bind(&row.pnp_creation_time)
            .bind(&row.pnp_update_time)
            .bind(&row.source_creation_time)
            .bind(&row.source_update_time)
            .bind(&row.event_time_start)
            .bind(&row.event_time_end)
            .bind(&row.notification_type)
            .bind(&row.category)
            .bind(&row.incident_id)
            .bind(Json(&row.resource_display_names))
            .bind(Json(&row.short_description))
            .bind(Json(&row.long_description))
            .bind(row.pnp_removed)
            .bind(&row.tags)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn sync_siblings(
        tx: &mut Transaction<'_, Postgres>,
        written: &Notification,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "{} AND record_id <> $3 FOR UPDATE",
            select_notifications(GROUP_FILTER)
        );
        let rows = sqlx::query(&sql)
            .bind(&written.source)
            .bind(&written.source_id)
            .bind(written.record_id.as_deref().unwrap_or_default())
            .fetch_all(&mut **tx)
            .await?;

        let now = Utc::now();
        for row in rows {
            let sibling = notification_from_row(&row)?;
            if let Some(synced) = sync_sibling(&sibling, written, now) {
                Self::write_row(tx, &synced).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn get_all(&self, include_removed: bool) -> Result<Vec<Notification>, StoreError> {
        let sql = if include_removed {
            format!("SELECT {} FROM notifications ORDER BY record_id", NOTIFICATION_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM notifications WHERE NOT pnp_removed ORDER BY record_id",
                NOTIFICATION_COLUMNS
            )
        };
        let rows = sqlx::query(&sql).fetch_all(self.pool().as_ref()).await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn get_by_id(&self, record_id: &str) -> Result<Option<Notification>, StoreError> {
        let sql = format!(
            "SELECT {} FROM notifications WHERE record_id = $1",
            NOTIFICATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(record_id)
            .fetch_optional(self.pool().as_ref())
            .await?;
        row.map(|r| notification_from_row(&r)).transpose()
    }

    async fn get_by_key(
        &self,
        key: &NotificationKey,
    ) -> Result<Option<Notification>, StoreError> {
        let sql = select_notifications(KEY_FILTER);
        let row = sqlx::query(&sql)
            .bind(&key.source)
            .bind(&key.source_id)
            .bind(&key.crn_full)
            .fetch_optional(self.pool().as_ref())
            .await?;
        row.map(|r| notification_from_row(&r)).transpose()
    }

    async fn get_rows(
        &self,
        source: &str,
        source_id: &str,
    ) -> Result<Vec<Notification>, StoreError> {
        let sql = format!("{} ORDER BY record_id", select_notifications(GROUP_FILTER));
        let rows = sqlx::query(&sql)
            .bind(source)
            .bind(source_id)
            .fetch_all(self.pool().as_ref())
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn insert(&self, notification: &Notification) -> Result<String, StoreError> {
        let pool = self.pool();
        let mut tx = pool.begin().await?;

        let existing = Self::find_for_update(&mut tx, &notification.row_key()).await?;
        let plan = plan_insert(existing.as_ref(), notification, Utc::now())?;
        let record_id = plan.record_id().to_string();

        match plan {
            InsertPlan::Unchanged { .. } => {
                debug!(key = %notification.row_key(), "Source update time unchanged; row kept");
                tx.rollback().await?;
            }
            InsertPlan::Update(row) | InsertPlan::Create(row) => {
                Self::write_row(&mut tx, &row).await?;
                Self::sync_siblings(&mut tx, &row).await?;
                tx.commit().await?;
            }
        }
        Ok(record_id)
    }

    async fn update(&self, notification: &Notification) -> Result<(), StoreError> {
        let pool = self.pool();
        let mut tx = pool.begin().await?;

        let key = notification.row_key();
        let current = Self::find_for_update(&mut tx, &key)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;

        let row = plan_update(&current, notification, Utc::now())?;
        Self::write_row(&mut tx, &row).await?;
        Self::sync_siblings(&mut tx, &row).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, record_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE record_id = $1")
            .bind(record_id)
            .execute(self.pool().as_ref())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_resource(&self, resource: &CloudResource) -> Result<String, StoreError> {
        resource.validate()?;
        let row = sqlx::query(
            "INSERT INTO resources (record_id, name, active, tags, overview, pnp_update_time) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (name) DO UPDATE SET \
                active = EXCLUDED.active, \
                tags = EXCLUDED.tags, \
                overview = EXCLUDED.overview, \
                pnp_update_time = EXCLUDED.pnp_update_time \
             RETURNING record_id",
        )
        .bind(ulid::Ulid::new().to_string())
        .bind(&resource.name)
        .bind(resource.active)
        .bind(Json(&resource.tags))
        .bind(Json(&resource.overview))
        .bind(crate::time::now_rfc3339())
        .fetch_one(self.pool().as_ref())
        .await?;
        Ok(row.try_get("record_id")?)
    }

    async fn get_resource(&self, name: &str) -> Result<Option<CloudResource>, StoreError> {
        let row = sqlx::query(
            "SELECT record_id, name, active, tags, overview, pnp_update_time \
             FROM resources WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(self.pool().as_ref())
        .await?;

        row.map(|r| -> Result<CloudResource, StoreError> {
            let tags: Json<Vec<String>> = r.try_get("tags")?;
            let overview: Json<BTreeMap<String, String>> = r.try_get("overview")?;
            Ok(CloudResource {
                record_id: Some(r.try_get("record_id")?),
                name: r.try_get("name")?,
                active: r.try_get("active")?,
                tags: tags.0,
                overview: overview.0,
                pnp_update_time: r.try_get("pnp_update_time")?,
            })
        })
        .transpose()
    }

    async fn is_active(&self) -> bool {
        // A bare ping can succeed on a connection the server already dropped
        match sqlx::query("SELECT 1 WHERE 1 = 0")
            .fetch_optional(self.pool().as_ref())
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Database probe failed");
                false
            }
        }
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let fresh = self.config.pool_options().connect(&self.config.url).await?;
        let previous = self.pool.swap(Arc::new(fresh));
        previous.close().await;
        info!("Database pool reopened");
        Ok(())
    }
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let crn: String = row.try_get("crn_full")?;
    let display: Json<Vec<LocalizedText>> = row.try_get("resource_display_names")?;
    let short: Json<Vec<LocalizedText>> = row.try_get("short_description")?;
    let long: Json<Vec<LocalizedText>> = row.try_get("long_description")?;

    Ok(Notification {
        record_id: Some(row.try_get("record_id")?),
        source: row.try_get("source")?,
        source_id: row.try_get("source_id")?,
        crn_full: if crn.is_empty() { Vec::new() } else { vec![crn] },
        pnp_creation_time: row.try_get("pnp_creation_time")?,
        pnp_update_time: row.try_get("pnp_update_time")?,
        source_creation_time: row.try_get("source_creation_time")?,
        source_update_time: row.try_get("source_update_time")?,
        event_time_start: row.try_get("event_time_start")?,
        event_time_end: row.try_get("event_time_end")?,
        notification_type: row.try_get("type")?,
        category: row.try_get("category")?,
        incident_id: row.try_get("incident_id")?,
        resource_display_names: display.0,
        short_description: short.0,
        long_description: long.0,
        pnp_removed: row.try_get("pnp_removed")?,
        tags: row.try_get("tags")?,
    })
}

#[cfg(test)]
#[path = "postgres_tests.rs"]
mod tests;
