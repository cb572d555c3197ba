//! # Notification Store Gateway
//!
//! Read/write access to notification rows keyed by `(source, source_id, crn_full)`
//! and to catalog resources.
//!
//! Every physical row holds exactly one CRN. Writers expand multi-CRN
//! notifications with [`NotificationStore::insert_all`]; readers asking for the
//! generic CRN get rows collated back into one notification per
//! `(source, source_id)`.
//!
//! The write rules shared by every backend live in [`plan_insert`] and
//! [`plan_update`] so that the in-memory and PostgreSQL stores agree on
//! timestamps and identity.

use crate::crn::{self, Crn};
use crate::notification::{collate, Notification, NotificationKey};
use crate::resource::CloudResource;
use crate::time::{advance, timestamps_differ};
use crate::ValidationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryNotificationStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresNotificationStore, PostgresStoreConfig};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Notification not found: {key}")]
    NotFound { key: String },

    #[error("Invalid query filter: {message}")]
    InvalidFilter { message: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Stored value could not be decoded: {message}")]
    Serialization { message: String },
}

impl StoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }
}

// ============================================================================
// Query Filter
// ============================================================================

/// Parsed `key=value&key=value` query filter
///
/// Recognized keys are `crn`, `pnp_removed`, `source`, `source_id`, `type` and
/// `category`. When a key repeats the last value wins. An absent
/// `pnp_removed` places no constraint on the removal marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub crn: Option<String>,
    pub pnp_removed: Option<bool>,
    pub source: Option<String>,
    pub source_id: Option<String>,
    pub notification_type: Option<String>,
    pub category: Option<String>,
}

impl QueryFilter {
    pub fn parse(query: &str) -> Result<Self, StoreError> {
        let mut filter = Self::default();
        let query = query.trim().trim_start_matches('?');

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim().to_string();
            match key.as_ref() {
                "crn" => {
                    Crn::parse(&value).map_err(|e| StoreError::InvalidFilter {
                        message: format!("crn: {}", e),
                    })?;
                    filter.crn = Some(value);
                }
                "pnp_removed" => {
                    filter.pnp_removed = Some(match value.to_ascii_lowercase().as_str() {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(StoreError::InvalidFilter {
                                message: format!("pnp_removed must be true or false, got '{}'", other),
                            })
                        }
                    });
                }
                "source" => filter.source = Some(value),
                "source_id" => filter.source_id = Some(value),
                "type" => filter.notification_type = Some(value),
                "category" => filter.category = Some(value),
                other => {
                    return Err(StoreError::InvalidFilter {
                        message: format!("unknown filter key '{}'", other),
                    })
                }
            }
        }

        Ok(filter)
    }

    /// The requested CRN when it names something narrower than the generic mask
    pub fn specific_crn(&self) -> Option<&str> {
        self.crn.as_deref().filter(|c| !crn::is_generic(c))
    }

    /// Whether `row` passes every constraint
    pub fn matches(&self, row: &Notification) -> bool {
        let crn_ok = match self.specific_crn() {
            Some(mask) => row.crn_full.iter().any(|c| crn::crn_matches(c, mask)),
            None => true,
        };
        crn_ok && self.matches_attributes(row)
    }

    /// Whether `row` passes every constraint other than the CRN
    pub fn matches_attributes(&self, row: &Notification) -> bool {
        fn same(wanted: &Option<String>, actual: &str) -> bool {
            wanted.as_deref().map_or(true, |w| w.eq_ignore_ascii_case(actual))
        }

        self.pnp_removed.map_or(true, |r| r == row.pnp_removed)
            && same(&self.source, &row.source)
            && same(&self.source_id, &row.source_id)
            && same(&self.notification_type, &row.notification_type)
            && same(&self.category, &row.category)
    }
}

impl FromStr for QueryFilter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Write Planning
// ============================================================================

/// What an insert must do given the row currently stored under its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPlan {
    /// Same `source_update_time`; nothing is written
    Unchanged { record_id: String },

    /// Existing row is replaced
    Update(Notification),

    /// New row
    Create(Notification),
}

impl InsertPlan {
    pub fn record_id(&self) -> &str {
        match self {
            Self::Unchanged { record_id } => record_id,
            Self::Update(row) | Self::Create(row) => row.record_id.as_deref().unwrap_or(""),
        }
    }
}

/// Check that `incoming` can be written as a single row
pub fn validate_row(incoming: &Notification) -> Result<(), StoreError> {
    incoming.validate()?;
    if incoming.crn_full.len() > 1 {
        return Err(ValidationError::InvalidFormat {
            field: "crn_full".to_string(),
            message: format!(
                "a row holds one CRN, got {}; expand the notification first",
                incoming.crn_full.len()
            ),
        }
        .into());
    }
    Ok(())
}

/// Decide how to store `incoming` given the row currently under its key
pub fn plan_insert(
    existing: Option<&Notification>,
    incoming: &Notification,
    now: DateTime<Utc>,
) -> Result<InsertPlan, StoreError> {
    validate_row(incoming)?;

    let mut row = incoming.clone();
    row.dedup_languages();

    match existing {
        None => {
            let stamp = crate::time::format_timestamp(now);
            row.record_id = Some(ulid::Ulid::new().to_string());
            row.pnp_creation_time = stamp.clone();
            row.pnp_update_time = stamp;
            Ok(InsertPlan::Create(row))
        }
        Some(current) => {
            let record_id = current.record_id.clone().unwrap_or_default();
            if !timestamps_differ(&current.source_update_time, &incoming.source_update_time) {
                return Ok(InsertPlan::Unchanged { record_id });
            }
            row.record_id = Some(record_id);
            row.pnp_creation_time = current.pnp_creation_time.clone();
            row.pnp_update_time = advance(&current.pnp_update_time, now);
            Ok(InsertPlan::Update(row))
        }
    }
}

/// Build the replacement for `current` from `incoming`
///
/// Identity and creation time are kept; `pnp_update_time` always advances.
pub fn plan_update(
    current: &Notification,
    incoming: &Notification,
    now: DateTime<Utc>,
) -> Result<Notification, StoreError> {
    validate_row(incoming)?;

    let mut row = incoming.clone();
    row.dedup_languages();
    row.record_id = current.record_id.clone();
    row.pnp_creation_time = current.pnp_creation_time.clone();
    row.pnp_update_time = advance(&current.pnp_update_time, now);
    Ok(row)
}

/// Align a sibling row's source times with a freshly written row
///
/// Returns `None` when the sibling already agrees.
pub fn sync_sibling(
    sibling: &Notification,
    written: &Notification,
    now: DateTime<Utc>,
) -> Option<Notification> {
    if !timestamps_differ(&sibling.source_update_time, &written.source_update_time)
        && !timestamps_differ(&sibling.source_creation_time, &written.source_creation_time)
    {
        return None;
    }
    let mut row = sibling.clone();
    row.source_creation_time = written.source_creation_time.clone();
    row.source_update_time = written.source_update_time.clone();
    row.pnp_update_time = advance(&sibling.pnp_update_time, now);
    Some(row)
}

// ============================================================================
// Interface Traits
// ============================================================================

/// Persistent store of notification rows and catalog resources
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Every row, optionally including soft-deleted ones
    async fn get_all(&self, include_removed: bool) -> Result<Vec<Notification>, StoreError>;

    async fn get_by_id(&self, record_id: &str) -> Result<Option<Notification>, StoreError>;

    async fn get_by_key(&self, key: &NotificationKey)
        -> Result<Option<Notification>, StoreError>;

    /// Insert or update a single-CRN row, returning its record id
    ///
    /// A row whose `source_update_time` did not change is left untouched.
    async fn insert(&self, notification: &Notification) -> Result<String, StoreError>;

    /// Replace the row stored under the notification's key
    ///
    /// Fails with [`StoreError::NotFound`] when the key has no row.
    async fn update(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Remove a row; returns whether it existed
    async fn delete(&self, record_id: &str) -> Result<bool, StoreError>;

    async fn upsert_resource(&self, resource: &CloudResource) -> Result<String, StoreError>;

    async fn get_resource(&self, name: &str) -> Result<Option<CloudResource>, StoreError>;

    /// Cheap round-trip probe used by the liveness supervisor
    async fn is_active(&self) -> bool;

    /// Drop and reopen the underlying connections
    async fn reset(&self) -> Result<(), StoreError>;

    /// All rows of one logical notification, including removed ones
    async fn get_rows(&self, source: &str, source_id: &str)
        -> Result<Vec<Notification>, StoreError> {
        Ok(self
            .get_all(true)
            .await?
            .into_iter()
            .filter(|r| r.source == source && r.source_id == source_id)
            .collect())
    }

    /// Insert every CRN of `notification` as its own row
    ///
    /// Writing a row syncs the source times of its siblings, so each row is
    /// decided against the rows stored before the first write.
    async fn insert_all(&self, notification: &Notification) -> Result<Vec<String>, StoreError> {
        let rows = notification.expand();
        let mut before = Vec::with_capacity(rows.len());
        for row in &rows {
            before.push(self.get_by_key(&row.row_key()).await?);
        }

        let mut ids = Vec::with_capacity(rows.len());
        for (row, current) in rows.iter().zip(before) {
            match current {
                Some(current)
                    if timestamps_differ(&current.source_update_time, &row.source_update_time) =>
                {
                    self.update(row).await?;
                    ids.push(current.record_id.unwrap_or_default());
                }
                _ => ids.push(self.insert(row).await?),
            }
        }
        Ok(ids)
    }

    /// Rows matching `query`, collated per `(source, source_id)`
    ///
    /// For a specific CRN only notifications with a matching row are returned,
    /// but each carries the CRNs of all its rows. A `limit` of zero means no
    /// limit.
    async fn get_by_query(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let filter = QueryFilter::parse(query)?;
        let rows = self.get_all(true).await?;

        let collated = match filter.specific_crn() {
            None => collate(rows.into_iter().filter(|r| filter.matches(r))),
            Some(_) => {
                let matched: Vec<(String, String)> = rows
                    .iter()
                    .filter(|r| filter.matches(r))
                    .map(|r| (r.source.clone(), r.source_id.clone()))
                    .collect();

                let mut groups = Vec::new();
                for group in matched {
                    if groups.contains(&group) {
                        continue;
                    }
                    groups.push(group);
                }

                let mut merged = Vec::with_capacity(groups.len());
                for (source, source_id) in groups {
                    let siblings = rows.iter().filter(|r| {
                        r.source == source
                            && r.source_id == source_id
                            && filter.matches_attributes(r)
                    });
                    // The matching row leads so its CRN is the primary one
                    let (leading, rest): (Vec<_>, Vec<_>) =
                        siblings.cloned().partition(|r| filter.matches(r));
                    merged.extend(collate(leading.into_iter().chain(rest)));
                }
                merged
            }
        };

        let page = collated.into_iter().skip(offset);
        Ok(if limit == 0 {
            page.collect()
        } else {
            page.take(limit).collect()
        })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
