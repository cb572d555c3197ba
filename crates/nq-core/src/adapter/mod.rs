//! # Notifications Adapter
//!
//! Pre-stage that pulls notification records from the upstream document
//! store, enriches them with the name map and the service catalog, and
//! reduces them to the messages the pipeline has not seen yet.
//!
//! Each run:
//! 1. Reads the notifications document (cached per URL)
//! 2. Builds the [`CategoryMap`] from the three name-map dictionaries
//! 3. Reads the catalog snapshot, keeping the previous one on failure
//! 4. Converts records, dropping anything created more than `max_age` ago
//! 5. Compares against every stored row and returns the deltas
//!
//! When the store is empty every record is returned as a bulk load.

use crate::compare::{CompareOptions, ComparisonEngine};
use crate::crn::{Crn, GENERIC_CRN};
use crate::notification::{
    string_or_list, LocalizedText, Notification, NotificationMessage,
};
use crate::store::NotificationStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod cache;
pub mod catalog;
pub mod name_map;
pub mod upstream;

pub use cache::{TtlCache, DEFAULT_CACHE_TTL};
pub use catalog::{CatalogCache, CatalogSnapshot};
pub use name_map::{new_name_map, CategoryMap, Component, ComponentKind, NameMapLoader, NameMapUrls};
pub use upstream::{AdapterError, Credentials, HttpUpstreamClient, UpstreamClient};

/// Records created longer ago than this are never emitted
pub const DEFAULT_MAX_AGE_DAYS: i64 = 90;

// ============================================================================
// Upstream Records
// ============================================================================

/// A notification as published by the upstream document store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamNotification {
    pub id: String,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type", default)]
    pub notification_type: String,

    #[serde(default)]
    pub category: String,

    #[serde(default, deserialize_with = "string_or_list")]
    pub crns: Vec<String>,

    #[serde(default)]
    pub creation_time: String,

    #[serde(default)]
    pub update_time: String,

    #[serde(default)]
    pub event_start: String,

    #[serde(default)]
    pub event_end: String,

    #[serde(default)]
    pub incident_id: String,

    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub removed: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NotificationsDocument {
    List(Vec<UpstreamNotification>),
    Envelope {
        notifications: Vec<UpstreamNotification>,
    },
}

/// Decode the notifications document: an array or `{notifications: [...]}`
pub fn parse_notifications(
    url: &str,
    body: &[u8],
) -> Result<Vec<UpstreamNotification>, AdapterError> {
    match serde_json::from_slice(body).map_err(|e| AdapterError::parse(url, e))? {
        NotificationsDocument::List(records)
        | NotificationsDocument::Envelope {
            notifications: records,
        } => Ok(records),
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Adapter settings
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub notifications_url: String,
    pub name_maps: NameMapUrls,
    pub catalog_url: String,
    pub cache_ttl: Duration,
    pub max_age: chrono::Duration,
    /// Source recorded for upstream records that carry none
    pub default_source: String,
    pub compare: CompareOptions,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            notifications_url: String::new(),
            name_maps: NameMapUrls::default(),
            catalog_url: String::new(),
            cache_ttl: DEFAULT_CACHE_TTL,
            max_age: chrono::Duration::days(DEFAULT_MAX_AGE_DAYS),
            default_source: "catalog".to_string(),
            compare: CompareOptions::default(),
        }
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Outcome of one adapter run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterRun {
    pub messages: Vec<NotificationMessage>,
    pub fetched: usize,
    pub dropped_old: usize,
    pub bulk: bool,
}

/// Upstream pull, enrichment and comparison
pub struct NotificationsAdapter {
    config: AdapterConfig,
    client: Arc<dyn UpstreamClient>,
    store: Arc<dyn NotificationStore>,
    notifications: TtlCache<Vec<UpstreamNotification>>,
    name_maps: NameMapLoader,
    catalog: CatalogCache,
    engine: ComparisonEngine,
}

impl NotificationsAdapter {
    pub fn new(
        config: AdapterConfig,
        client: Arc<dyn UpstreamClient>,
        store: Arc<dyn NotificationStore>,
    ) -> Self {
        Self {
            notifications: TtlCache::new(config.cache_ttl),
            name_maps: NameMapLoader::new(client.clone(), config.name_maps.clone(), config.cache_ttl),
            catalog: CatalogCache::new(client.clone(), config.catalog_url.clone(), config.cache_ttl),
            engine: ComparisonEngine::new(config.compare),
            config,
            client,
            store,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<AdapterRun, AdapterError> {
        self.run_once_at(Utc::now()).await
    }

    /// One run with an explicit clock for the age cutoff
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<AdapterRun, AdapterError> {
        let records = self.upstream_notifications().await?;
        let name_map = self.name_maps.load().await?;
        let catalog = if self.config.catalog_url.is_empty() {
            None
        } else {
            Some(self.catalog.snapshot().await?)
        };

        let mut run = AdapterRun {
            fetched: records.len(),
            ..AdapterRun::default()
        };

        let mut incoming = Vec::with_capacity(records.len());
        for record in records.iter() {
            if crate::time::is_older_than(&record.creation_time, self.config.max_age, now) {
                debug!(id = %record.id, created = %record.creation_time, "Dropping aged notification");
                run.dropped_old += 1;
                continue;
            }
            incoming.push(self.convert(record, &name_map, catalog.as_deref()));
        }

        let existing = self.store.get_all(true).await?;
        run.bulk = existing.is_empty();
        run.messages = if run.bulk {
            incoming.into_iter().map(NotificationMessage::bulk_load).collect()
        } else {
            self.engine
                .compare_and_emit(&existing, &incoming)
                .into_iter()
                .map(NotificationMessage::update)
                .collect()
        };

        info!(
            fetched = run.fetched,
            dropped_old = run.dropped_old,
            emitted = run.messages.len(),
            bulk = run.bulk,
            "Notifications adapter run complete"
        );
        Ok(run)
    }

    async fn upstream_notifications(&self) -> Result<Arc<Vec<UpstreamNotification>>, AdapterError> {
        let url = self.config.notifications_url.as_str();
        if let Some(cached) = self.notifications.get(url) {
            return Ok(cached);
        }
        let body = self.client.fetch(url).await?;
        Ok(self.notifications.set(url, parse_notifications(url, &body)?))
    }

    /// Map an upstream record onto the stored notification shape
    pub fn convert(
        &self,
        record: &UpstreamNotification,
        name_map: &CategoryMap,
        catalog: Option<&CatalogSnapshot>,
    ) -> Notification {
        let component = name_map.match_category(&record.category);

        let crn_full = if !record.crns.is_empty() {
            record.crns.clone()
        } else if let Some(component) = component {
            vec![Crn::for_service(&component.service_name).to_string()]
        } else {
            vec![GENERIC_CRN.to_string()]
        };

        let resource_display_names = match component {
            Some(component) => catalog
                .and_then(|c| c.active(&component.service_name))
                .map(|resource| resource.display_names())
                .filter(|names| !names.is_empty())
                .unwrap_or_else(|| english(&component.display_name)),
            None => Vec::new(),
        };

        let source = if record.source.trim().is_empty() {
            self.config.default_source.clone()
        } else {
            record.source.clone()
        };

        Notification {
            record_id: None,
            source,
            source_id: record.id.clone(),
            crn_full,
            source_creation_time: record.creation_time.clone(),
            source_update_time: record.update_time.clone(),
            event_time_start: record.event_start.clone(),
            event_time_end: record.event_end.clone(),
            notification_type: record.notification_type.clone(),
            category: component
                .map(|c| c.kind.as_str().to_string())
                .unwrap_or_else(|| record.category.clone()),
            incident_id: record.incident_id.clone(),
            resource_display_names,
            short_description: english(&record.title),
            long_description: english(&record.description),
            pnp_removed: record.removed,
            tags: record.tags.join(","),
            ..Notification::default()
        }
    }
}

fn english(text: &str) -> Vec<LocalizedText> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![LocalizedText::english(text)]
    }
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
