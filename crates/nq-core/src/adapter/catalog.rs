//! Catalog resource cache.
//!
//! Holds the last good snapshot of the service catalog. When a refresh fails
//! the previous snapshot keeps being served; its fetch time is the only sign
//! that it is stale.

use super::upstream::{AdapterError, UpstreamClient};
use crate::resource::CloudResource;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One catalog fetch
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub resources: HashMap<String, CloudResource>,
    pub fetched_at: DateTime<Utc>,
    refreshed: Instant,
}

impl CatalogSnapshot {
    pub fn new(resources: Vec<CloudResource>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.name.clone(), r)).collect(),
            fetched_at: Utc::now(),
            refreshed: Instant::now(),
        }
    }

    /// Active resource by name
    pub fn active(&self, name: &str) -> Option<&CloudResource> {
        self.resources.get(name).filter(|r| r.active)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<CloudResource>),
    Envelope { resources: Vec<CloudResource> },
}

/// Decode a catalog document: an array or `{resources: [...]}`
pub fn parse_catalog(url: &str, body: &[u8]) -> Result<Vec<CloudResource>, AdapterError> {
    match serde_json::from_slice(body).map_err(|e| AdapterError::parse(url, e))? {
        CatalogDocument::List(resources) | CatalogDocument::Envelope { resources } => {
            Ok(resources)
        }
    }
}

/// TTL-bounded catalog cache that keeps its previous snapshot on failure
pub struct CatalogCache {
    client: Arc<dyn UpstreamClient>,
    url: String,
    ttl: Duration,
    snapshot: ArcSwapOption<CatalogSnapshot>,
}

impl CatalogCache {
    pub fn new(client: Arc<dyn UpstreamClient>, url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            ttl,
            snapshot: ArcSwapOption::empty(),
        }
    }

    /// Current snapshot without refreshing
    pub fn current(&self) -> Option<Arc<CatalogSnapshot>> {
        self.snapshot.load_full()
    }

    /// Snapshot, refreshed when older than the TTL
    ///
    /// Fails only when the refresh fails and there is no earlier snapshot.
    pub async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>, AdapterError> {
        let current = self.current();
        if let Some(snapshot) = &current {
            if snapshot.refreshed.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }

        match self.refresh().await {
            Ok(fresh) => Ok(fresh),
            Err(e) => match current {
                Some(previous) => {
                    warn!(
                        url = %self.url,
                        error = %e,
                        fetched_at = %previous.fetched_at,
                        "Catalog refresh failed; serving previous snapshot"
                    );
                    Ok(previous)
                }
                None => Err(e),
            },
        }
    }

    async fn refresh(&self) -> Result<Arc<CatalogSnapshot>, AdapterError> {
        let body = self.client.fetch(&self.url).await?;
        let snapshot = Arc::new(CatalogSnapshot::new(parse_catalog(&self.url, &body)?));
        info!(url = %self.url, resources = snapshot.len(), "Catalog refreshed");
        self.snapshot.store(Some(snapshot.clone()));
        Ok(snapshot)
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
