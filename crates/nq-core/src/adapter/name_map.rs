//! Category to service name mapping.
//!
//! Three dictionaries (services, runtimes, platforms) map a notification
//! category to the service it concerns. They are merged into one
//! [`CategoryMap`]; the dictionary an entry came from becomes its kind.

use super::cache::TtlCache;
use super::upstream::{AdapterError, Credentials, HttpUpstreamClient, UpstreamClient};
use crate::secrets::SecretValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

// ============================================================================
// Core Types
// ============================================================================

/// Which dictionary a component was defined in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Platform,
    Runtimes,
    #[default]
    Services,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Runtimes => "runtimes",
            Self::Services => "services",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One name-map entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub service_name: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default, skip_deserializing)]
    pub kind: ComponentKind,
}

/// Merged category index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMap {
    entries: HashMap<String, Component>,
}

impl CategoryMap {
    /// Merge dictionaries in order
    ///
    /// An id defined more than once is logged as an error and the last
    /// definition is kept.
    pub fn merge<I>(dictionaries: I) -> Self
    where
        I: IntoIterator<Item = (ComponentKind, Vec<Component>)>,
    {
        let mut entries: HashMap<String, Component> = HashMap::new();
        for (kind, components) in dictionaries {
            for mut component in components {
                component.kind = kind;
                let id = component.id.trim().to_ascii_lowercase();
                if let Some(previous) = entries.get(&id) {
                    error!(
                        id = %component.id,
                        previous_kind = %previous.kind,
                        previous_service = %previous.service_name,
                        kind = %kind,
                        service = %component.service_name,
                        "Duplicate name-map id; keeping the later definition"
                    );
                }
                entries.insert(id, component);
            }
        }
        Self { entries }
    }

    /// Component registered for a category id
    pub fn match_category(&self, category_id: &str) -> Option<&Component> {
        self.entries.get(&category_id.trim().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Locations of the three dictionaries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMapUrls {
    pub services: String,
    pub runtimes: String,
    pub platforms: String,
}

impl NameMapUrls {
    fn in_merge_order(&self) -> [(ComponentKind, &str); 3] {
        [
            (ComponentKind::Services, self.services.as_str()),
            (ComponentKind::Runtimes, self.runtimes.as_str()),
            (ComponentKind::Platform, self.platforms.as_str()),
        ]
    }
}

/// Decode one dictionary document
pub fn parse_dictionary(url: &str, body: &[u8]) -> Result<Vec<Component>, AdapterError> {
    serde_json::from_slice(body).map_err(|e| AdapterError::parse(url, e))
}

// ============================================================================
// Loading
// ============================================================================

/// Loads the dictionaries through a per-URL cache
pub struct NameMapLoader {
    client: Arc<dyn UpstreamClient>,
    urls: NameMapUrls,
    cache: TtlCache<Vec<Component>>,
}

impl NameMapLoader {
    pub fn new(client: Arc<dyn UpstreamClient>, urls: NameMapUrls, ttl: Duration) -> Self {
        Self {
            client,
            urls,
            cache: TtlCache::new(ttl),
        }
    }

    /// Build the merged map, fetching only dictionaries whose cache entry expired
    pub async fn load(&self) -> Result<CategoryMap, AdapterError> {
        let mut dictionaries = Vec::with_capacity(3);
        for (kind, url) in self.urls.in_merge_order() {
            if url.is_empty() {
                continue;
            }
            let components = match self.cache.get(url) {
                Some(cached) => cached,
                None => {
                    let body = self.client.fetch(url).await?;
                    self.cache.set(url, parse_dictionary(url, &body)?)
                }
            };
            dictionaries.push((kind, components.as_ref().clone()));
        }
        Ok(CategoryMap::merge(dictionaries))
    }
}

/// Fetch and merge the three dictionaries once, without caching
pub async fn new_name_map(
    id: &str,
    password: SecretValue,
    url_services: &str,
    url_runtimes: &str,
    url_platforms: &str,
) -> Result<CategoryMap, AdapterError> {
    let client = HttpUpstreamClient::new(
        Some(Credentials::new(id, password)),
        super::upstream::DEFAULT_FETCH_TIMEOUT,
    )?;
    let loader = NameMapLoader::new(
        Arc::new(client),
        NameMapUrls {
            services: url_services.to_string(),
            runtimes: url_runtimes.to_string(),
            platforms: url_platforms.to_string(),
        },
        Duration::ZERO,
    );
    loader.load().await
}

#[cfg(test)]
#[path = "name_map_tests.rs"]
mod tests;
