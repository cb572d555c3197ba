//! Catalog resources.

use crate::notification::{string_or_list, LocalizedText};
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A resource (service) as described by the service catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub active: bool,

    #[serde(default, deserialize_with = "string_or_list")]
    pub tags: Vec<String>,

    /// Display text per language
    #[serde(default)]
    pub overview: BTreeMap<String, String>,

    #[serde(default)]
    pub pnp_update_time: String,
}

impl CloudResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "name".to_string(),
            });
        }
        Ok(())
    }

    /// Overview entries as localized display names
    pub fn display_names(&self) -> Vec<LocalizedText> {
        self.overview
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(language, text)| LocalizedText::new(language.clone(), text.clone()))
            .collect()
    }
}
