//! # Notification Model
//!
//! The persistent notification entity, its broker message form and the CRN
//! expansion/collation rules.
//!
//! A stored row carries exactly one CRN. A logical notification covering
//! several CRNs is expanded into one row per CRN on write and collated back
//! into a single value, keyed by `(source, source_id)`, on read.

use crate::crn;
use crate::ValidationError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

// ============================================================================
// Core Types
// ============================================================================

/// One localized string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub language: String,

    #[serde(alias = "name")]
    pub text: String,
}

impl LocalizedText {
    pub fn new(language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            text: text.into(),
        }
    }

    /// English text, the default language of upstream feeds
    pub fn english(text: impl Into<String>) -> Self {
        Self::new("en", text)
    }
}

/// Identity of one stored row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationKey {
    pub source: String,
    pub source_id: String,
    pub crn_full: String,
}

impl NotificationKey {
    pub fn new(
        source: impl Into<String>,
        source_id: impl Into<String>,
        crn_full: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            crn_full: crn_full.into(),
        }
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.source_id, self.crn_full)
    }
}

/// A notification as stored and as carried on the wire
///
/// All times are RFC 3339 strings; empty means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub source_id: String,

    #[serde(default, deserialize_with = "string_or_list")]
    pub crn_full: Vec<String>,

    #[serde(default)]
    pub pnp_creation_time: String,

    #[serde(default)]
    pub pnp_update_time: String,

    #[serde(default)]
    pub source_creation_time: String,

    #[serde(default)]
    pub source_update_time: String,

    #[serde(default)]
    pub event_time_start: String,

    #[serde(default)]
    pub event_time_end: String,

    #[serde(rename = "type", default)]
    pub notification_type: String,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub incident_id: String,

    #[serde(default, deserialize_with = "localized_list")]
    pub resource_display_names: Vec<LocalizedText>,

    #[serde(default, deserialize_with = "localized_list")]
    pub short_description: Vec<LocalizedText>,

    #[serde(default, deserialize_with = "localized_list")]
    pub long_description: Vec<LocalizedText>,

    #[serde(default)]
    pub pnp_removed: bool,

    #[serde(default)]
    pub tags: String,
}

impl Notification {
    /// Minimal notification for one CRN
    pub fn new(
        source: impl Into<String>,
        source_id: impl Into<String>,
        crn_full: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            crn_full: vec![crn_full.into()],
            ..Self::default()
        }
    }

    /// Check the fields every stored row needs
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "source".to_string(),
            });
        }
        if self.source_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "source_id".to_string(),
            });
        }
        Ok(())
    }

    /// The first CRN, or the empty string for a notification without CRNs
    pub fn primary_crn(&self) -> &str {
        self.crn_full.first().map(String::as_str).unwrap_or("")
    }

    /// Identity of the row holding the first CRN
    pub fn row_key(&self) -> NotificationKey {
        NotificationKey::new(&self.source, &self.source_id, self.primary_crn())
    }

    /// One key per distinct CRN
    pub fn keys(&self) -> Vec<NotificationKey> {
        self.expand().iter().map(Notification::row_key).collect()
    }

    /// Whether this notification is addressed to every resource
    pub fn is_generic(&self) -> bool {
        self.crn_full.iter().any(|c| crn::is_generic(c))
    }

    /// Split into one single-CRN row per distinct CRN
    ///
    /// A notification without CRNs yields a single row without CRN.
    pub fn expand(&self) -> Vec<Notification> {
        let mut seen = HashSet::new();
        let crns: Vec<&String> = self
            .crn_full
            .iter()
            .filter(|c| seen.insert(c.to_ascii_lowercase()))
            .collect();

        if crns.is_empty() {
            return vec![self.clone()];
        }

        crns.into_iter()
            .map(|crn| Notification {
                crn_full: vec![crn.clone()],
                ..self.clone()
            })
            .collect()
    }

    /// Remove repeated languages from the localized lists, keeping the first
    pub fn dedup_languages(&mut self) {
        let source_id = self.source_id.clone();
        for (field, list) in [
            ("resource_display_names", &mut self.resource_display_names),
            ("short_description", &mut self.short_description),
            ("long_description", &mut self.long_description),
        ] {
            let before = list.len();
            let mut seen = HashSet::new();
            list.retain(|t| seen.insert(t.language.to_ascii_lowercase()));
            if list.len() != before {
                warn!(
                    source_id = %source_id,
                    field,
                    dropped = before - list.len(),
                    "Duplicate languages removed from localized text"
                );
            }
        }
    }

    /// Whether any localized list differs from `other`
    pub fn text_fields_differ(&self, other: &Notification) -> bool {
        fn normalized(list: &[LocalizedText]) -> Vec<(String, &str)> {
            let mut items: Vec<(String, &str)> = list
                .iter()
                .map(|t| (t.language.to_ascii_lowercase(), t.text.as_str()))
                .collect();
            items.sort();
            items
        }

        normalized(&self.resource_display_names) != normalized(&other.resource_display_names)
            || normalized(&self.short_description) != normalized(&other.short_description)
            || normalized(&self.long_description) != normalized(&other.long_description)
    }
}

/// Merge single-CRN rows into one notification per `(source, source_id)`
///
/// Groups keep the order of their first row; CRNs keep row order without
/// duplicates.
pub fn collate(rows: impl IntoIterator<Item = Notification>) -> Vec<Notification> {
    let mut order: Vec<Notification> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for row in rows {
        let group = (row.source.clone(), row.source_id.clone());
        match index.get(&group) {
            Some(&position) => {
                let merged = &mut order[position];
                for crn in row.crn_full {
                    if !merged.crn_full.iter().any(|c| c.eq_ignore_ascii_case(&crn)) {
                        merged.crn_full.push(crn);
                    }
                }
            }
            None => {
                index.insert(group, order.len());
                order.push(row);
            }
        }
    }
    order
}

// ============================================================================
// Broker Message
// ============================================================================

/// Kind of a produced notification message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MessageType {
    #[default]
    BulkLoad,
    Update,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BulkLoad => "bulk_load",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        match value.as_str() {
            "" | "bulk_load" => Ok(Self::BulkLoad),
            "update" => Ok(Self::Update),
            other => Err(de::Error::unknown_variant(other, &["bulk_load", "update"])),
        }
    }
}

/// Wire form: every notification field plus `msg_type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(default)]
    pub msg_type: MessageType,

    #[serde(flatten)]
    pub notification: Notification,
}

impl NotificationMessage {
    pub fn new(msg_type: MessageType, notification: Notification) -> Self {
        Self {
            msg_type,
            notification,
        }
    }

    pub fn update(notification: Notification) -> Self {
        Self::new(MessageType::Update, notification)
    }

    pub fn bulk_load(notification: Notification) -> Self {
        Self::new(MessageType::BulkLoad, notification)
    }
}

// ============================================================================
// Lenient field decoding
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

/// Accept a single string, a list of strings, or null
pub(crate) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = match Option::<StringOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StringOrList::One(value)) => vec![value],
        Some(StringOrList::Many(values)) => values,
    };
    Ok(values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrList {
    Plain(String),
    Localized(Vec<LocalizedText>),
}

/// Accept a localized list, a plain string (English), or null
pub(crate) fn localized_list<'de, D>(deserializer: D) -> Result<Vec<LocalizedText>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<TextOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(TextOrList::Plain(text)) if text.is_empty() => Vec::new(),
        Some(TextOrList::Plain(text)) => vec![LocalizedText::english(text)],
        Some(TextOrList::Localized(list)) => list,
    })
}

#[cfg(test)]
#[path = "notification_tests.rs"]
mod tests;
