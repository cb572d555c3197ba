//! Maintenance payloads.
//!
//! Only change records from the change-management system are processed. A
//! record counts as one when the payload used the `result` envelope, when
//! the record has a `number` field, or when its `source_id` looks like
//! `CHG12345`. Everything else is counted as unmatched and dropped.

use super::{fold_aliases, split_records, stringify_scalars};
use crate::notification::{localized_list, string_or_list, LocalizedText, Notification};
use crate::{PipelineError, ValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

const ALIASES: &[(&str, &str)] = &[
    ("source_id", "number"),
    ("planned_start", "start_date"),
    ("planned_end", "end_date"),
    ("source_creation_time", "sys_created_on"),
    ("source_update_time", "sys_updated_on"),
    ("long_description", "description"),
    ("crn_full", "crns"),
];

fn change_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^CHG[0-9]+$").ok())
        .as_ref()
}

/// Whether `source_id` is a change number
pub fn is_change_id(source_id: &str) -> bool {
    change_id_pattern().is_some_and(|p| p.is_match(source_id.trim()))
}

fn default_source() -> String {
    "servicenow".to_string()
}

/// Normalized change record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default)]
    pub source_id: String,

    #[serde(default, deserialize_with = "string_or_list")]
    pub crn_full: Vec<String>,

    #[serde(default, deserialize_with = "localized_list")]
    pub short_description: Vec<LocalizedText>,

    #[serde(default, deserialize_with = "localized_list")]
    pub long_description: Vec<LocalizedText>,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub planned_start: String,

    #[serde(default)]
    pub planned_end: String,

    #[serde(default)]
    pub source_creation_time: String,

    #[serde(default)]
    pub source_update_time: String,
}

impl MaintenanceRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "source_id".to_string(),
            });
        }
        Ok(())
    }

    /// Notification announcing the maintenance window
    ///
    /// Only produced when the record names at least one CRN and a planned start.
    pub fn derived_notification(&self) -> Option<Notification> {
        if self.crn_full.is_empty() || self.planned_start.trim().is_empty() {
            return None;
        }
        Some(Notification {
            source: self.source.clone(),
            source_id: self.source_id.clone(),
            crn_full: self.crn_full.clone(),
            source_creation_time: self.source_creation_time.clone(),
            source_update_time: self.source_update_time.clone(),
            event_time_start: self.planned_start.clone(),
            event_time_end: self.planned_end.clone(),
            notification_type: "maintenance".to_string(),
            incident_id: self.source_id.clone(),
            short_description: self.short_description.clone(),
            long_description: self.long_description.clone(),
            ..Notification::default()
        })
    }
}

/// Decoded maintenance payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceBatch {
    pub records: Vec<MaintenanceRecord>,
    /// Records that were not change records
    pub unmatched: usize,
    pub bulk: bool,
}

impl MaintenanceBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn is_change_record(record: &Map<String, Value>, enveloped: bool) -> bool {
    enveloped
        || record.contains_key("number")
        || record
            .get("source_id")
            .and_then(Value::as_str)
            .is_some_and(is_change_id)
}

/// Decode a maintenance payload, keeping change records only
pub fn parse_maintenance(payload: &[u8]) -> Result<MaintenanceBatch, PipelineError> {
    let records = split_records(payload, "result")?;

    let mut batch = MaintenanceBatch {
        bulk: records.bulk,
        ..MaintenanceBatch::default()
    };

    for mut item in records.items {
        if !is_change_record(&item, records.enveloped) {
            batch.unmatched += 1;
            continue;
        }

        fold_aliases(&mut item, ALIASES);
        stringify_scalars(&mut item, &["source_id", "state"]);

        let record: MaintenanceRecord = serde_json::from_value(Value::Object(item))?;
        record.validate()?;
        batch.records.push(record);
    }

    Ok(batch)
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
