//! Incident payloads from the incident tracking system.

use super::{fold_aliases, split_records, stringify_scalars};
use crate::notification::{localized_list, string_or_list, LocalizedText, Notification};
use crate::{PipelineError, ValidationError};
use serde::{Deserialize, Serialize};

const DEFAULT_SOURCE: &str = "servicenow";

const ALIASES: &[(&str, &str)] = &[
    ("source_id", "number"),
    ("source_creation_time", "sys_created_on"),
    ("source_update_time", "sys_updated_on"),
    ("long_description", "description"),
];

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// One incident or support case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
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
    pub severity: String,

    #[serde(default)]
    pub outage_start: String,

    #[serde(default)]
    pub outage_end: String,

    #[serde(default)]
    pub source_creation_time: String,

    #[serde(default)]
    pub source_update_time: String,
}

impl IncidentRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "source_id".to_string(),
            });
        }
        if self.source.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "source".to_string(),
            });
        }
        Ok(())
    }

    /// Support cases are numbered `CS...`
    pub fn is_case(&self) -> bool {
        self.source_id.to_ascii_uppercase().starts_with("CS")
    }

    /// Notification view of the incident, one CRN list for all its rows
    pub fn to_notification(&self) -> Notification {
        Notification {
            source: self.source.clone(),
            source_id: self.source_id.clone(),
            crn_full: self.crn_full.clone(),
            source_creation_time: self.source_creation_time.clone(),
            source_update_time: self.source_update_time.clone(),
            event_time_start: self.outage_start.clone(),
            event_time_end: self.outage_end.clone(),
            notification_type: "incident".to_string(),
            incident_id: self.source_id.clone(),
            short_description: self.short_description.clone(),
            long_description: self.long_description.clone(),
            ..Notification::default()
        }
    }
}

/// Decoded incident payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentBatch {
    pub records: Vec<IncidentRecord>,
    pub bulk: bool,
}

/// Decode a single incident, an array of incidents or a `{result: [...]}` envelope
pub fn parse_incidents(payload: &[u8]) -> Result<IncidentBatch, PipelineError> {
    let records = split_records(payload, "result")?;

    let mut incidents = Vec::with_capacity(records.items.len());
    for mut item in records.items {
        fold_aliases(&mut item, ALIASES);
        stringify_scalars(&mut item, &["source_id", "severity", "state"]);

        let record: IncidentRecord = serde_json::from_value(serde_json::Value::Object(item))?;
        record.validate()?;
        incidents.push(record);
    }

    Ok(IncidentBatch {
        records: incidents,
        bulk: records.bulk,
    })
}

#[cfg(test)]
#[path = "incident_tests.rs"]
mod tests;
