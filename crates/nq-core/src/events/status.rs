//! Status updates applied to stored notification rows.

use crate::notification::Notification;
use crate::{PipelineError, ValidationError};
use serde::{Deserialize, Serialize};

/// Fields of a stored notification changed by a status event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub record_id: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub source_id: Option<String>,

    #[serde(default)]
    pub crn_full: Option<String>,

    #[serde(default)]
    pub pnp_removed: Option<bool>,

    #[serde(default)]
    pub event_time_start: Option<String>,

    #[serde(default)]
    pub event_time_end: Option<String>,

    #[serde(default)]
    pub tags: Option<String>,
}

/// Rows a status update addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTarget {
    Record(String),
    Row {
        source: String,
        source_id: String,
        crn_full: String,
    },
    /// Every row of one logical notification
    Group { source: String, source_id: String },
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl StatusUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.target()?;
        if !self.has_changes() {
            return Err(ValidationError::Required {
                field: "pnp_removed, event_time_start, event_time_end or tags".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve which rows the update addresses
    pub fn target(&self) -> Result<StatusTarget, ValidationError> {
        if let Some(id) = present(&self.record_id) {
            return Ok(StatusTarget::Record(id.to_string()));
        }

        let source = present(&self.source).ok_or_else(|| ValidationError::Required {
            field: "record_id or source".to_string(),
        })?;
        let source_id = present(&self.source_id).ok_or_else(|| ValidationError::Required {
            field: "source_id".to_string(),
        })?;

        Ok(match present(&self.crn_full) {
            Some(crn) => StatusTarget::Row {
                source: source.to_string(),
                source_id: source_id.to_string(),
                crn_full: crn.to_string(),
            },
            None => StatusTarget::Group {
                source: source.to_string(),
                source_id: source_id.to_string(),
            },
        })
    }

    pub fn has_changes(&self) -> bool {
        self.pnp_removed.is_some()
            || self.event_time_start.is_some()
            || self.event_time_end.is_some()
            || self.tags.is_some()
    }

    /// Write the carried fields onto `row`; returns whether anything changed
    pub fn apply(&self, row: &mut Notification) -> bool {
        let before = row.clone();

        if let Some(removed) = self.pnp_removed {
            row.pnp_removed = removed;
        }
        if let Some(start) = &self.event_time_start {
            row.event_time_start = start.clone();
        }
        if let Some(end) = &self.event_time_end {
            row.event_time_end = end.clone();
        }
        if let Some(tags) = &self.tags {
            row.tags = tags.clone();
        }

        *row != before
    }
}

/// Decode and validate a status payload
pub fn parse_status(payload: &[u8]) -> Result<StatusUpdate, PipelineError> {
    let update: StatusUpdate = serde_json::from_slice(payload)?;
    update.validate()?;
    Ok(update)
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
