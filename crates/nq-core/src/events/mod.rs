//! # Inbound Event Payloads
//!
//! Decoding of the decrypted payloads that arrive on each input routing key.
//!
//! Upstream systems send the same record in several shapes: a single object,
//! a bare array, or an envelope object wrapping an array. The array and
//! envelope forms are bulk loads. Field names also vary between feeds; the
//! decoders fold known aliases onto one canonical name before deserializing.

use crate::notification::MessageType;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub mod incident;
pub mod maintenance;
pub mod resource;
pub mod status;

pub use incident::{parse_incidents, IncidentBatch, IncidentRecord};
pub use maintenance::{parse_maintenance, MaintenanceBatch, MaintenanceRecord};
pub use resource::{parse_resources, ResourceBatch};
pub use status::{parse_status, StatusTarget, StatusUpdate};

// ============================================================================
// Event Kinds
// ============================================================================

/// The closed set of inbound event kinds, one per input routing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Incident,
    Maintenance,
    Resource,
    Status,
    Notification,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        Self::Incident,
        Self::Maintenance,
        Self::Resource,
        Self::Status,
        Self::Notification,
    ];

    /// Kind handled for an input routing key
    pub fn from_routing_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == key)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incident => "incident",
            Self::Maintenance => "maintenance",
            Self::Resource => "resource",
            Self::Status => "status",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Outbound Wrapper
// ============================================================================

/// A produced record tagged with its message type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage<T> {
    #[serde(default)]
    pub msg_type: MessageType,

    #[serde(flatten)]
    pub body: T,
}

impl<T> EventMessage<T> {
    pub fn new(bulk: bool, body: T) -> Self {
        Self {
            msg_type: if bulk {
                MessageType::BulkLoad
            } else {
                MessageType::Update
            },
            body,
        }
    }
}

// ============================================================================
// Shape Helpers
// ============================================================================

/// Records of a payload and whether it was a bulk load
#[derive(Debug)]
pub(crate) struct Records {
    pub items: Vec<Map<String, Value>>,
    pub bulk: bool,
    pub enveloped: bool,
}

/// Split a payload into record objects
///
/// Accepts a single object, an array of objects, or an object holding the
/// array under `envelope_key`.
pub(crate) fn split_records(payload: &[u8], envelope_key: &str) -> Result<Records, PipelineError> {
    let value: Value = serde_json::from_slice(payload)?;

    let (items, bulk, enveloped) = match value {
        Value::Array(items) => (items, true, false),
        Value::Object(mut object) => match object.remove(envelope_key) {
            Some(Value::Array(items)) => (items, true, true),
            Some(other) => {
                return Err(PipelineError::bad_message(format!(
                    "'{}' must be an array, got {}",
                    envelope_key,
                    kind_of(&other)
                )))
            }
            None => (vec![Value::Object(object)], false, false),
        },
        other => {
            return Err(PipelineError::bad_message(format!(
                "expected an object or array, got {}",
                kind_of(&other)
            )))
        }
    };

    let items = items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::bad_message(format!(
                "record must be an object, got {}",
                kind_of(&other)
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Records {
        items,
        bulk,
        enveloped,
    })
}

/// Move each alias onto its canonical key unless the canonical key is set
pub(crate) fn fold_aliases(record: &mut Map<String, Value>, aliases: &[(&str, &str)]) {
    for (canonical, alias) in aliases {
        if let Some(value) = record.remove(*alias) {
            let canonical_missing = record
                .get(*canonical)
                .map_or(true, |v| v.is_null() || v.as_str() == Some(""));
            if canonical_missing {
                record.insert(canonical.to_string(), value);
            }
        }
    }
}

/// Replace scalar numbers and booleans under `keys` with their string form
pub(crate) fn stringify_scalars(record: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(value) = record.get_mut(*key) {
            match value {
                Value::Number(n) => *value = Value::String(n.to_string()),
                Value::Bool(b) => *value = Value::String(b.to_string()),
                _ => {}
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
