//! # Comparison Engine
//!
//! Reduces a freshly pulled batch of notifications to the ones that must be
//! sent downstream.
//!
//! Rows are matched on `(source, source_id, crn_full)`. A key that is not
//! stored yet is an update with reason [`UpdateReason::DoesNotExist`]; a
//! stored key is an update only when its `source_update_time` names a
//! different instant. Other fields are ignored unless
//! [`CompareOptions::include_text_fields`] is set, because display names are
//! refreshed out of band and comparing them makes the output oscillate.

use crate::notification::{Notification, NotificationKey};
use crate::time::timestamps_differ;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::info;

// ============================================================================
// Core Types
// ============================================================================

/// Comparison settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    /// Also emit when localized text differs
    pub include_text_fields: bool,

    /// Log the keys that were skipped
    pub log_skipped: bool,
}

/// Why an incoming notification is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpdateReason {
    #[serde(rename = "DOES_NOT_EXIST")]
    DoesNotExist,
    SourceUpdateTime,
    TextFields,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoesNotExist => "DOES_NOT_EXIST",
            Self::SourceUpdateTime => "SourceUpdateTime",
            Self::TextFields => "TextFields",
        }
    }
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One emitted notification with the evidence for emitting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedNotification {
    pub notification: Notification,
    pub reason: UpdateReason,
    pub old_value: String,
    pub new_value: String,
}

/// Result of comparing one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompareReport {
    pub updated: Vec<UpdatedNotification>,
    pub skipped: Vec<NotificationKey>,
}

impl CompareReport {
    pub fn notifications(&self) -> Vec<Notification> {
        self.updated.iter().map(|u| u.notification.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }
}

#[derive(Serialize)]
struct UpdateLogEntry<'a> {
    source: &'a str,
    source_id: &'a str,
    crn_full: &'a [String],
    reason: UpdateReason,
    old_value: &'a str,
    new_value: &'a str,
}

// ============================================================================
// Engine
// ============================================================================

/// Stateless comparison of stored against incoming notifications
#[derive(Debug, Clone, Default)]
pub struct ComparisonEngine {
    options: CompareOptions,
}

impl ComparisonEngine {
    pub fn new(options: CompareOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> CompareOptions {
        self.options
    }

    /// Compare and return the full report
    ///
    /// `existing` holds stored single-CRN rows. An incoming notification with
    /// several CRNs is emitted once if any of its keys needs an update.
    pub fn compare(&self, existing: &[Notification], incoming: &[Notification]) -> CompareReport {
        let index: HashMap<NotificationKey, &Notification> = existing
            .iter()
            .flat_map(|row| {
                row.keys()
                    .into_iter()
                    .map(move |key| (key, row))
            })
            .collect();

        let mut report = CompareReport::default();
        for candidate in incoming {
            let keys = candidate.keys();
            let decision = keys
                .iter()
                .find_map(|key| self.decide(index.get(key).copied(), candidate));

            match decision {
                Some((reason, old_value, new_value)) => report.updated.push(UpdatedNotification {
                    notification: candidate.clone(),
                    reason,
                    old_value,
                    new_value,
                }),
                None => report.skipped.extend(keys),
            }
        }
        report
    }

    /// Compare, log the outcome, and return the notifications to emit
    pub fn compare_and_emit(
        &self,
        existing: &[Notification],
        incoming: &[Notification],
    ) -> Vec<Notification> {
        let report = self.compare(existing, incoming);
        self.log_report(&report);
        report.notifications()
    }

    fn decide(
        &self,
        stored: Option<&Notification>,
        candidate: &Notification,
    ) -> Option<(UpdateReason, String, String)> {
        let Some(stored) = stored else {
            return Some((
                UpdateReason::DoesNotExist,
                String::new(),
                candidate.row_key().to_string(),
            ));
        };

        if timestamps_differ(&stored.source_update_time, &candidate.source_update_time) {
            return Some((
                UpdateReason::SourceUpdateTime,
                stored.source_update_time.clone(),
                candidate.source_update_time.clone(),
            ));
        }

        if self.options.include_text_fields && stored.text_fields_differ(candidate) {
            return Some((
                UpdateReason::TextFields,
                summarize_text(stored),
                summarize_text(candidate),
            ));
        }

        None
    }

    fn log_report(&self, report: &CompareReport) {
        let entries: Vec<UpdateLogEntry<'_>> = report
            .updated
            .iter()
            .map(|u| UpdateLogEntry {
                source: &u.notification.source,
                source_id: &u.notification.source_id,
                crn_full: &u.notification.crn_full,
                reason: u.reason,
                old_value: &u.old_value,
                new_value: &u.new_value,
            })
            .collect();

        let updated = serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string());
        info!(count = entries.len(), updated = %updated, "Comparison updates");

        if self.options.log_skipped {
            let skipped: Vec<String> = report.skipped.iter().map(ToString::to_string).collect();
            let skipped = serde_json::to_string(&skipped).unwrap_or_else(|_| "[]".to_string());
            info!(count = report.skipped.len(), skipped = %skipped, "Comparison skipped");
        }
    }
}

fn summarize_text(n: &Notification) -> String {
    n.short_description
        .iter()
        .find(|t| t.language.eq_ignore_ascii_case("en"))
        .or_else(|| n.short_description.first())
        .map(|t| t.text.clone())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "compare_tests.rs"]
mod tests;
