//! Span recording for handler telemetry.
//!
//! This module defines the tagging-sink view of telemetry used by the
//! pipeline. Every handler opens a span, tags it and lets it finish; the
//! backend behind the sink is chosen by the service.
//!
//! # Architecture
//!
//! - **Domain Layer** (this module): `Recorder`, `Span` and the `SpanSink` seam
//! - **Infrastructure Layer** (nq-service): a `tracing`-backed recorder
//! - **Best-Effort Pattern**: recording never fails and never blocks handlers
//!
//! A [`Span`] finishes exactly once: either through [`Span::finish`] or, on
//! every other exit path including unwinding, when it is dropped.
//!
//! # Examples
//!
//! ```rust
//! use nq_core::monitoring::{MemoryRecorder, Recorder};
//!
//! let recorder = MemoryRecorder::new();
//! {
//!     let mut span = recorder.start_span("incident");
//!     span.set_tag("routing_key", "incident");
//!     span.set_error("decrypt-failed");
//! }
//! assert_eq!(recorder.finished()[0].error.as_deref(), Some("decrypt-failed"));
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A finished span as delivered to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl SpanRecord {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Receives finished spans
pub trait SpanSink: Send + Sync {
    fn record(&self, span: SpanRecord);
}

/// Starts spans
pub trait Recorder: Send + Sync {
    fn start_span(&self, name: &str) -> Span;
}

/// An open span
pub struct Span {
    name: String,
    tags: BTreeMap<String, String>,
    error: Option<String>,
    started: Instant,
    sink: Option<Arc<dyn SpanSink>>,
}

impl Span {
    /// Open a span that reports to `sink`
    pub fn new(name: impl Into<String>, sink: Arc<dyn SpanSink>) -> Self {
        Self::open(name.into(), Some(sink))
    }

    /// Open a span that reports nowhere
    pub fn detached(name: impl Into<String>) -> Self {
        Self::open(name.into(), None)
    }

    fn open(name: String, sink: Option<Arc<dyn SpanSink>>) -> Self {
        Self {
            name,
            tags: BTreeMap::new(),
            error: None,
            started: Instant::now(),
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(key.into(), value.into());
    }

    pub fn set_tags<I, K, V>(&mut self, tags: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in tags {
            self.set_tag(key, value);
        }
    }

    /// Mark the span as failed; the last message wins
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Finish now instead of at drop
    pub fn finish(self) {
        drop(self);
    }

    fn emit(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.record(SpanRecord {
                name: std::mem::take(&mut self.name),
                tags: std::mem::take(&mut self.tags),
                error: self.error.take(),
                duration: self.started.elapsed(),
            });
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.emit();
    }
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("error", &self.error)
            .finish()
    }
}

/// Recorder that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRecorder;

impl Recorder for NoOpRecorder {
    fn start_span(&self, name: &str) -> Span {
        Span::detached(name)
    }
}

/// Recorder that keeps finished spans in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    sink: Arc<MemorySink>,
}

#[derive(Debug, Default)]
struct MemorySink {
    spans: Mutex<Vec<SpanRecord>>,
}

impl SpanSink for MemorySink {
    fn record(&self, span: SpanRecord) {
        self.spans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(span);
    }
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished spans in finish order
    pub fn finished(&self) -> Vec<SpanRecord> {
        self.sink
            .spans
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Finished spans carrying `key = value`
    pub fn with_tag(&self, key: &str, value: &str) -> Vec<SpanRecord> {
        self.finished()
            .into_iter()
            .filter(|s| s.tag(key) == Some(value))
            .collect()
    }
}

impl Recorder for MemoryRecorder {
    fn start_span(&self, name: &str) -> Span {
        Span::new(name, self.sink.clone())
    }
}

#[cfg(test)]
#[path = "monitoring_tests.rs"]
mod tests;
