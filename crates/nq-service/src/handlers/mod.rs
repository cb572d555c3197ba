//! # Event Handlers
//!
//! One handler per inbound [`EventKind`]. Every handler decrypts its payload,
//! decodes it, touches the store, and produces zero or more messages through
//! the [`ReliableProducer`]. Handlers return a [`PipelineResult`]; the
//! dispatcher turns the error category into an acknowledge decision.

use crate::config::RoutesConfig;
use crate::metrics::PipelineMetrics;
use crate::producer::ReliableProducer;
use nq_broker::{RoutingKey, ValidationError};
use nq_core::events::EventKind;
use nq_core::monitoring::Span;
use nq_core::time::is_newer;
use nq_core::{Cipher, ComparisonEngine, Notification, NotificationStore, PipelineResult};
use std::sync::Arc;
use tracing::debug;

pub mod incident;
pub mod maintenance;
pub mod notification;
pub mod resource;
pub mod status;

// ============================================================================
// Handler Context
// ============================================================================

/// Output routing keys, validated once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputKeys {
    pub case: RoutingKey,
    pub incident: RoutingKey,
    pub incident_bulk: RoutingKey,
    pub maintenance: RoutingKey,
    pub resource: RoutingKey,
    pub notification: RoutingKey,
    pub notification_sub: RoutingKey,
}

impl OutputKeys {
    pub fn from_routes(routes: &RoutesConfig) -> Result<Self, ValidationError> {
        Ok(Self {
            case: RoutingKey::new(&routes.case)?,
            incident: RoutingKey::new(&routes.incident)?,
            incident_bulk: RoutingKey::new(&routes.incident_bulk)?,
            maintenance: RoutingKey::new(&routes.maintenance)?,
            resource: RoutingKey::new(&routes.resource)?,
            notification: RoutingKey::new(&routes.notification)?,
            notification_sub: RoutingKey::new(&routes.notification_sub)?,
        })
    }
}

/// Everything a handler may touch
pub struct HandlerContext {
    pub store: Arc<dyn NotificationStore>,
    pub producer: Arc<ReliableProducer>,
    pub cipher: Arc<dyn Cipher>,
    pub keys: OutputKeys,
    pub engine: ComparisonEngine,
    pub metrics: Option<Arc<PipelineMetrics>>,
}

impl HandlerContext {
    /// Decrypt an inbound payload
    pub fn decrypt(&self, payload: &[u8]) -> PipelineResult<Vec<u8>> {
        Ok(self.cipher.decrypt(payload)?)
    }
}

// ============================================================================
// Dispatch Table
// ============================================================================

/// Run the handler for `kind`
pub async fn handle(
    kind: EventKind,
    ctx: &HandlerContext,
    payload: &[u8],
    span: &mut Span,
) -> PipelineResult<()> {
    match kind {
        EventKind::Incident => incident::handle(ctx, payload, span).await,
        EventKind::Maintenance => maintenance::handle(ctx, payload, span).await,
        EventKind::Resource => resource::handle(ctx, payload, span).await,
        EventKind::Status => status::handle(ctx, payload, span).await,
        EventKind::Notification => notification::handle(ctx, payload, span).await,
    }
}

// ============================================================================
// Shared Steps
// ============================================================================

/// Store the rows of `notification` that are new or carry a newer source update
///
/// Rows already stored with an equal or newer `source_update_time` are left
/// alone. Returns `None` when nothing was written; otherwise the notification
/// carrying the record id of the first row written.
pub(crate) async fn persist_if_changed(
    ctx: &HandlerContext,
    mut notification: Notification,
) -> PipelineResult<Option<Notification>> {
    let rows = notification.expand();
    let mut before = Vec::with_capacity(rows.len());
    for row in &rows {
        before.push(ctx.store.get_by_key(&row.row_key()).await?);
    }

    // Decided against the rows stored before the first write; writing a row
    // syncs the source times of its siblings
    let mut first_id = None;
    for (row, stored) in rows.iter().zip(before) {
        let id = match stored {
            Some(stored) if !is_newer(&row.source_update_time, &stored.source_update_time) => {
                debug!(
                    key = %row.row_key(),
                    stored = %stored.source_update_time,
                    incoming = %row.source_update_time,
                    "Row is current, skipping"
                );
                continue;
            }
            Some(stored) => {
                ctx.store.update(row).await?;
                stored.record_id.unwrap_or_default()
            }
            None => ctx.store.insert(row).await?,
        };
        first_id.get_or_insert(id);
    }

    Ok(first_id.map(|id| {
        notification.record_id = Some(id);
        notification
    }))
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
