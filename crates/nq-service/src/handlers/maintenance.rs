//! Maintenance (change record) events.
//!
//! Decoding failures are acknowledged: upstream sends many record shapes on
//! this key and only change records matter. Publish and store failures still
//! fail the delivery on the first error.

use super::{persist_if_changed, HandlerContext};
use nq_core::events::{parse_maintenance, EventMessage};
use nq_core::monitoring::Span;
use nq_core::{NotificationMessage, PipelineResult};
use tracing::{debug, info, warn};

pub async fn handle(ctx: &HandlerContext, payload: &[u8], span: &mut Span) -> PipelineResult<()> {
    let plaintext = ctx.decrypt(payload)?;

    let batch = match parse_maintenance(&plaintext) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, "Maintenance payload not decodable, dropped");
            span.set_tag("dropped", "undecodable");
            return Ok(());
        }
    };

    if batch.unmatched > 0 {
        if let Some(metrics) = &ctx.metrics {
            metrics
                .maintenance_unmatched_total
                .inc_by(batch.unmatched as u64);
        }
        info!(
            unmatched = batch.unmatched,
            "Maintenance records are not change records, dropped"
        );
    }

    if batch.is_empty() {
        span.set_tag("dropped", "no-change-records");
        return Ok(());
    }

    span.set_tag("records", batch.records.len().to_string());
    for record in &batch.records {
        ctx.producer
            .produce(&ctx.keys.maintenance, &EventMessage::new(batch.bulk, record))
            .await?;

        let Some(derived) = record.derived_notification() else {
            continue;
        };
        match persist_if_changed(ctx, derived).await? {
            Some(stored) => {
                ctx.producer
                    .produce(&ctx.keys.notification, &NotificationMessage::update(stored))
                    .await?;
            }
            None => debug!(source_id = %record.source_id, "Maintenance notification unchanged"),
        }
    }

    Ok(())
}
