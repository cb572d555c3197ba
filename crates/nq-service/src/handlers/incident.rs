//! Incident and support case events.

use super::{persist_if_changed, HandlerContext};
use nq_core::events::parse_incidents;
use nq_core::monitoring::Span;
use nq_core::{MessageType, NotificationMessage, PipelineResult};
use tracing::{debug, info};

/// Persist new or updated incidents and announce them downstream
///
/// Support cases go to the case key; everything else goes to the incident
/// key, or the bulk incident key when the payload was a bulk load.
pub async fn handle(ctx: &HandlerContext, payload: &[u8], span: &mut Span) -> PipelineResult<()> {
    let plaintext = ctx.decrypt(payload)?;
    let batch = parse_incidents(&plaintext)?;
    span.set_tag("records", batch.records.len().to_string());

    let msg_type = if batch.bulk {
        MessageType::BulkLoad
    } else {
        MessageType::Update
    };

    let mut produced = 0usize;
    for record in &batch.records {
        let Some(stored) = persist_if_changed(ctx, record.to_notification()).await? else {
            debug!(source_id = %record.source_id, "Incident unchanged, dropped");
            continue;
        };

        let key = if record.is_case() {
            &ctx.keys.case
        } else if batch.bulk {
            &ctx.keys.incident_bulk
        } else {
            &ctx.keys.incident
        };

        ctx.producer
            .produce(key, &NotificationMessage::new(msg_type, stored))
            .await?;
        produced += 1;
    }

    span.set_tag("produced", produced.to_string());
    info!(
        records = batch.records.len(),
        produced,
        bulk = batch.bulk,
        "Incident payload processed"
    );
    Ok(())
}
