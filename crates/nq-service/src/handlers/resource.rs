//! Catalog resource events.

use super::HandlerContext;
use nq_core::events::{parse_resources, EventMessage};
use nq_core::monitoring::Span;
use nq_core::PipelineResult;
use tracing::debug;

/// Upsert every resource and emit one message per resource
pub async fn handle(ctx: &HandlerContext, payload: &[u8], span: &mut Span) -> PipelineResult<()> {
    let plaintext = ctx.decrypt(payload)?;
    let batch = parse_resources(&plaintext)?;
    span.set_tag("records", batch.resources.len().to_string());

    for mut resource in batch.resources {
        let record_id = ctx.store.upsert_resource(&resource).await?;
        debug!(name = %resource.name, record_id = %record_id, "Resource stored");
        resource.record_id = Some(record_id);

        ctx.producer
            .produce(&ctx.keys.resource, &EventMessage::new(batch.bulk, resource))
            .await?;
    }
    Ok(())
}
