//! Status events: field updates on stored notification rows.

use super::HandlerContext;
use nq_core::events::{parse_status, StatusTarget};
use nq_core::monitoring::Span;
use nq_core::{Notification, NotificationKey, PipelineError, PipelineResult};
use tracing::{debug, info};

pub async fn handle(ctx: &HandlerContext, payload: &[u8], span: &mut Span) -> PipelineResult<()> {
    let plaintext = ctx.decrypt(payload)?;
    let update = parse_status(&plaintext)?;
    let target = update.target()?;

    let rows = resolve(ctx, &target).await?;
    if rows.is_empty() {
        return Err(PipelineError::bad_message(format!(
            "no stored notification for status target {:?}",
            target
        )));
    }

    let mut changed = 0usize;
    for mut row in rows {
        if update.apply(&mut row) {
            ctx.store.update(&row).await?;
            changed += 1;
        } else {
            debug!(key = %row.row_key(), "Status already applied");
        }
    }

    span.set_tag("rows_changed", changed.to_string());
    info!(rows_changed = changed, "Status applied");
    Ok(())
}

async fn resolve(ctx: &HandlerContext, target: &StatusTarget) -> PipelineResult<Vec<Notification>> {
    let rows = match target {
        StatusTarget::Record(id) => ctx.store.get_by_id(id).await?.into_iter().collect(),
        StatusTarget::Row {
            source,
            source_id,
            crn_full,
        } => ctx
            .store
            .get_by_key(&NotificationKey::new(source, source_id, crn_full))
            .await?
            .into_iter()
            .collect(),
        StatusTarget::Group { source, source_id } => ctx.store.get_rows(source, source_id).await?,
    };
    Ok(rows)
}
