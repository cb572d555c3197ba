//! Notification events and the subscription fan-out.
//!
//! A notification is stored and its decrypted payload forwarded unchanged to
//! the subscription key, but only when the comparison engine reports it as
//! new or updated against the rows already stored for its
//! `(source, source_id)`.

use super::HandlerContext;
use nq_core::monitoring::Span;
use nq_core::{NotificationMessage, PipelineResult};
use std::slice;
use tracing::{debug, info};

pub async fn handle(ctx: &HandlerContext, payload: &[u8], span: &mut Span) -> PipelineResult<()> {
    let plaintext = ctx.decrypt(payload)?;
    let message: NotificationMessage = serde_json::from_slice(&plaintext)?;
    let notification = message.notification;
    notification.validate()?;

    span.set_tags([
        ("source", notification.source.as_str()),
        ("source_id", notification.source_id.as_str()),
        ("msg_type", message.msg_type.as_str()),
    ]);

    let existing = ctx
        .store
        .get_rows(&notification.source, &notification.source_id)
        .await?;
    let updates = ctx
        .engine
        .compare_and_emit(&existing, slice::from_ref(&notification));
    if updates.is_empty() {
        debug!(source_id = %notification.source_id, "Notification unchanged, dropped");
        span.set_tag("dropped", "unchanged");
        return Ok(());
    }

    let ids = ctx.store.insert_all(&notification).await?;
    ctx.producer
        .produce_plaintext(&ctx.keys.notification_sub, &plaintext)
        .await?;

    info!(
        source_id = %notification.source_id,
        rows = ids.len(),
        "Notification stored and forwarded"
    );
    Ok(())
}
