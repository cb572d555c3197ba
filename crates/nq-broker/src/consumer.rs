//! Consumer session with topology setup and reconnect supervision.
//!
//! The session consumes every bound queue into one delivery stream and hands
//! deliveries to a [`DeliveryHandler`] strictly one at a time. When the
//! channel closes it reconnects indefinitely, redeclares the topology and
//! resumes; unacked deliveries are redelivered by the broker.

use crate::connection::Connector;
use crate::error::BrokerError;
use crate::message::{Delivery, DeliveryAction, ExchangeKind, ExchangeName, QueueBinding};
use crate::transport::BrokerChannel;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Capacity of the merged delivery stream
const DELIVERY_BUFFER: usize = 16;

/// Unacknowledged deliveries the broker may push ahead of the handler
pub const PREFETCH_COUNT: u16 = 1;

/// Processes one delivery and decides how to settle it
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> DeliveryAction;
}

/// Long-lived consumer over a set of queue bindings
pub struct Consumer {
    connector: Connector,
    exchange: ExchangeName,
    exchange_kind: ExchangeKind,
    bindings: Vec<QueueBinding>,
    consumer_tag: String,
}

impl Consumer {
    pub fn new(
        connector: Connector,
        exchange: ExchangeName,
        exchange_kind: ExchangeKind,
        bindings: Vec<QueueBinding>,
    ) -> Self {
        Self {
            connector,
            exchange,
            exchange_kind,
            bindings,
            consumer_tag: format!("nq-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn bindings(&self) -> &[QueueBinding] {
        &self.bindings
    }

    /// Run until `shutdown` flips to `true`
    ///
    /// Fails only when the initial connect exhausts its budget.
    pub async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        let mut channel = self.connector.connect().await?;

        loop {
            let (sink, mut deliveries) = mpsc::channel(DELIVERY_BUFFER);
            if let Err(e) = self.setup(&channel, sink).await {
                error!(error = %e, "Consumer topology setup failed, reconnecting");
                let _ = channel.close().await;
                let backoff = self.connector.settings().reconnect_backoff;
                match self.reconnect_unless_shutdown(backoff, &mut shutdown).await {
                    Some(next) => channel = next,
                    None => return Ok(()),
                }
                continue;
            }

            info!(
                exchange = %self.exchange,
                queues = self.bindings.len(),
                "Consumer session started"
            );

            let mut closed = channel.close_signal();
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Consumer shutting down");
                            let _ = channel.close().await;
                            return Ok(());
                        }
                    }
                    reason = closed.closed() => {
                        warn!(reason = %reason, "Consumer channel closed, reconnecting");
                        break;
                    }
                    next = deliveries.recv() => match next {
                        Some(delivery) => {
                            let action = handler.handle(&delivery).await;
                            settle(&delivery, action).await;
                        }
                        None => {
                            warn!("Delivery stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }

            let _ = channel.close().await;
            match self
                .reconnect_unless_shutdown(Duration::ZERO, &mut shutdown)
                .await
            {
                Some(next) => channel = next,
                None => return Ok(()),
            }
        }
    }

    /// Reconnect after `delay`; `None` when shutdown is requested first
    async fn reconnect_unless_shutdown(
        &self,
        delay: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<dyn BrokerChannel>> {
        let reconnect = async {
            tokio::time::sleep(delay).await;
            self.connector.reconnect().await
        };
        tokio::select! {
            channel = reconnect => Some(channel),
            _ = shutdown.wait_for(|stop| *stop) => {
                info!("Consumer shutting down while reconnecting");
                None
            }
        }
    }

    async fn setup(
        &self,
        channel: &Arc<dyn BrokerChannel>,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), BrokerError> {
        channel
            .declare_exchange(&self.exchange, self.exchange_kind)
            .await?;

        for binding in &self.bindings {
            channel.declare_queue(&binding.queue).await?;
            channel
                .bind_queue(&binding.queue, &self.exchange, &binding.routing_key)
                .await?;
        }

        channel.set_prefetch(PREFETCH_COUNT).await?;
        for binding in &self.bindings {
            let tag = format!("{}-{}", self.consumer_tag, binding.queue);
            channel.consume(&binding.queue, &tag, sink.clone()).await?;
            debug!(queue = %binding.queue, routing_key = %binding.routing_key, "Consuming queue");
        }
        Ok(())
    }
}

async fn settle(delivery: &Delivery, action: DeliveryAction) {
    if let Err(e) = delivery.settle(action).await {
        warn!(
            delivery_tag = delivery.delivery_tag,
            routing_key = %delivery.routing_key,
            action = ?action,
            error = %e,
            "Failed to settle delivery; broker will redeliver"
        );
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
