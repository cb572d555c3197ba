//! Producer session with a quiesce gate around reconnects.
//!
//! The live channel is published through a `watch` cell. While the cell is
//! empty, or holds a channel whose close signal already fired, the producer
//! is quiesced and every publish waits. A supervisor task watches the close
//! signal, empties the cell, reconnects, redeclares the exchange and stores
//! the new channel, which wakes every waiting publisher at once.

use crate::connection::Connector;
use crate::error::{BrokerError, ConfigurationError};
use crate::message::{ExchangeKind, ExchangeName, OutboundMessage, RoutingKey};
use crate::retry::RetryState;
use crate::transport::BrokerChannel;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type ChannelCell = watch::Sender<Option<Arc<dyn BrokerChannel>>>;

// ============================================================================
// Interface Traits
// ============================================================================

/// Publishes opaque bodies under a routing key
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `body` persistently, retrying within the connection budget
    async fn publish(&self, routing_key: &RoutingKey, body: Bytes) -> Result<(), BrokerError>;
}

// ============================================================================
// Producer
// ============================================================================

/// Long-lived producer bound to one exchange
pub struct Producer {
    connector: Connector,
    exchange: ExchangeName,
    default_key: Option<RoutingKey>,
    cell: Arc<ChannelCell>,
    closed: AtomicBool,
    supervisor: JoinHandle<()>,
}

impl Producer {
    /// Connect, declare the exchange once and start the reconnect supervisor
    pub async fn connect(
        connector: Connector,
        exchange: ExchangeName,
        exchange_kind: ExchangeKind,
        default_key: Option<RoutingKey>,
    ) -> Result<Self, BrokerError> {
        let channel = connector.connect().await?;
        if let Err(e) = channel.declare_exchange(&exchange, exchange_kind).await {
            let _ = channel.close().await;
            return Err(e);
        }
        info!(exchange = %exchange, kind = exchange_kind.as_str(), "Producer exchange declared");

        let (cell, _) = watch::channel(Some(channel));
        let cell = Arc::new(cell);
        let supervisor = tokio::spawn(supervise(
            connector.clone(),
            exchange.clone(),
            exchange_kind,
            cell.clone(),
        ));

        Ok(Self {
            connector,
            exchange,
            default_key,
            cell,
            closed: AtomicBool::new(false),
            supervisor,
        })
    }

    pub fn exchange(&self) -> &ExchangeName {
        &self.exchange
    }

    pub fn default_key(&self) -> Option<&RoutingKey> {
        self.default_key.as_ref()
    }

    /// Whether publishes are currently held back by a reconnect
    pub fn is_quiesced(&self) -> bool {
        !is_live(&self.cell.borrow())
    }

    /// Publish under the routing key given at construction
    pub async fn publish_default(&self, body: Bytes) -> Result<(), BrokerError> {
        let key = self
            .default_key
            .as_ref()
            .ok_or_else(|| ConfigurationError::Missing {
                key: "producer routing key".to_string(),
            })?;
        self.publish(key, body).await
    }

    /// Stop the supervisor and close the live channel
    ///
    /// Pending and later publishes fail with [`BrokerError::ChannelClosed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.supervisor.abort();
        let channel = self.cell.send_replace(None);
        if let Some(channel) = channel {
            let _ = channel.close().await;
        }
    }

    /// Wait until a live channel is available
    async fn live_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut rx = self.cell.subscribe();
        let guard = rx
            .wait_for(|c| self.closed.load(Ordering::SeqCst) || is_live(c))
            .await
            .map_err(|_| BrokerError::ChannelClosed {
                reason: "producer shut down".to_string(),
            })?;
        guard.as_ref().cloned().ok_or_else(|| BrokerError::ChannelClosed {
            reason: "producer shut down".to_string(),
        })
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

#[async_trait]
impl Publisher for Producer {
    async fn publish(&self, routing_key: &RoutingKey, body: Bytes) -> Result<(), BrokerError> {
        let message = OutboundMessage::persistent_json(routing_key.clone(), body);
        let policy = &self.connector.settings().retry;
        let mut state = RetryState::new();

        loop {
            let channel = self.live_channel().await?;
            state.record_attempt();

            match channel.publish(&self.exchange, &message).await {
                Ok(()) => {
                    debug!(routing_key = %routing_key, attempt = state.attempts, "Message published");
                    return Ok(());
                }
                Err(e) if state.can_retry(policy) => {
                    let delay = state.next_delay(policy);
                    warn!(
                        routing_key = %routing_key,
                        attempt = state.attempts,
                        max_attempts = policy.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Publish failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_live(channel: &Option<Arc<dyn BrokerChannel>>) -> bool {
    channel
        .as_ref()
        .map(|c| !c.close_signal().is_closed())
        .unwrap_or(false)
}

/// Reconnect supervisor; runs until the producer is dropped or closed
async fn supervise(
    connector: Connector,
    exchange: ExchangeName,
    exchange_kind: ExchangeKind,
    cell: Arc<ChannelCell>,
) {
    loop {
        let current = cell.borrow().clone();
        let Some(current) = current else {
            return;
        };

        let reason = current.close_signal().closed().await;
        cell.send_replace(None);
        warn!(reason = %reason, "Producer channel closed, quiescing publishes");
        let _ = current.close().await;

        let channel = loop {
            let channel = connector.reconnect().await;
            match channel.declare_exchange(&exchange, exchange_kind).await {
                Ok(()) => break channel,
                Err(e) => {
                    warn!(exchange = %exchange, error = %e, "Exchange redeclare failed after reconnect");
                    let _ = channel.close().await;
                    tokio::time::sleep(connector.settings().reconnect_backoff).await;
                }
            }
        };

        cell.send_replace(Some(channel));
        info!(exchange = %exchange, "Producer reconnected, publishes resumed");
    }
}

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;
