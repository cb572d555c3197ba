//! Transport abstraction over the broker client library.
//!
//! Sessions only talk to these traits; the in-memory transport backs tests and
//! the AMQP transport (feature `amqp`) backs deployments.

use crate::endpoint::TlsConfig;
use crate::error::BrokerError;
use crate::message::{Delivery, ExchangeKind, ExchangeName, OutboundMessage, RoutingKey};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

// ============================================================================
// Interface Traits
// ============================================================================

/// Opens channels against a single endpoint
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open a connection plus one channel on `endpoint`
    async fn open_channel(
        &self,
        endpoint: &str,
        tls: Option<&TlsConfig>,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError>;
}

/// A single broker channel
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable exchange
    async fn declare_exchange(
        &self,
        exchange: &ExchangeName,
        kind: ExchangeKind,
    ) -> Result<(), BrokerError>;

    /// Declare a durable, non-exclusive, non-auto-delete queue
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Bind `queue` to `exchange` under `routing_key`
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
    ) -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries in flight on this channel
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    /// Start consuming `queue` with manual acknowledgement, forwarding deliveries into `sink`
    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), BrokerError>;

    /// Publish one message to `exchange`
    async fn publish(
        &self,
        exchange: &ExchangeName,
        message: &OutboundMessage,
    ) -> Result<(), BrokerError>;

    /// Acknowledge a delivery
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Reject a delivery; without requeue it is dead-lettered
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Negatively acknowledge a delivery
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Signal that resolves once this channel closes
    fn close_signal(&self) -> CloseSignal;

    /// Close the channel and its connection
    async fn close(&self) -> Result<(), BrokerError>;
}

// ============================================================================
// Close Notification
// ============================================================================

/// Sending half of a channel close notification
#[derive(Debug, Clone)]
pub struct CloseNotifier {
    sender: watch::Sender<Option<String>>,
}

impl Default for CloseNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseNotifier {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Record the close reason; only the first reason is kept
    pub fn notify(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.sender.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Whether the channel has been reported closed
    pub fn is_closed(&self) -> bool {
        self.sender.borrow().is_some()
    }

    /// Create a signal observing this notifier
    pub fn signal(&self) -> CloseSignal {
        CloseSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiving half of a channel close notification
#[derive(Debug, Clone)]
pub struct CloseSignal {
    receiver: watch::Receiver<Option<String>>,
}

impl CloseSignal {
    /// Wait until the channel closes and return the reason
    ///
    /// Resolves immediately when the channel closed before the signal was
    /// created.
    pub async fn closed(&mut self) -> String {
        loop {
            if let Some(reason) = self.receiver.borrow_and_update().clone() {
                return reason;
            }
            if self.receiver.changed().await.is_err() {
                return "channel dropped".to_string();
            }
        }
    }

    /// Non-blocking check
    pub fn is_closed(&self) -> bool {
        self.receiver.borrow().is_some()
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
