//! Message types for broker operations including routing identifiers.

use crate::error::{BrokerError, ValidationError};
use crate::transport::BrokerChannel;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Content type attached to every published payload
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated routing key used to select queues on a direct exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Create new routing key with validation
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::Required {
                field: "routing_key".to_string(),
            });
        }

        // AMQP short strings are limited to 255 bytes
        if key.len() > 255 {
            return Err(ValidationError::OutOfRange {
                field: "routing_key".to_string(),
                message: "maximum 255 bytes".to_string(),
            });
        }

        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "routing_key".to_string(),
                message: "whitespace and control characters are not allowed".to_string(),
            });
        }

        Ok(Self(key))
    }

    /// Get routing key as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoutingKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RoutingKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoutingKey> for String {
    fn from(value: RoutingKey) -> Self {
        value.0
    }
}

/// Validated exchange name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeName(String);

impl ExchangeName {
    /// Create new exchange name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "exchange_name".to_string(),
            });
        }

        if name.len() > 255 {
            return Err(ValidationError::OutOfRange {
                field: "exchange_name".to_string(),
                message: "maximum 255 bytes".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get exchange name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExchangeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExchangeName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Exchange routing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Topic,
    Fanout,
}

impl ExchangeKind {
    /// Get the AMQP exchange type name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "topic" => Ok(Self::Topic),
            "fanout" => Ok(Self::Fanout),
            other => Err(ValidationError::InvalidFormat {
                field: "exchange_kind".to_string(),
                message: format!("unknown exchange type '{}'", other),
            }),
        }
    }
}

/// A queue bound to the exchange under one routing key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: RoutingKey,
}

impl QueueBinding {
    /// Create a binding with validation
    pub fn new(queue: impl Into<String>, routing_key: RoutingKey) -> Result<Self, ValidationError> {
        let queue = queue.into();
        if queue.is_empty() {
            return Err(ValidationError::Required {
                field: "queue".to_string(),
            });
        }

        Ok(Self { queue, routing_key })
    }

    /// Parse a comma-separated list of `name:key` pairs
    ///
    /// Surrounding whitespace is ignored and empty items are skipped, so
    /// `"nq.incident:incident, nq.status:status,"` yields two bindings.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, ValidationError> {
        let mut bindings = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (queue, key) = item
                .split_once(':')
                .ok_or_else(|| ValidationError::InvalidFormat {
                    field: "queue_binding".to_string(),
                    message: format!("expected 'name:key', got '{}'", item),
                })?;
            bindings.push(Self::new(queue.trim(), RoutingKey::new(key.trim())?)?);
        }

        if bindings.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_binding".to_string(),
            });
        }

        Ok(bindings)
    }
}

impl std::fmt::Display for QueueBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.queue, self.routing_key)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A message ready to be published
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub routing_key: RoutingKey,
    pub body: Bytes,
    pub content_type: String,
    pub persistent: bool,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    /// Persistent JSON message stamped with the current UTC time
    pub fn persistent_json(routing_key: RoutingKey, body: Bytes) -> Self {
        Self {
            routing_key,
            body,
            content_type: JSON_CONTENT_TYPE.to_string(),
            persistent: true,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome a handler requests for a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryAction {
    /// Acknowledge and remove the message
    Ack,
    /// Reject; with `requeue = false` the broker dead-letters it
    Reject { requeue: bool },
    /// Negative acknowledgement
    Nack { requeue: bool },
}

/// A message received from a consumed queue
///
/// The delivery keeps a handle to the channel it arrived on; settling it after
/// that channel closed fails and the broker redelivers the message.
#[derive(Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub exchange: String,
    pub queue: String,
    pub body: Bytes,
    pub redelivered: bool,
    pub timestamp: Option<DateTime<Utc>>,
    channel: Arc<dyn BrokerChannel>,
}

impl Delivery {
    /// Create a delivery bound to the channel that produced it
    pub fn new(
        delivery_tag: u64,
        routing_key: impl Into<String>,
        exchange: impl Into<String>,
        queue: impl Into<String>,
        body: Bytes,
        channel: Arc<dyn BrokerChannel>,
    ) -> Self {
        Self {
            delivery_tag,
            routing_key: routing_key.into(),
            exchange: exchange.into(),
            queue: queue.into(),
            body,
            redelivered: false,
            timestamp: None,
            channel,
        }
    }

    /// Mark delivery as redelivered
    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Attach the publish timestamp
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Apply the requested action on the originating channel
    pub async fn settle(&self, action: DeliveryAction) -> Result<(), BrokerError> {
        match action {
            DeliveryAction::Ack => self.channel.ack(self.delivery_tag).await,
            DeliveryAction::Reject { requeue } => {
                self.channel.reject(self.delivery_tag, requeue).await
            }
            DeliveryAction::Nack { requeue } => self.channel.nack(self.delivery_tag, requeue).await,
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("routing_key", &self.routing_key)
            .field("exchange", &self.exchange)
            .field("queue", &self.queue)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
