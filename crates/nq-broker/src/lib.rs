//! # NQ Broker
//!
//! Long-lived broker sessions for the notification pipeline.
//!
//! This crate owns everything between the pipeline and the message broker:
//! - An [`EndpointPool`] of one or two alternate endpoints with optional TLS
//! - A [`Connector`] with a bounded initial connect and an unbounded reconnect
//! - A [`Consumer`] that hands deliveries to a handler one at a time
//! - A [`Producer`] that holds publishes back while it reconnects
//!
//! Sessions talk to the broker only through the [`BrokerTransport`] and
//! [`BrokerChannel`] traits. [`InMemoryBroker`] backs tests; the AMQP transport
//! is available behind the `amqp` feature.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use nq_broker::{
//!     new_consumer, ConnectionSettings, EndpointPool, ExchangeName, InMemoryBroker,
//!     QueueBinding,
//! };
//! use std::sync::Arc;
//!
//! let pool = EndpointPool::new(["amqp://localhost:5672"]).unwrap();
//! let bindings = QueueBinding::parse_list("nq.incident:incident").unwrap();
//! let consumer = new_consumer(
//!     Arc::new(InMemoryBroker::new()),
//!     pool,
//!     bindings,
//!     ExchangeName::new("nq").unwrap(),
//!     ConnectionSettings::default(),
//! );
//! ```

use std::sync::Arc;
use std::time::Duration;

pub mod connection;
pub mod consumer;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod producer;
pub mod providers;
pub mod retry;
pub mod transport;

pub use connection::{ConnectionSettings, Connector};
pub use consumer::{Consumer, DeliveryHandler};
pub use endpoint::{redact_endpoint, EndpointPool, TlsConfig};
pub use error::{BrokerError, ConfigurationError, ValidationError};
pub use message::{
    Delivery, DeliveryAction, ExchangeKind, ExchangeName, OutboundMessage, QueueBinding,
    RoutingKey, JSON_CONTENT_TYPE,
};
pub use producer::{Producer, Publisher};
pub use providers::{InMemoryBroker, InMemoryChannel};
pub use retry::{RetryPolicy, RetryState};
pub use transport::{BrokerChannel, BrokerTransport, CloseNotifier, CloseSignal};

#[cfg(feature = "amqp")]
pub use providers::AmqpTransport;

/// Attempts per endpoint for the initial connect and per publish
pub const RETRY_COUNT: u32 = 3;

/// Spacing between those attempts
pub const RETRY_WAIT: Duration = Duration::from_secs(5);

/// Pause between reconnect attempts once a channel closed
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Build a consumer over `bindings` on a durable direct exchange
///
/// Nothing connects until [`Consumer::run`] is called.
pub fn new_consumer(
    transport: Arc<dyn BrokerTransport>,
    endpoints: EndpointPool,
    bindings: Vec<QueueBinding>,
    exchange: ExchangeName,
    settings: ConnectionSettings,
) -> Consumer {
    let connector = Connector::new(transport, Arc::new(endpoints), settings);
    Consumer::new(connector, exchange, ExchangeKind::Direct, bindings)
}

/// Connect a producer and declare its exchange
///
/// `routing_key` becomes the key used by [`Producer::publish_default`].
pub async fn new_producer(
    transport: Arc<dyn BrokerTransport>,
    endpoints: EndpointPool,
    routing_key: Option<RoutingKey>,
    exchange: ExchangeName,
    exchange_kind: ExchangeKind,
    settings: ConnectionSettings,
) -> Result<Producer, BrokerError> {
    let connector = Connector::new(transport, Arc::new(endpoints), settings);
    Producer::connect(connector, exchange, exchange_kind, routing_key).await
}
