//! Broker transport implementations.

pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use memory::{InMemoryBroker, InMemoryChannel};

#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;
