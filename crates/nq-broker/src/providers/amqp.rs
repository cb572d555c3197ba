//! RabbitMQ transport over AMQP 0-9-1.
//!
//! Each `open_channel` call opens a dedicated connection with one channel in
//! publisher-confirm mode. Connection errors and channel failures fire the
//! channel's close signal so sessions can reconnect.

use crate::endpoint::{redact_endpoint, TlsConfig};
use crate::error::BrokerError;
use crate::message::{Delivery, ExchangeKind, ExchangeName, OutboundMessage, RoutingKey};
use crate::transport::{BrokerChannel, BrokerTransport, CloseNotifier, CloseSignal};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::tcp::OwnedTLSConfig;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Transport backed by `lapin`
#[derive(Debug, Default, Clone)]
pub struct AmqpTransport {
    connection_name: Option<String>,
}

impl AmqpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection name reported to the broker management UI
    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    fn properties(&self) -> ConnectionProperties {
        let properties = ConnectionProperties::default();
        match &self.connection_name {
            Some(name) => properties.with_connection_name(name.clone().into()),
            None => properties,
        }
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    async fn open_channel(
        &self,
        endpoint: &str,
        tls: Option<&TlsConfig>,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let connection = match tls {
            Some(tls) => {
                let config = OwnedTLSConfig {
                    identity: None,
                    cert_chain: Some(tls.ca_pem().to_string()),
                };
                Connection::connect_with_config(endpoint, self.properties(), config).await
            }
            None => Connection::connect(endpoint, self.properties()).await,
        }
        .map_err(|e| connect_error(endpoint, e))?;

        let notifier = CloseNotifier::new();
        let on_error = notifier.clone();
        let redacted = redact_endpoint(endpoint);
        connection.on_error(move |err| {
            error!(endpoint = %redacted, error = %err, "AMQP connection error");
            on_error.notify(err.to_string());
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| connect_error(endpoint, e))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| connect_error(endpoint, e))?;

        debug!(endpoint = %redact_endpoint(endpoint), "AMQP channel opened");

        Ok(Arc::new(AmqpChannel {
            connection: Arc::new(connection),
            channel,
            notifier,
        }))
    }
}

fn connect_error(endpoint: &str, err: lapin::Error) -> BrokerError {
    let message = err.to_string();
    if message.contains("ACCESS_REFUSED") || message.contains("authentication") {
        BrokerError::AuthenticationFailed {
            endpoint: redact_endpoint(endpoint),
            message,
        }
    } else {
        BrokerError::ConnectionFailed {
            endpoint: redact_endpoint(endpoint),
            message,
        }
    }
}

/// Channel plus the connection that owns it
#[derive(Clone)]
pub struct AmqpChannel {
    connection: Arc<Connection>,
    channel: Channel,
    notifier: CloseNotifier,
}

impl AmqpChannel {
    /// Map a channel error, firing the close signal when the channel is gone
    fn channel_error(&self, err: lapin::Error, to_error: impl FnOnce(String) -> BrokerError) -> BrokerError {
        if !self.channel.status().connected() {
            self.notifier.notify(format!("channel closed: {}", err));
            return BrokerError::ChannelClosed {
                reason: err.to_string(),
            };
        }
        to_error(err.to_string())
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(
        &self,
        exchange: &ExchangeName,
        kind: ExchangeKind,
    ) -> Result<(), BrokerError> {
        let amqp_kind = match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        };
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };

        self.channel
            .exchange_declare(exchange.as_str(), amqp_kind, options, FieldTable::default())
            .await
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::DeclareFailed {
                    entity: format!("exchange '{}'", exchange),
                    message,
                })
            })
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            ..QueueDeclareOptions::default()
        };

        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::DeclareFailed {
                    entity: format!("queue '{}'", queue),
                    message,
                })
            })
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange.as_str(),
                routing_key.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::DeclareFailed {
                    entity: format!("binding '{}:{}'", queue, routing_key),
                    message,
                })
            })
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::DeclareFailed {
                    entity: format!("prefetch of {}", count),
                    message,
                })
            })
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), BrokerError> {
        let options = BasicConsumeOptions {
            no_ack: false,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = self
            .channel
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::DeclareFailed {
                    entity: format!("consumer on '{}'", queue),
                    message,
                })
            })?;

        let acker: Arc<dyn BrokerChannel> = Arc::new(self.clone());
        let notifier = self.notifier.clone();
        let queue = queue.to_string();

        tokio::spawn(async move {
            while let Some(next) = consumer.next().await {
                match next {
                    Ok(delivery) => {
                        let timestamp = delivery
                            .properties
                            .timestamp()
                            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());
                        let item = Delivery::new(
                            delivery.delivery_tag,
                            delivery.routing_key.as_str(),
                            delivery.exchange.as_str(),
                            queue.clone(),
                            Bytes::from(delivery.data),
                            acker.clone(),
                        )
                        .with_redelivered(delivery.redelivered)
                        .with_timestamp(timestamp);

                        if sink.send(item).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "AMQP consumer stream failed");
                        notifier.notify(format!("consumer failed: {}", e));
                        break;
                    }
                }
            }
            notifier.notify(format!("consumer on '{}' ended", queue));
        });

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &ExchangeName,
        message: &OutboundMessage,
    ) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_content_type(message.content_type.clone().into())
            .with_timestamp(message.timestamp.timestamp().max(0) as u64);
        if message.persistent {
            properties = properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }

        let publish_error = |text: String| BrokerError::PublishFailed {
            routing_key: message.routing_key.to_string(),
            message: text,
        };

        let confirm = self
            .channel
            .basic_publish(
                exchange.as_str(),
                message.routing_key.as_str(),
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| self.channel_error(e, publish_error))?;

        let confirmation = confirm
            .await
            .map_err(|e| self.channel_error(e, publish_error))?;

        if confirmation.is_nack() {
            return Err(publish_error("broker returned nack".to_string()));
        }
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::SettleFailed {
                    delivery_tag,
                    message,
                })
            })
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::SettleFailed {
                    delivery_tag,
                    message,
                })
            })
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue,
        };
        self.channel
            .basic_nack(delivery_tag, options)
            .await
            .map_err(|e| {
                self.channel_error(e, |message| BrokerError::SettleFailed {
                    delivery_tag,
                    message,
                })
            })
    }

    fn close_signal(&self) -> CloseSignal {
        self.notifier.signal()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.notifier.notify("closed by client");
        if let Err(e) = self.channel.close(200, "closing").await {
            debug!(error = %e, "AMQP channel close failed");
        }
        self.connection
            .close(200, "closing")
            .await
            .map_err(|e| BrokerError::ChannelClosed {
                reason: e.to_string(),
            })
    }
}
