//! In-memory broker transport for testing and development.
//!
//! This module provides a broker that behaves like a single-node AMQP server:
//! - Durable exchanges (direct, topic, fanout) with queue bindings
//! - Manual acknowledgement with per-channel unacked tracking
//! - Dead-letter lists for deliveries rejected without requeue
//! - Forced connection closes that return unacked deliveries to the queue head
//! - Unreachable endpoints and injected publish failures
//!
//! Every published message is also appended to a per-exchange log so tests
//! can observe what reached the exchange and in which order.

use crate::endpoint::TlsConfig;
use crate::error::BrokerError;
use crate::message::{Delivery, ExchangeKind, ExchangeName, OutboundMessage, RoutingKey};
use crate::transport::{BrokerChannel, BrokerTransport, CloseNotifier};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    bindings: Vec<Binding>,
    queues: HashMap<String, QueueState>,
    channels: HashMap<u64, ChannelState>,
    publish_log: HashMap<String, Vec<OutboundMessage>>,
    unreachable: HashSet<String>,
    connect_attempts: HashMap<String, u32>,
    failing_publishes: u32,
    next_channel_id: u64,
    next_delivery_tag: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    exchange: String,
    routing_key: String,
    queue: String,
}

struct QueueState {
    ready: VecDeque<StoredMessage>,
    dead_letters: Vec<StoredMessage>,
    acked: u64,
    notify: Arc<Notify>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            dead_letters: Vec::new(),
            acked: 0,
            notify: Arc::new(Notify::new()),
        }
    }

    fn push_back(&mut self, message: StoredMessage) {
        self.ready.push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&mut self, message: StoredMessage) {
        self.ready.push_front(message);
        self.notify.notify_one();
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    body: Bytes,
    timestamp: Option<DateTime<Utc>>,
    redelivered: bool,
}

struct ChannelState {
    endpoint: String,
    notifier: CloseNotifier,
    unacked: BTreeMap<u64, (String, StoredMessage)>,
    prefetch: Option<u16>,
}

impl BrokerState {
    fn route(&mut self, exchange: &str, routing_key: &str, message: StoredMessage) -> usize {
        let kind = self.exchanges.get(exchange).copied().unwrap_or_default();
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&b.routing_key, routing_key),
            })
            .map(|b| b.queue.clone())
            .collect();

        for queue in &targets {
            if let Some(state) = self.queues.get_mut(queue) {
                state.push_back(message.clone());
            }
        }
        targets.len()
    }

    /// Close one channel, returning its unacked deliveries to their queues
    fn close_channel(&mut self, channel_id: u64, reason: &str) {
        let Some(channel) = self.channels.remove(&channel_id) else {
            return;
        };

        // Reverse tag order so the oldest delivery ends up at the head
        for (_, (queue, mut message)) in channel.unacked.into_iter().rev() {
            message.redelivered = true;
            if let Some(state) = self.queues.get_mut(&queue) {
                state.push_front(message);
            }
        }
        channel.notifier.notify(reason);
    }

    fn take_unacked(
        &mut self,
        channel_id: u64,
        delivery_tag: u64,
    ) -> Result<(String, StoredMessage), BrokerError> {
        let channel = self
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| BrokerError::ChannelClosed {
                reason: "channel is closed".to_string(),
            })?;
        channel
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| BrokerError::SettleFailed {
                delivery_tag,
                message: "unknown delivery tag".to_string(),
            })
    }
}

/// AMQP topic pattern match (`*` one word, `#` zero or more words)
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

// ============================================================================
// Public Broker Handle
// ============================================================================

/// In-memory broker usable as a [`BrokerTransport`]
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make an endpoint refuse (or accept again) new connections
    pub fn set_endpoint_reachable(&self, endpoint: &str, reachable: bool) {
        let mut state = self.lock();
        if reachable {
            state.unreachable.remove(endpoint);
        } else {
            state.unreachable.insert(endpoint.to_string());
        }
    }

    /// Number of connection attempts made against an endpoint
    pub fn connect_attempts(&self, endpoint: &str) -> u32 {
        self.lock()
            .connect_attempts
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Number of open channels
    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }

    /// Prefetch limits set on the open channels, `None` where never set
    pub fn open_channel_prefetch(&self) -> Vec<Option<u16>> {
        self.lock().channels.values().map(|c| c.prefetch).collect()
    }

    /// Endpoints of the open channels
    pub fn open_channel_endpoints(&self) -> Vec<String> {
        self.lock()
            .channels
            .values()
            .map(|c| c.endpoint.clone())
            .collect()
    }

    /// Force-close every open channel, as a broker restart would
    pub fn close_all_connections(&self, reason: &str) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.channels.keys().copied().collect();
        debug!(channels = ids.len(), reason, "Closing all in-memory channels");
        for id in ids {
            state.close_channel(id, reason);
        }
    }

    /// Fail the next `count` publishes on any channel
    pub fn fail_next_publishes(&self, count: u32) {
        self.lock().failing_publishes = count;
    }

    /// Declare an exchange, a queue and a binding outside any channel
    pub fn bind_observer_queue(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        queue: &str,
        routing_key: &str,
    ) {
        let mut state = self.lock();
        state.exchanges.entry(exchange.to_string()).or_insert(kind);
        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
        let binding = Binding {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            queue: queue.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
    }

    /// Publish as an external producer would; returns the number of queues reached
    pub fn publish_external(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Bytes>,
    ) -> Result<usize, BrokerError> {
        let mut state = self.lock();
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::ExchangeNotFound {
                exchange: exchange.to_string(),
            });
        }
        let message = StoredMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.into(),
            timestamp: Some(Utc::now()),
            redelivered: false,
        };
        Ok(state.route(exchange, routing_key, message))
    }

    /// Messages published through channels to `exchange`, in publish order
    pub fn published(&self, exchange: &str) -> Vec<OutboundMessage> {
        self.lock()
            .publish_log
            .get(exchange)
            .cloned()
            .unwrap_or_default()
    }

    /// Bodies published to `exchange` under `routing_key`, in publish order
    pub fn published_bodies(&self, exchange: &str, routing_key: &str) -> Vec<Bytes> {
        self.published(exchange)
            .into_iter()
            .filter(|m| m.routing_key.as_str() == routing_key)
            .map(|m| m.body)
            .collect()
    }

    /// Ready (not yet delivered) messages in a queue
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Remove and return the ready messages of a queue
    pub fn drain_queue(&self, queue: &str) -> Vec<Bytes> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).map(|m| m.body).collect())
            .unwrap_or_default()
    }

    /// Deliveries acknowledged from a queue
    pub fn acked_count(&self, queue: &str) -> u64 {
        self.lock().queues.get(queue).map(|q| q.acked).unwrap_or(0)
    }

    /// Deliveries currently handed out and not yet settled
    pub fn unacked_count(&self) -> usize {
        self.lock().channels.values().map(|c| c.unacked.len()).sum()
    }

    /// Bodies dead-lettered from a queue
    pub fn dead_letters(&self, queue: &str) -> Vec<Bytes> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.dead_letters.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    async fn open_channel(
        &self,
        endpoint: &str,
        _tls: Option<&TlsConfig>,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut state = self.lock();
        *state
            .connect_attempts
            .entry(endpoint.to_string())
            .or_insert(0) += 1;

        if state.unreachable.contains(endpoint) {
            return Err(BrokerError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }

        state.next_channel_id += 1;
        let id = state.next_channel_id;
        let notifier = CloseNotifier::new();
        state.channels.insert(
            id,
            ChannelState {
                endpoint: endpoint.to_string(),
                notifier: notifier.clone(),
                unacked: BTreeMap::new(),
                prefetch: None,
            },
        );

        Ok(Arc::new(InMemoryChannel {
            id,
            broker: self.clone(),
            notifier,
        }))
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Channel handed out by [`InMemoryBroker`]
#[derive(Clone)]
pub struct InMemoryChannel {
    id: u64,
    broker: InMemoryBroker,
    notifier: CloseNotifier,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.notifier.is_closed() {
            return Err(BrokerError::ChannelClosed {
                reason: "channel is closed".to_string(),
            });
        }
        Ok(())
    }

    /// Hand out the next ready message of `queue`
    ///
    /// `Err` means the channel closed and the pump should stop.
    fn next_delivery(&self, queue: &str) -> Result<Option<(u64, StoredMessage)>, ()> {
        let mut state = self.broker.lock();
        if !state.channels.contains_key(&self.id) {
            return Err(());
        }

        let Some(message) = state.queues.get_mut(queue).and_then(|q| q.ready.pop_front()) else {
            return Ok(None);
        };

        state.next_delivery_tag += 1;
        let tag = state.next_delivery_tag;
        if let Some(channel) = state.channels.get_mut(&self.id) {
            channel
                .unacked
                .insert(tag, (queue.to_string(), message.clone()));
        }
        Ok(Some((tag, message)))
    }

    fn settle(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        let (queue, mut message) = state.take_unacked(self.id, delivery_tag)?;
        if let Some(q) = state.queues.get_mut(&queue) {
            if requeue {
                message.redelivered = true;
                q.push_front(message);
            } else {
                q.dead_letters.push(message);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(
        &self,
        exchange: &ExchangeName,
        kind: ExchangeKind,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        match state.exchanges.get(exchange.as_str()) {
            Some(existing) if *existing != kind => Err(BrokerError::DeclareFailed {
                entity: format!("exchange '{}'", exchange),
                message: format!(
                    "inequivalent type: declared {}, requested {}",
                    existing.as_str(),
                    kind.as_str()
                ),
            }),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.as_str().to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker
            .lock()
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if !state.exchanges.contains_key(exchange.as_str()) {
            return Err(BrokerError::ExchangeNotFound {
                exchange: exchange.to_string(),
            });
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound {
                queue: queue.to_string(),
            });
        }

        let binding = Binding {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            queue: queue.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if let Some(channel) = self.broker.lock().channels.get_mut(&self.id) {
            channel.prefetch = Some(count);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let notify = {
            let state = self.broker.lock();
            state
                .queues
                .get(queue)
                .map(|q| q.notify.clone())
                .ok_or_else(|| BrokerError::QueueNotFound {
                    queue: queue.to_string(),
                })?
        };

        debug!(queue, consumer_tag, channel = self.id, "Starting in-memory consumer");

        let channel = self.clone();
        let acker: Arc<dyn BrokerChannel> = Arc::new(self.clone());
        let queue = queue.to_string();
        let mut closed = self.notifier.signal();

        tokio::spawn(async move {
            loop {
                match channel.next_delivery(&queue) {
                    Err(()) => break,
                    Ok(Some((tag, message))) => {
                        let delivery = Delivery::new(
                            tag,
                            message.routing_key,
                            message.exchange,
                            queue.clone(),
                            message.body,
                            acker.clone(),
                        )
                        .with_redelivered(message.redelivered)
                        .with_timestamp(message.timestamp);

                        if sink.send(delivery).await.is_err() {
                            // Consumer went away; hand the message back
                            let _ = channel.settle(tag, true);
                            break;
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = notify.notified() => {}
                            _ = closed.closed() => break,
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn publish(
        &self,
        exchange: &ExchangeName,
        message: &OutboundMessage,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if !state.channels.contains_key(&self.id) {
            return Err(BrokerError::ChannelClosed {
                reason: "channel is closed".to_string(),
            });
        }

        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(BrokerError::PublishFailed {
                routing_key: message.routing_key.to_string(),
                message: "injected publish failure".to_string(),
            });
        }

        if !state.exchanges.contains_key(exchange.as_str()) {
            return Err(BrokerError::ExchangeNotFound {
                exchange: exchange.to_string(),
            });
        }

        state
            .publish_log
            .entry(exchange.to_string())
            .or_default()
            .push(message.clone());

        let stored = StoredMessage {
            exchange: exchange.to_string(),
            routing_key: message.routing_key.to_string(),
            body: message.body.clone(),
            timestamp: Some(message.timestamp),
            redelivered: false,
        };
        state.route(exchange.as_str(), message.routing_key.as_str(), stored);
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.lock();
        let (queue, _) = state.take_unacked(self.id, delivery_tag)?;
        if let Some(q) = state.queues.get_mut(&queue) {
            q.acked += 1;
        }
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.settle(delivery_tag, requeue)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.settle(delivery_tag, requeue)
    }

    fn close_signal(&self) -> crate::transport::CloseSignal {
        self.notifier.signal()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.broker.lock().close_channel(self.id, "closed by client");
        Ok(())
    }
}
