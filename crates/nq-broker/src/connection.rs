//! Connection establishment with bounded initial connect and unbounded reconnect.

use crate::endpoint::{redact_endpoint, EndpointPool};
use crate::error::BrokerError;
use crate::retry::{RetryPolicy, RetryState};
use crate::transport::{BrokerChannel, BrokerTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Timing knobs for connecting and reconnecting
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Attempts per endpoint during the initial connect and per publish
    pub retry: RetryPolicy,

    /// Pause between reconnect attempts after a channel closed
    pub reconnect_backoff: Duration,

    /// Rounds over both endpoints before the initial connect gives up
    ///
    /// `None` keeps alternating until an endpoint answers. A single endpoint
    /// always stops after one round.
    pub failover_rounds: Option<u32>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            reconnect_backoff: crate::RECONNECT_BACKOFF,
            failover_rounds: None,
        }
    }
}

/// Opens channels over an endpoint pool
#[derive(Clone)]
pub struct Connector {
    transport: Arc<dyn BrokerTransport>,
    pool: Arc<EndpointPool>,
    settings: ConnectionSettings,
}

impl Connector {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        pool: Arc<EndpointPool>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            transport,
            pool,
            settings,
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Initial connect
    ///
    /// Tries the endpoint in use for the full retry budget, then switches to
    /// the alternate and repeats. The first success pins the endpoint in use.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut total_attempts = 0u32;
        let mut exhausted_endpoints = 0u32;

        loop {
            let endpoint = self.pool.current().to_string();
            match self.connect_endpoint(&endpoint, &mut total_attempts).await {
                Ok(channel) => {
                    if self.pool.pin_current() {
                        info!(
                            endpoint = %redact_endpoint(&endpoint),
                            "Broker endpoint pinned as URL in use"
                        );
                    }
                    return Ok(channel);
                }
                Err(e) => {
                    exhausted_endpoints += 1;
                    error!(
                        endpoint = %redact_endpoint(&endpoint),
                        attempts = self.settings.retry.max_attempts,
                        error = %e,
                        "Broker endpoint exhausted its retry budget"
                    );

                    if !self.pool.has_alternate() {
                        return Err(BrokerError::EndpointsExhausted {
                            attempts: total_attempts,
                        });
                    }

                    if let Some(rounds) = self.settings.failover_rounds {
                        if exhausted_endpoints >= rounds.saturating_mul(2) {
                            return Err(BrokerError::EndpointsExhausted {
                                attempts: total_attempts,
                            });
                        }
                    }

                    let alternate = self.pool.switch_to_alternate();
                    warn!(
                        endpoint = %redact_endpoint(alternate),
                        "Failing over to alternate broker endpoint"
                    );
                }
            }
        }
    }

    /// Reconnect after a channel closed
    ///
    /// Never gives up: one attempt per endpoint, `reconnect_backoff` apart,
    /// alternating endpoints on every failure.
    pub async fn reconnect(&self) -> Arc<dyn BrokerChannel> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let endpoint = self.pool.current().to_string();
            match self.transport.open_channel(&endpoint, self.pool.tls()).await {
                Ok(channel) => {
                    info!(
                        endpoint = %redact_endpoint(&endpoint),
                        attempt,
                        "Broker channel re-established"
                    );
                    return channel;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(
                            endpoint = %redact_endpoint(&endpoint),
                            attempt,
                            error = %e,
                            "Reconnect attempt failed"
                        );
                    } else {
                        error!(
                            endpoint = %redact_endpoint(&endpoint),
                            attempt,
                            error = %e,
                            "Reconnect attempt failed with unrecoverable error"
                        );
                    }
                    tokio::time::sleep(self.settings.reconnect_backoff).await;
                    self.pool.switch_to_alternate();
                }
            }
        }
    }

    async fn connect_endpoint(
        &self,
        endpoint: &str,
        total_attempts: &mut u32,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let policy = &self.settings.retry;
        let mut state = RetryState::new();

        loop {
            state.record_attempt();
            *total_attempts += 1;

            match self.transport.open_channel(endpoint, self.pool.tls()).await {
                Ok(channel) => return Ok(channel),
                Err(e) if state.can_retry(policy) => {
                    let delay = state.next_delay(policy);
                    warn!(
                        endpoint = %redact_endpoint(endpoint),
                        attempt = state.attempts,
                        max_attempts = policy.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker connect failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
