//! Async client library for a partitioned, log-streaming broker: a
//! length-framed, correlation-multiplexed wire protocol under
//! Producer/Consumer/Admin facades.

pub mod admin;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod producer;
pub mod resilience;

use std::sync::Arc;

pub use admin::Admin;
pub use config::ClientConfig;
pub use consumer::{AutoCommit, Consumer, OffsetReset};
pub use error::{Error, Result};
pub use metrics::{Metrics, NoopMetrics, TracingMetrics};
pub use producer::{Partitioner, Producer, ProducerRecord};

use connection::Connection;
use resilience::ReconnectPolicy;

/// Owns up to two connections (data-plane and control-plane) and hands out
/// non-owning facade handles to them. Disposing a `Producer`/`Consumer`/
/// `Admin` does not close the underlying socket; disposing the `Client`
/// does (§3 Ownership model).
pub struct Client {
    config: ClientConfig,
    data: Arc<Connection>,
    control: Arc<Connection>,
    metrics: Arc<dyn Metrics>,
}

impl Client {
    /// Connects both the data-plane and control-plane endpoints named in
    /// `config`, validating the configuration first.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        Self::connect_with_metrics(config, Arc::new(NoopMetrics)).await
    }

    pub async fn connect_with_metrics(config: ClientConfig, metrics: Arc<dyn Metrics>) -> Result<Self> {
        config.validate()?;

        let reconnect_policy = ReconnectPolicy {
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base_delay,
        };

        let data = Connection::new(
            "data",
            config.data_endpoint.clone(),
            config.use_tls,
            config.client_id.clone(),
            config.connection_timeout,
            config.request_timeout,
            config.enable_auto_reconnect,
            reconnect_policy,
            Arc::clone(&metrics),
        );
        let control = Connection::new(
            "control",
            config.control_endpoint.clone(),
            config.use_tls,
            config.client_id.clone(),
            config.connection_timeout,
            config.request_timeout,
            config.enable_auto_reconnect,
            reconnect_policy,
            Arc::clone(&metrics),
        );

        data.connect().await?;
        control.connect().await?;

        Ok(Self {
            config,
            data,
            control,
            metrics,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// A producer bound to the data-plane connection.
    #[must_use]
    pub fn producer(&self) -> Arc<Producer> {
        Arc::new(Producer::new(
            Arc::clone(&self.data),
            Partitioner::KeyHashRoundRobin,
            std::time::Duration::ZERO,
            1,
            self.config.request_timeout.as_millis().min(i32::MAX as u128) as i32,
            Arc::clone(&self.metrics),
        ))
    }

    /// A producer with explicit linger/batch-size buffering.
    #[must_use]
    pub fn producer_with_batching(
        &self,
        partitioner: Partitioner,
        linger: std::time::Duration,
        batch_size: usize,
    ) -> Arc<Producer> {
        Arc::new(Producer::new(
            Arc::clone(&self.data),
            partitioner,
            linger,
            batch_size,
            self.config.request_timeout.as_millis().min(i32::MAX as u128) as i32,
            Arc::clone(&self.metrics),
        ))
    }

    /// A streaming consumer bound to the data-plane connection.
    #[must_use]
    pub fn consumer(&self) -> Arc<Consumer> {
        Arc::new(Consumer::new(Arc::clone(&self.data), Arc::clone(&self.metrics)))
    }

    /// An admin facade bound to the control-plane connection.
    #[must_use]
    pub fn admin(&self) -> Admin {
        Admin::new(Arc::clone(&self.control), Arc::clone(&self.metrics))
    }

    /// Cancels both reader tasks and closes both sockets.
    pub async fn dispose(&self) {
        self.data.dispose().await;
        self.control.dispose().await;
    }
}
