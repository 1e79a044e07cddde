//! The `client` module holds the broker-facing side of the crate.
//!
//! - `ConnectionManager`: owns the connection+channel link and repairs it.
//! - `Publisher`: JSON-encodes payloads and publishes, reconnecting once
//!   when the link has died.
//! - `Consumer`: declares, binds and consumes a queue.
//!
//! `Client` bundles the three around one shared manager.

pub mod connection;
pub mod consumer;
pub mod publisher;

pub use connection::ConnectionManager;
pub use consumer::Consumer;
pub use publisher::Publisher;

use std::sync::Arc;

use serde::Serialize;

use crate::config::LinkConfig;
use crate::transport::{DeliveryStream, Transport};
use crate::utils::Result;

#[derive(Debug, Clone)]
pub struct Client {
    manager: Arc<ConnectionManager>,
    publisher: Publisher,
    consumer: Consumer,
}

impl Client {
    pub fn new(config: LinkConfig, transport: Arc<dyn Transport>) -> Self {
        let manager = Arc::new(ConnectionManager::new(Arc::new(config), transport));
        Self {
            publisher: Publisher::new(manager.clone()),
            consumer: Consumer::new(manager.clone()),
            manager,
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.manager.start().await
    }

    pub async fn close(&self) -> Result<()> {
        self.manager.close().await
    }

    pub async fn publish<T>(&self, exchange: &str, topic: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.publisher.publish(exchange, topic, payload).await
    }

    pub async fn bind(&self, queue: &str, topic_pattern: &str) -> Result<DeliveryStream> {
        self.consumer.bind(queue, topic_pattern).await
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn consumer(&self) -> &Consumer {
        &self.consumer
    }

    pub fn config(&self) -> &LinkConfig {
        self.manager.config()
    }
}

#[cfg(test)]
mod tests;
