//! Publisher
//!
//! Marshals payloads to JSON and publishes them on the managed link. A dead
//! link is repaired once before publishing; there is no retry loop, so a
//! broker that stays down costs one dial per publish call.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::ConnectionManager;
use crate::transport::OutboundMessage;
use crate::transport::topic;
use crate::utils::{Error, Result};

#[derive(Debug, Clone)]
pub struct Publisher {
    manager: Arc<ConnectionManager>,
}

impl Publisher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Publish `payload` to `exchange` under the fully-qualified `topic`.
    pub async fn publish<T>(&self, exchange: &str, topic: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload)?;

        let channel = self
            .manager
            .ensure_usable()
            .await
            .map_err(|e| Error::Reconnect(Box::new(e)))?;

        let config = self.manager.config();
        let message = OutboundMessage {
            exchange: exchange.to_string(),
            routing_key: topic.to_string(),
            mandatory: config.mandatory(),
            immediate: config.immediate(),
            content_type: config.content_type().to_string(),
            body,
        };

        channel
            .publish(message)
            .await
            .map_err(|source| Error::Publish {
                exchange: exchange.to_string(),
                routing_key: topic.to_string(),
                source,
            })?;

        debug!(exchange, routing_key = topic, "published");
        Ok(())
    }

    /// Publish to the configured exchange under `<prefix>.<topic>`.
    pub async fn publish_topic<T>(&self, topic: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let config = self.manager.config();
        let routing_key = topic::qualify(config.topic_prefix(), topic);
        self.publish(config.exchange(), &routing_key, payload).await
    }
}
