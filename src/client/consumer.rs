//! Consumer
//!
//! Declares a queue, binds it to the configured exchange and opens a
//! delivery stream on the managed channel. The three steps run in order and
//! the first failure is returned as is; a queue that was bound but could not
//! be consumed stays bound, and calling `bind` again is safe.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::ConnectionManager;
use crate::transport::{
    BasicConsumeOptions, DeliveryStream, QueueBindOptions, QueueDeclareOptions,
};
use crate::utils::{Error, Result};

#[derive(Debug, Clone)]
pub struct Consumer {
    manager: Arc<ConnectionManager>,
}

impl Consumer {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub async fn bind(&self, queue: &str, topic_pattern: &str) -> Result<DeliveryStream> {
        let channel = self.manager.channel().await?;
        let config = self.manager.config();

        channel
            .queue_declare(queue, QueueDeclareOptions::default())
            .await
            .map_err(|source| Error::Declare {
                queue: queue.to_string(),
                source,
            })?;

        channel
            .queue_bind(
                queue,
                topic_pattern,
                config.exchange(),
                QueueBindOptions::default(),
            )
            .await
            .map_err(|source| Error::Bind {
                queue: queue.to_string(),
                pattern: topic_pattern.to_string(),
                source,
            })?;

        let tag = self.consumer_tag();
        let deliveries = channel
            .consume(queue, &tag, BasicConsumeOptions::default())
            .await
            .map_err(|source| Error::Consume {
                queue: queue.to_string(),
                source,
            })?;

        info!(queue, pattern = topic_pattern, consumer = %tag, "consuming");
        Ok(deliveries)
    }

    fn consumer_tag(&self) -> String {
        let config = self.manager.config();
        if let Some(tag) = config.consumer_tag() {
            return tag.to_string();
        }

        let base = match config.topic_prefix() {
            "" => "brokerlink",
            prefix => prefix,
        };
        format!("{base}-{}", Uuid::new_v4())
    }
}
