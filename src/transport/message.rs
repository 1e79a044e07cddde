//! Message and option types exchanged with a transport.
//!
//! `InboundMessage` is what a consumer stream yields. It carries the routing
//! key used by the worker to pick a handler, the raw body, and a handle back
//! to the transport for settling the delivery. Settlement happens at most
//! once: the first `ack`/`nack` wins and later calls return
//! `Error::AlreadySettled` without reaching the transport.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;

use super::Acknowledger;
use crate::utils::{Error, Result};

/// Queue declaration flags. The default is the policy used everywhere in
/// this crate: non-durable, non-auto-delete, non-exclusive, blocking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDeclareOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueBindOptions {
    pub no_wait: bool,
}

/// Consume flags. `auto_ack` stays false: deliveries are acknowledged by
/// the worker once a handler succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicConsumeOptions {
    pub auto_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
}

/// A message ready to be handed to `Channel::publish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub content_type: String,
    pub body: Vec<u8>,
}

pub struct InboundMessage {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub content_type: Option<String>,
    /// Milliseconds since UNIX epoch, as stamped by the transport.
    pub timestamp: i64,
    pub body: Vec<u8>,
    settled: AtomicBool,
    acker: Arc<dyn Acknowledger>,
}

impl InboundMessage {
    pub fn new(
        delivery_tag: u64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered: false,
            content_type: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            body,
            settled: AtomicBool::new(false),
            acker,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Decode the JSON body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Acknowledge this single delivery.
    pub async fn ack(&self) -> Result<()> {
        self.settle()?;
        self.acker
            .ack(self.delivery_tag, false)
            .await
            .map_err(Error::Ack)
    }

    /// Negatively acknowledge this single delivery.
    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.settle()?;
        self.acker
            .nack(self.delivery_tag, false, requeue)
            .await
            .map_err(Error::Ack)
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }

    fn settle(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadySettled(self.delivery_tag));
        }
        Ok(())
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .field("settled", &self.is_settled())
            .finish()
    }
}
