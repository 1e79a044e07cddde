//! The `transport` module is the seam between this crate and a broker
//! protocol client.
//!
//! A protocol client plugs in by implementing four traits:
//!
//! - `Transport`: dials an address and returns a `Connection`.
//! - `Connection`: opens channels and reports whether it is closed.
//! - `Channel`: declares, binds, consumes and publishes.
//! - `Acknowledger`: settles deliveries handed out by `Channel::consume`.
//!
//! `memory` ships an in-process broker implementing all of them, used by
//! the tests and the demo binary.

pub mod memory;
pub mod message;
pub mod topic;


use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::utils::TransportError;

pub use message::{
    BasicConsumeOptions, InboundMessage, OutboundMessage, QueueBindOptions, QueueDeclareOptions,
};

/// Lazy, unbounded sequence of deliveries. It ends when the transport
/// closes the channel it was opened on.
pub type DeliveryStream = BoxStream<'static, InboundMessage>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn dial(&self, address: &str) -> Result<Arc<dyn Connection>, TransportError>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), TransportError>;

    async fn queue_bind(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        options: QueueBindOptions,
    ) -> Result<(), TransportError>;

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, TransportError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), TransportError>;

    async fn nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), TransportError>;
}
