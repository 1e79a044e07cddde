//! Event handlers and routing-key strategies.
//!
//! An event is the part of a routing key that selects a handler. With the
//! default `LastSegment` strategy, deliveries on `orders.created` and
//! `invoices.created` both go to the handler registered for `created`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::transport::InboundMessage;
use crate::transport::topic::SEPARATOR;
use crate::utils::{Error, Result};

/// Processes one delivery. `true` means the message was handled and may be
/// acknowledged; `false` leaves it unacknowledged for the broker to
/// redeliver or dead-letter.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, message: &InboundMessage) -> bool;
}

#[async_trait]
impl<F> Handler for F
where
    F: Fn(&InboundMessage) -> bool + Send + Sync + 'static,
{
    async fn handle(&self, message: &InboundMessage) -> bool {
        self(message)
    }
}

/// Adapter for handlers written as async closures over an owned message
/// body. See [`async_handler`].
pub struct AsyncHandler<F>(F);

/// Wrap an async function of the routing key and body as a `Handler`.
pub fn async_handler<F, Fut>(f: F) -> AsyncHandler<F>
where
    F: Fn(String, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    AsyncHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for AsyncHandler<F>
where
    F: Fn(String, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn handle(&self, message: &InboundMessage) -> bool {
        (self.0)(message.routing_key.clone(), message.body.clone()).await
    }
}

/// Picks the event key out of a routing key.
pub trait KeyStrategy: Send + Sync + 'static {
    fn event_key<'a>(&self, routing_key: &'a str) -> &'a str;
}

impl<F> KeyStrategy for F
where
    F: for<'a> Fn(&'a str) -> &'a str + Send + Sync + 'static,
{
    fn event_key<'a>(&self, routing_key: &'a str) -> &'a str {
        self(routing_key)
    }
}

/// `orders.eu.created` → `created`. A key without dots is its own event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastSegment;

impl KeyStrategy for LastSegment {
    fn event_key<'a>(&self, routing_key: &'a str) -> &'a str {
        routing_key.rsplit(SEPARATOR).next().unwrap_or(routing_key)
    }
}

/// `orders.eu.created` → `orders`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSegment;

impl KeyStrategy for FirstSegment {
    fn event_key<'a>(&self, routing_key: &'a str) -> &'a str {
        routing_key.split(SEPARATOR).next().unwrap_or(routing_key)
    }
}

/// The whole routing key is the event.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullKey;

impl KeyStrategy for FullKey {
    fn event_key<'a>(&self, routing_key: &'a str) -> &'a str {
        routing_key
    }
}

/// Event name → handler. Names are unique; the first registration wins.
#[derive(Default, Clone)]
pub struct EventTable {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: impl Into<String>, handler: Arc<dyn Handler>) -> Result<()> {
        let event = event.into();
        if self.handlers.contains_key(&event) {
            return Err(Error::DuplicateEvent(event));
        }
        self.handlers.insert(event, handler);
        Ok(())
    }

    pub fn get(&self, event: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(event)
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for EventTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
