//! In-memory broker
//!
//! `MemoryBroker` is an in-process topic broker implementing every transport
//! trait. It is responsible for:
//! - tracking queues, their bindings and their consumers
//! - routing published messages to every queue whose binding matches
//! - tracking unacknowledged deliveries and settling them on ack/nack
//! - injecting faults (failed dials, refused channels, severed connections)
//!
//! Concurrency and usage notes:
//! - State lives behind one `std::sync::Mutex` that is never held across an
//!   `.await`; every trait method does its bookkeeping synchronously.
//! - Closing a channel (directly, or through its connection) ends the
//!   delivery streams opened on it and requeues its unacknowledged
//!   deliveries, flagged as redelivered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc::{self, UnboundedSender};

use super::topic;
use super::{
    Acknowledger, BasicConsumeOptions, Channel, Connection, DeliveryStream, InboundMessage,
    OutboundMessage, QueueBindOptions, QueueDeclareOptions, Transport,
};
use crate::utils::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub pattern: String,
}

#[derive(Debug, Clone)]
struct PendingDelivery {
    queue: String,
    exchange: String,
    routing_key: String,
    content_type: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct ConsumerEntry {
    tag: String,
    channel: Arc<ChannelState>,
    sender: UnboundedSender<InboundMessage>,
}

#[derive(Debug, Default)]
struct Queue {
    options: QueueDeclareOptions,
    backlog: VecDeque<PendingDelivery>,
    consumers: Vec<ConsumerEntry>,
    next_consumer: usize,
}

#[derive(Debug)]
struct Unacked {
    delivery: PendingDelivery,
    channel: Arc<ChannelState>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_dials: usize,
    refuse_channels: bool,
    refuse_declare: bool,
    refuse_bind: bool,
    refuse_consume: bool,
    fail_channel_close: bool,
    fail_publish: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    connections: Vec<Arc<ConnectionState>>,
    unacked: HashMap<u64, Unacked>,
    acked: Vec<u64>,
    dead_letters: Vec<PendingDelivery>,
    published: Vec<OutboundMessage>,
    returned: Vec<OutboundMessage>,
    next_delivery_tag: u64,
    next_id: u64,
    dial_count: usize,
    last_address: Option<String>,
    faults: Faults,
}

#[derive(Debug)]
struct ConnectionState {
    id: u64,
    closed: AtomicBool,
}

#[derive(Debug)]
struct ChannelState {
    id: u64,
    connection: Arc<ConnectionState>,
    closed: AtomicBool,
}

impl ChannelState {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.connection.closed.load(Ordering::SeqCst)
    }
}

/// Cloneable handle to one shared in-memory broker.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    acker: Arc<MemoryAcker>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(BrokerState::default()));
        Self {
            acker: Arc::new(MemoryAcker {
                state: state.clone(),
            }),
            state,
        }
    }

    /// Make the next `count` dials fail.
    pub fn fail_dials(&self, count: usize) {
        self.lock().faults.failing_dials = count;
    }

    pub fn refuse_channels(&self, refuse: bool) {
        self.lock().faults.refuse_channels = refuse;
    }

    pub fn refuse_declare(&self, refuse: bool) {
        self.lock().faults.refuse_declare = refuse;
    }

    pub fn refuse_bind(&self, refuse: bool) {
        self.lock().faults.refuse_bind = refuse;
    }

    pub fn refuse_consume(&self, refuse: bool) {
        self.lock().faults.refuse_consume = refuse;
    }

    pub fn fail_channel_close(&self, fail: bool) {
        self.lock().faults.fail_channel_close = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.lock().faults.fail_publish = fail;
    }

    /// Drop every open connection, as a broker restart or an idle timeout
    /// would. Streams opened on those connections end.
    pub fn sever_connections(&self) {
        let mut state = self.lock();
        for connection in &state.connections {
            connection.closed.store(true, Ordering::SeqCst);
        }
        state.connections.clear();
        state.release_closed_channels();
        tracing::debug!("memory broker severed all connections");
    }

    /// Route a message as if another client had published it.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: impl Into<Vec<u8>>) {
        let message = OutboundMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            mandatory: false,
            immediate: false,
            content_type: "application/json".to_string(),
            body: body.into(),
        };
        let acker = self.acker.clone();
        self.lock().route(message, acker);
    }

    pub fn dial_count(&self) -> usize {
        self.lock().dial_count
    }

    pub fn last_address(&self) -> Option<String> {
        self.lock().last_address.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.lock()
            .connections
            .iter()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.lock().published.clone()
    }

    /// Mandatory messages that matched no binding.
    pub fn returned(&self) -> Vec<OutboundMessage> {
        self.lock().returned.clone()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.lock().acked.clone()
    }

    pub fn unacked_count(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Routing keys of deliveries rejected without requeue.
    pub fn dead_letters(&self) -> Vec<String> {
        self.lock()
            .dead_letters
            .iter()
            .map(|d| d.routing_key.clone())
            .collect()
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn queue_options(&self, queue: &str) -> Option<QueueDeclareOptions> {
        self.lock().queues.get(queue).map(|q| q.options)
    }

    /// Messages waiting in `queue` for a consumer.
    pub fn backlog(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.backlog.len())
    }

    pub fn consumer_tags(&self, queue: &str) -> Vec<String> {
        self.lock().queues.get(queue).map_or_else(Vec::new, |q| {
            q.consumers.iter().map(|c| c.tag.clone()).collect()
        })
    }

    pub fn bindings(&self) -> Vec<Binding> {
        self.lock().bindings.clone()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn route(&mut self, message: OutboundMessage, acker: Arc<MemoryAcker>) {
        let targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| {
                b.exchange == message.exchange && topic::matches(&b.pattern, &message.routing_key)
            })
            .map(|b| b.queue.clone())
            .collect();

        if targets.is_empty() {
            tracing::debug!(routing_key = %message.routing_key, "no binding matched");
            if message.mandatory {
                self.returned.push(message);
            }
            return;
        }

        for queue in targets {
            let delivery = PendingDelivery {
                queue,
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                content_type: message.content_type.clone(),
                body: message.body.clone(),
                redelivered: false,
            };
            self.enqueue(delivery, acker.clone());
        }
    }

    /// Hand a delivery to the next live consumer of its queue, or park it
    /// in the backlog when there is none.
    fn enqueue(&mut self, delivery: PendingDelivery, acker: Arc<MemoryAcker>) {
        let Some(queue) = self.queues.get_mut(&delivery.queue) else {
            return;
        };

        while !queue.consumers.is_empty() {
            let index = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = index + 1;

            self.next_delivery_tag += 1;
            let tag = self.next_delivery_tag;
            let consumer = &queue.consumers[index];
            let message = InboundMessage::new(
                tag,
                delivery.exchange.clone(),
                delivery.routing_key.clone(),
                delivery.body.clone(),
                acker.clone(),
            )
            .with_content_type(delivery.content_type.clone())
            .with_redelivered(delivery.redelivered);

            match consumer.sender.send(message) {
                Ok(()) => {
                    let channel = consumer.channel.clone();
                    self.unacked.insert(tag, Unacked { delivery, channel });
                    return;
                }
                Err(_) => {
                    let gone = queue.consumers.remove(index);
                    tracing::debug!(consumer = %gone.tag, "dropping consumer with closed stream");
                }
            }
        }

        queue.backlog.push_back(delivery);
    }

    fn drain_backlog(&mut self, queue: &str, acker: Arc<MemoryAcker>) {
        let pending: Vec<PendingDelivery> = match self.queues.get_mut(queue) {
            Some(q) => q.backlog.drain(..).collect(),
            None => return,
        };
        for delivery in pending {
            self.enqueue(delivery, acker.clone());
        }
    }

    /// Drop consumers of closed channels and requeue what they left
    /// unacknowledged.
    fn release_closed_channels(&mut self) {
        for queue in self.queues.values_mut() {
            queue.consumers.retain(|c| c.channel.is_open());
        }

        let orphaned: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| !u.channel.is_open())
            .map(|(tag, _)| *tag)
            .collect();

        for tag in orphaned {
            if let Some(unacked) = self.unacked.remove(&tag) {
                let mut delivery = unacked.delivery;
                delivery.redelivered = true;
                if let Some(queue) = self.queues.get_mut(&delivery.queue) {
                    queue.backlog.push_back(delivery);
                }
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn dial(&self, address: &str) -> Result<Arc<dyn Connection>, TransportError> {
        let mut state = self.lock();
        state.dial_count += 1;
        state.last_address = Some(address.to_string());

        if state.faults.failing_dials > 0 {
            state.faults.failing_dials -= 1;
            return Err(TransportError::Io(format!("connection refused: {address}")));
        }

        let connection = Arc::new(ConnectionState {
            id: state.next_id(),
            closed: AtomicBool::new(false),
        });
        state.connections.push(connection.clone());

        Ok(Arc::new(MemoryConnection {
            broker: self.clone(),
            state: connection,
        }))
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    state: Arc<ConnectionState>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut state = self.broker.lock();
        if state.faults.refuse_channels {
            return Err(TransportError::Refused("channel limit reached".to_string()));
        }

        let channel = Arc::new(ChannelState {
            id: state.next_id(),
            connection: self.state.clone(),
            closed: AtomicBool::new(false),
        });

        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            state: channel,
        }))
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut state = self.broker.lock();
        let id = self.state.id;
        state.connections.retain(|c| c.id != id);
        state.release_closed_channels();
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryChannel {
    broker: MemoryBroker,
    state: Arc<ChannelState>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.state.connection.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if state.faults.refuse_declare {
            return Err(TransportError::Refused(format!("declare of {queue:?} refused")));
        }

        state.queues.entry(queue.to_string()).or_insert_with(|| Queue {
            options,
            ..Queue::default()
        });
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
        _options: QueueBindOptions,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if state.faults.refuse_bind {
            return Err(TransportError::Refused(format!("bind of {queue:?} refused")));
        }
        if !state.queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound(queue.to_string()));
        }

        let binding = Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        _options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, TransportError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel::<InboundMessage>();
        {
            let mut state = self.broker.lock();
            if state.faults.refuse_consume {
                return Err(TransportError::Refused(format!("consume on {queue:?} refused")));
            }
            let Some(q) = state.queues.get_mut(queue) else {
                return Err(TransportError::QueueNotFound(queue.to_string()));
            };
            q.consumers.push(ConsumerEntry {
                tag: consumer_tag.to_string(),
                channel: self.state.clone(),
                sender: tx,
            });
            state.drain_backlog(queue, self.broker.acker.clone());
        }

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if state.faults.fail_publish {
            return Err(TransportError::Refused("publish rejected".to_string()));
        }

        state.published.push(message.clone());
        state.route(message, self.broker.acker.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        if state.faults.fail_channel_close {
            return Err(TransportError::Refused("channel close refused".to_string()));
        }

        self.state.closed.store(true, Ordering::SeqCst);
        state.release_closed_channels();
        tracing::debug!(channel = self.state.id, "memory channel closed");
        Ok(())
    }
}

/// Settles deliveries against the broker's unacked table.
#[derive(Debug)]
pub struct MemoryAcker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryAcker {
    fn take(
        &self,
        delivery_tag: u64,
    ) -> Result<(MutexGuard<'_, BrokerState>, PendingDelivery), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let channel_open = state
            .unacked
            .get(&delivery_tag)
            .map(|u| u.channel.is_open())
            .ok_or(TransportError::UnknownDelivery(delivery_tag))?;
        if !channel_open {
            return Err(TransportError::ChannelClosed);
        }

        let unacked = state
            .unacked
            .remove(&delivery_tag)
            .ok_or(TransportError::UnknownDelivery(delivery_tag))?;
        Ok((state, unacked.delivery))
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, delivery_tag: u64, _multiple: bool) -> Result<(), TransportError> {
        let (mut state, _) = self.take(delivery_tag)?;
        state.acked.push(delivery_tag);
        Ok(())
    }

    async fn nack(
        &self,
        delivery_tag: u64,
        _multiple: bool,
        requeue: bool,
    ) -> Result<(), TransportError> {
        let (mut state, mut delivery) = self.take(delivery_tag)?;
        if requeue {
            delivery.redelivered = true;
            let acker = Arc::new(MemoryAcker {
                state: self.state.clone(),
            });
            state.enqueue(delivery, acker);
        } else {
            state.dead_letters.push(delivery);
        }
        Ok(())
    }
}
