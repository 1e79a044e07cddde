//! Worker
//!
//! A `Worker` consumes one queue and routes every delivery to the handler
//! registered for its event key, acknowledging the delivery only when the
//! handler reports success.
//!
//! Lifecycle: `Created` → `Bound` (after `bind`) → `Running` (inside `run`)
//! → `Stopped` (the delivery stream ended or shutdown was requested).
//! A stopped worker runs again only after a fresh `bind`. Handlers can be
//! added while `Created` or `Bound`; the table is frozen once the worker
//! has run.
//!
//! Concurrency notes:
//! - `DispatchMode::Sequential` handles and acknowledges deliveries one at a
//!   time, in delivery order.
//! - `DispatchMode::Concurrent` runs each delivery in its own task, with at
//!   most `max_in_flight` handlers running at once (clamped to
//!   `1..=Semaphore::MAX_PERMITS`). Completion and
//!   acknowledgement order are not guaranteed.
//! - Tasks share nothing mutable: only the frozen `EventTable` and the key
//!   strategy, both behind `Arc`.
//! - In both modes each dispatch runs in a spawned task, so a panicking
//!   handler is counted as `failed` and leaves its delivery unacknowledged.

use std::fmt;
use std::future::{self, Future};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::events::{EventTable, Handler, KeyStrategy, LastSegment};
use crate::client::{Client, Publisher};
use crate::config::{LinkConfig, WorkerSettings};
use crate::transport::{DeliveryStream, InboundMessage, Transport};
use crate::utils::{Error, Result};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Bound,
    Running,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Created => "created",
            WorkerState::Bound => "bound",
            WorkerState::Running => "running",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Sequential,
    Concurrent { max_in_flight: usize },
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Concurrent {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// What happens to a delivery whose event has no handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnroutablePolicy {
    /// Log and leave it unacknowledged.
    #[default]
    Drop,
    /// Log and nack it without requeue, so the broker can dead-letter it.
    Reject,
}

/// Result of dispatching one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    /// The handler returned `false`.
    Withheld,
    Unroutable,
    /// The handler succeeded but the ack did not go through, or the handler
    /// task panicked.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub delivered: usize,
    pub acked: usize,
    pub withheld: usize,
    pub unroutable: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Acked => self.acked += 1,
            Outcome::Withheld => self.withheld += 1,
            Outcome::Unroutable => self.unroutable += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

/// The read-only part of a worker handed to every dispatch.
struct Router {
    events: EventTable,
    strategy: Arc<dyn KeyStrategy>,
    unroutable: UnroutablePolicy,
}

impl Router {
    async fn dispatch(&self, message: InboundMessage) -> Outcome {
        let event = self.strategy.event_key(&message.routing_key);

        let Some(handler) = self.events.get(event) else {
            return self.unroutable(&message, event).await;
        };

        if !handler.handle(&message).await {
            debug!(event, tag = message.delivery_tag, "handler declined, not acknowledging");
            return Outcome::Withheld;
        }

        match message.ack().await {
            Ok(()) => {
                debug!(event, tag = message.delivery_tag, "acknowledged");
                Outcome::Acked
            }
            Err(e) => {
                error!(event, tag = message.delivery_tag, "error while acknowledging: {e}");
                Outcome::Failed
            }
        }
    }

    async fn unroutable(&self, message: &InboundMessage, event: &str) -> Outcome {
        match self.unroutable {
            UnroutablePolicy::Drop => {
                warn!(
                    routing_key = %message.routing_key,
                    event,
                    "no handler registered, dropping message"
                );
            }
            UnroutablePolicy::Reject => {
                warn!(
                    routing_key = %message.routing_key,
                    event,
                    "no handler registered, rejecting message"
                );
                if let Err(e) = message.nack(false).await {
                    error!(tag = message.delivery_tag, "error while rejecting: {e}");
                }
            }
        }
        Outcome::Unroutable
    }
}

pub struct Worker {
    client: Client,
    events: EventTable,
    strategy: Arc<dyn KeyStrategy>,
    mode: DispatchMode,
    unroutable: UnroutablePolicy,
    state: WorkerState,
    deliveries: Option<DeliveryStream>,
}

impl Worker {
    /// A worker over an existing client. The client's link is not started.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            events: EventTable::new(),
            strategy: Arc::new(LastSegment),
            mode: DispatchMode::default(),
            unroutable: UnroutablePolicy::default(),
            state: WorkerState::Created,
            deliveries: None,
        }
    }

    /// Build a client for `config` and start its link.
    pub async fn connect(config: LinkConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let client = Client::new(config, transport);
        client.start().await?;
        Ok(Self::new(client))
    }

    pub fn with_strategy(mut self, strategy: impl KeyStrategy) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_unroutable_policy(mut self, policy: UnroutablePolicy) -> Self {
        self.unroutable = policy;
        self
    }

    /// Apply the dispatch settings from configuration.
    pub fn with_settings(self, settings: &WorkerSettings) -> Self {
        let mode = if settings.sequential {
            DispatchMode::Sequential
        } else {
            DispatchMode::Concurrent {
                max_in_flight: settings.max_in_flight,
            }
        };
        let policy = if settings.reject_unroutable {
            UnroutablePolicy::Reject
        } else {
            UnroutablePolicy::Drop
        };
        self.with_mode(mode).with_unroutable_policy(policy)
    }

    pub fn add_handler(&mut self, event: impl Into<String>, handler: impl Handler) -> Result<()> {
        match self.state {
            WorkerState::Created | WorkerState::Bound => {
                self.events.insert(event, Arc::new(handler))
            }
            WorkerState::Running | WorkerState::Stopped => Err(Error::RegistrationClosed),
        }
    }

    /// Declare `queue`, bind it to `topic_pattern` and open its delivery
    /// stream. A bound worker holds a live consumer, so it must run (or be
    /// dropped) before it can bind again.
    pub async fn bind(&mut self, queue: &str, topic_pattern: &str) -> Result<()> {
        match self.state {
            WorkerState::Created | WorkerState::Stopped => {}
            WorkerState::Bound | WorkerState::Running => {
                return Err(Error::InvalidState {
                    expected: "created or stopped",
                    actual: self.state.as_str(),
                });
            }
        }

        let deliveries = self.client.bind(queue, topic_pattern).await?;
        self.deliveries = Some(deliveries);
        self.state = WorkerState::Bound;
        Ok(())
    }

    /// Dispatch deliveries until the stream ends.
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.run_until(future::pending::<()>()).await
    }

    /// Dispatch deliveries until the stream ends or `shutdown` resolves.
    ///
    /// On shutdown no further delivery is drawn, in-flight handlers are
    /// awaited, and the link is closed. A failed close is logged; the
    /// summary is returned either way.
    pub async fn run_until<S>(&mut self, shutdown: S) -> Result<RunSummary>
    where
        S: Future<Output = ()>,
    {
        let deliveries = match self.state {
            WorkerState::Bound => self.deliveries.take(),
            _ => None,
        };
        let Some(mut deliveries) = deliveries else {
            return Err(Error::InvalidState {
                expected: WorkerState::Bound.as_str(),
                actual: self.state.as_str(),
            });
        };

        self.state = WorkerState::Running;
        let router = Arc::new(Router {
            events: self.events.clone(),
            strategy: self.strategy.clone(),
            unroutable: self.unroutable,
        });
        info!(mode = ?self.mode, events = router.events.len(), "worker running");

        tokio::pin!(shutdown);
        let (summary, interrupted) = match self.mode {
            DispatchMode::Sequential => {
                Self::run_sequential(&router, &mut deliveries, shutdown.as_mut()).await
            }
            DispatchMode::Concurrent { max_in_flight } => {
                Self::run_concurrent(&router, &mut deliveries, shutdown.as_mut(), max_in_flight)
                    .await
            }
        };

        self.state = WorkerState::Stopped;
        info!(?summary, interrupted, "worker stopped");

        if interrupted {
            if let Err(e) = self.client.close().await {
                warn!("error while closing link after shutdown: {e}");
            }
        }
        Ok(summary)
    }

    async fn run_sequential<S>(
        router: &Arc<Router>,
        deliveries: &mut DeliveryStream,
        mut shutdown: std::pin::Pin<&mut S>,
    ) -> (RunSummary, bool)
    where
        S: Future<Output = ()>,
    {
        let mut summary = RunSummary::default();
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.as_mut() => return (summary, true),
                next = deliveries.next() => match next {
                    Some(message) => message,
                    None => return (summary, false),
                },
            };
            summary.delivered += 1;
            // awaited in place; a panic surfaces as a JoinError
            let router = router.clone();
            let joined = tokio::spawn(async move { router.dispatch(message).await }).await;
            record_task(&mut summary, joined);
        }
    }

    async fn run_concurrent<S>(
        router: &Arc<Router>,
        deliveries: &mut DeliveryStream,
        mut shutdown: std::pin::Pin<&mut S>,
        max_in_flight: usize,
    ) -> (RunSummary, bool)
    where
        S: Future<Output = ()>,
    {
        let permits = Arc::new(Semaphore::new(max_in_flight.clamp(1, Semaphore::MAX_PERMITS)));
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut interrupted = false;

        loop {
            while let Some(joined) = tasks.try_join_next() {
                record_task(&mut summary, joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    interrupted = true;
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let message = tokio::select! {
                biased;
                _ = shutdown.as_mut() => {
                    interrupted = true;
                    break;
                }
                next = deliveries.next() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            summary.delivered += 1;
            let router = router.clone();
            tasks.spawn(async move {
                let outcome = router.dispatch(message).await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            record_task(&mut summary, joined);
        }
        (summary, interrupted)
    }

    pub async fn close(&self) -> Result<()> {
        self.client.close().await
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn events(&self) -> &EventTable {
        &self.events
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn publisher(&self) -> &Publisher {
        self.client.publisher()
    }
}

fn record_task(summary: &mut RunSummary, joined: Result<Outcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => summary.record(outcome),
        Err(e) => {
            error!("handler task failed: {e}");
            summary.record(Outcome::Failed);
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("unroutable", &self.unroutable)
            .field("events", &self.events)
            .finish()
    }
}
