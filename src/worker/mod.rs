//! The `worker` module routes consumed deliveries to event handlers.
//!
//! - `events`: the `Handler` and `KeyStrategy` traits and the `EventTable`.
//! - `worker`: the `Worker` state machine and its dispatch loop.

pub mod events;
#[allow(clippy::module_inception)]
pub mod worker;

pub use events::{
    AsyncHandler, EventTable, FirstSegment, FullKey, Handler, KeyStrategy, LastSegment,
    async_handler,
};
pub use worker::{DispatchMode, Outcome, RunSummary, UnroutablePolicy, Worker, WorkerState};
