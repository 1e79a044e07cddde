//! Error types for `brokerlink`.
//!
//! `TransportError` is what a broker protocol client reports through the
//! transport traits. `Error` is what the connection manager, publisher,
//! consumer and worker return to callers; every variant that wraps a
//! transport failure names the step that failed.

use thiserror::Error;

/// Failure reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection is closed")]
    ConnectionClosed,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("broker refused the request: {0}")]
    Refused(String),

    #[error("queue {0:?} not found")]
    QueueNotFound(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("i/o error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("error while dialing broker at {address:?}: {source}")]
    Connect {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("error while opening channel: {0}")]
    Channel(#[source] TransportError),

    #[error("link is not connected")]
    NotConnected,

    #[error("error while closing channel: {0}")]
    CloseChannel(#[source] TransportError),

    #[error("error while closing connection: {0}")]
    CloseConnection(#[source] TransportError),

    #[error("error while declaring queue {queue:?}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: TransportError,
    },

    #[error("error while binding queue {queue:?} to {pattern:?}: {source}")]
    Bind {
        queue: String,
        pattern: String,
        #[source]
        source: TransportError,
    },

    #[error("error while consuming from queue {queue:?}: {source}")]
    Consume {
        queue: String,
        #[source]
        source: TransportError,
    },

    #[error("error while marshalling JSON payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("error while reconnecting to broker: {0}")]
    Reconnect(#[source] Box<Error>),

    #[error("error while publishing to {exchange:?} with key {routing_key:?}: {source}")]
    Publish {
        exchange: String,
        routing_key: String,
        #[source]
        source: TransportError,
    },

    #[error("event {0:?} already exists")]
    DuplicateEvent(String),

    #[error("handlers can only be registered before the worker runs")]
    RegistrationClosed,

    #[error("worker is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("delivery {0} was already settled")]
    AlreadySettled(u64),

    #[error("error while settling delivery: {0}")]
    Ack(#[source] TransportError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
