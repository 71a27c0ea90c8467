//! Message-bus session handling: topic dispatch, last-will presence, and
//! reconnect backoff over a pluggable transport.
//!
//! The client is fail-fast: any transport error drops the session to
//! `Disconnected` and the caller decides when to `reconnect()`. Nothing here
//! retries on its own.

mod client;
mod topic;
mod transport;

pub use client::{BusClient, MessageHandler, SessionState};
pub use topic::topic_matches;
pub use transport::{
    BusTransport, InboundMessage, MemoryTransport, PublishRecord, SessionOptions, Will,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("handler error: {0}")]
    Handler(String),
}
