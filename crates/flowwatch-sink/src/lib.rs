//! flowwatch Event Sinks
//!
//! Delivery of finalized [`FlowEvent`]s: one HTTP POST per event, or one
//! JSON line per event on stdout. Failed deliveries are logged and dropped;
//! there is no retry.

#![warn(missing_docs)]

pub mod http;
pub mod stdout;
pub mod worker;

use async_trait::async_trait;
use flowwatch_core::FlowEvent;
use thiserror::Error;

pub use http::HttpSink;
pub use stdout::StdoutSink;
pub use worker::{SinkStats, SinkWorker};

/// Default per-request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Delivery error types
#[derive(Debug, Error)]
pub enum SinkError {
    /// Event could not be encoded
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Transport-level HTTP failure (connect, timeout, ...)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-2xx status
    #[error("endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Local write failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for finalized flow events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event
    async fn deliver(&self, event: &FlowEvent) -> Result<(), SinkError>;

    /// Sink name, for logs
    fn name(&self) -> &str;
}
