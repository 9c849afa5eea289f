//! flowwatch Flow Aggregation Engine
//!
//! Turns a stream of decoded packet descriptors into one summarized
//! [`FlowEvent`] per flow lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     FLOW AGGREGATION ENGINE                         │
//! │                                                                     │
//! │   packet source                                                     │
//! │        │  BoundedQueue<PacketDescriptor> (blocks when full)         │
//! │        ▼                                                            │
//! │  ┌───────────────┐      ┌──────────────────────────┐               │
//! │  │ Ingest task   │─────▶│        FlowTable         │◀──── Janitor  │
//! │  └───────────────┘      │  Mutex<HashMap<Key,Rec>> │     (interval)│
//! │                         └────────────┬─────────────┘               │
//! │                                      │ finalize + remove            │
//! │                                      ▼                              │
//! │                              ┌───────────────┐                      │
//! │                              │   Finalizer   │                      │
//! │                              └───────┬───────┘                      │
//! │                                      │  try_push (never waits)      │
//! │                                      ▼                              │
//! │                      BoundedQueue<FlowEvent> ──▶ event sink         │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - One record per flow key; lookup, update, finalize and removal of a
//!   record happen under a single lock.
//! - Every flow lifecycle is emitted exactly once: on a TCP FIN/RST, on
//!   idle timeout, or (optionally) on the shutdown drain.

#![warn(missing_docs)]

pub mod direction;
pub mod engine;
pub mod event;
pub mod finalizer;
pub mod flow;
pub mod ingest;
pub mod janitor;
pub mod packet;
pub mod queue;
pub mod stats;
pub mod table;

use thiserror::Error;

pub use direction::LocalAddrs;
pub use engine::{EngineConfig, FlowEngine};
pub use event::FlowEvent;
pub use finalizer::{EmitResult, EndReason, EventEmitter, Finalizer, MemoryEmitter, QueueEmitter};
pub use flow::{Direction, FlowKey, FlowRecord, TransportProtocol};
pub use janitor::{CaptureTicks, Janitor, SweepClock};
pub use packet::{NetworkLayer, PacketDescriptor, TransportLayer};
pub use queue::{bounded, QueueError, QueueReceiver, QueueSender};
pub use stats::{FlowTableStats, FlowTableStatsSnapshot};
pub use table::{FlowTable, IdleTimeouts, IngestOutcome};

/// Default idle timeout for TCP flows (seconds)
pub const DEFAULT_TCP_IDLE_TIMEOUT_SECS: u64 = 60;

/// Default idle timeout for UDP flows (seconds)
pub const DEFAULT_UDP_IDLE_TIMEOUT_SECS: u64 = 30;

/// Default janitor sweep interval (seconds)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Default capacity of the packet and event queues
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Engine error types
#[derive(Debug, Error)]
pub enum FlowError {
    /// Invalid engine configuration
    #[error("config error: {0}")]
    Config(String),

    /// The other side of a queue is gone
    #[error("queue closed")]
    QueueClosed,

    /// A spawned engine task panicked or was aborted
    #[error("task failed: {0}")]
    TaskFailed(String),
}

/// Result type for engine operations
pub type FlowResult<T> = Result<T, FlowError>;
