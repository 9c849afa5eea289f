//! flowwatch Agent
//!
//! Host agent that captures packets on one interface (or replays a pcap
//! file), aggregates them into flows and ships one JSON event per flow to
//! a collector.
//!
//! ```text
//!   LiveSource / PcapFileSource ──▶ FlowEngine ──▶ SinkWorker ──▶ HTTP / stdout
//! ```
//!
//! # Lost events
//!
//! The final `Shutdown complete` log line reports two ways a finalized flow
//! can miss the collector:
//!
//! - `events_dropped`: the event queue was full when the flow was
//!   finalized. The flow table never waits on the sink, so a slow collector
//!   costs events here. Raise `flow.event_queue_capacity` if it is non-zero.
//! - `events_failed`: the sink rejected or could not deliver the event.
//!   There is no retry.
//!
//! `events_lost` is their sum ([`RunSummary::events_lost`]).

#![warn(missing_docs)]

pub mod config;
pub mod host;
pub mod pipeline;

use flowwatch_capture::CaptureError;
use flowwatch_core::FlowError;
use flowwatch_sink::SinkError;
use thiserror::Error;

pub use config::{AgentConfig, Overrides, SinkKind};
pub use pipeline::{run, run_with_sink, RunSummary};

/// Default location of the agent configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/flowwatch/agent.json";

/// Agent error types
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),

    /// Config file I/O
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed config file
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Flow engine failure
    #[error("engine error: {0}")]
    Engine(#[from] FlowError),

    /// Packet source failure
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Sink construction failure
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// A pipeline task panicked
    #[error("task failed: {0}")]
    Task(String),
}
