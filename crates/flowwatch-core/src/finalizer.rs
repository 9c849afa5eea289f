//! Finalizer
//!
//! Turns a removed [`FlowRecord`] into a [`FlowEvent`] and hands it to the
//! event sink. Called with the flow table lock held, so emitters must never
//! wait.

use crate::event::FlowEvent;
use crate::flow::FlowRecord;
use crate::queue::{QueueError, QueueSender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Why a flow was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// TCP FIN or RST
    Terminated,
    /// Idle past its protocol timeout
    IdleTimeout,
    /// Drained at engine shutdown
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => write!(f, "terminated"),
            Self::IdleTimeout => write!(f, "idle_timeout"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Outcome of handing an event to an emitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitResult {
    /// Event accepted for delivery
    Accepted,
    /// Event discarded
    Dropped,
}

/// Non-blocking handoff to the event sink
pub trait EventEmitter: Send + Sync {
    /// Hand over one event; must return without waiting
    fn emit(&self, event: FlowEvent) -> EmitResult;
}

/// Emitter feeding the bounded event queue
pub struct QueueEmitter {
    queue: QueueSender<FlowEvent>,
    dropped: AtomicU64,
}

impl QueueEmitter {
    /// Wrap the producer half of the event queue
    pub fn new(queue: QueueSender<FlowEvent>) -> Self {
        Self {
            queue,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events refused so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventEmitter for QueueEmitter {
    fn emit(&self, event: FlowEvent) -> EmitResult {
        match self.queue.try_push(event) {
            Ok(()) => EmitResult::Accepted,
            Err(QueueError::Full(event)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total == 1 || total % 1000 == 0 {
                    tracing::warn!(
                        flow_id = %event.flow_id,
                        dropped_total = total,
                        "event queue full, dropping flow event"
                    );
                }
                EmitResult::Dropped
            }
            Err(QueueError::Closed(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(flow_id = %event.flow_id, "event queue closed, dropping flow event");
                EmitResult::Dropped
            }
        }
    }
}

/// Emitter that keeps every event in memory
///
/// For embedding callers that poll events themselves, and for tests.
#[derive(Default)]
pub struct MemoryEmitter {
    events: Mutex<Vec<FlowEvent>>,
}

impl MemoryEmitter {
    /// Create empty emitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all events collected so far
    pub fn take(&self) -> Vec<FlowEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of events held
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no events are held
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventEmitter for MemoryEmitter {
    fn emit(&self, event: FlowEvent) -> EmitResult {
        self.events.lock().push(event);
        EmitResult::Accepted
    }
}

/// Record-to-event conversion plus handoff
pub struct Finalizer {
    hostname: String,
    interface: String,
    emitter: Arc<dyn EventEmitter>,
}

impl Finalizer {
    /// Create finalizer stamping events with `hostname` and `interface`
    pub fn new(
        hostname: impl Into<String>,
        interface: impl Into<String>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            interface: interface.into(),
            emitter,
        }
    }

    /// Emit the event for a record that has just left the table
    pub fn finalize(&self, record: &FlowRecord, reason: EndReason) -> EmitResult {
        let event = FlowEvent::from_record(record, &self.interface, &self.hostname);
        tracing::debug!(
            flow_id = %event.flow_id,
            %reason,
            packets = event.packet_count,
            bytes = event.byte_count,
            "finalizing flow"
        );
        self.emitter.emit(event)
    }

    /// Hostname stamped on events
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Interface stamped on events
    pub fn interface(&self) -> &str {
        &self.interface
    }
}
