//! Sink Worker
//!
//! Drains the event queue into an [`EventSink`] until the queue closes.

use crate::{EventSink, SinkError};
use flowwatch_core::{FlowEvent, QueueReceiver};
use serde::Serialize;
use std::sync::Arc;

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    /// Events accepted by the sink
    pub delivered: u64,
    /// Events dropped after a failed delivery
    pub failed: u64,
}

/// Event queue consumer
pub struct SinkWorker {
    sink: Arc<dyn EventSink>,
}

impl SinkWorker {
    /// Create worker delivering to `sink`
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Deliver events in order until every producer is gone
    pub async fn run(self, mut events: QueueReceiver<FlowEvent>) -> SinkStats {
        tracing::info!(sink = self.sink.name(), "Starting sink worker");
        let mut stats = SinkStats::default();

        while let Some(event) = events.recv().await {
            match self.sink.deliver(&event).await {
                Ok(()) => {
                    stats.delivered += 1;
                    tracing::trace!(flow_id = %event.flow_id, "event delivered");
                }
                Err(SinkError::Status { status, body }) => {
                    stats.failed += 1;
                    tracing::warn!(flow_id = %event.flow_id, status, %body, "endpoint rejected flow event");
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(flow_id = %event.flow_id, error = %e, "failed to deliver flow event");
                }
            }
        }

        tracing::info!(
            sink = self.sink.name(),
            delivered = stats.delivered,
            failed = stats.failed,
            "Event queue closed, sink worker finished"
        );
        stats
    }
}
