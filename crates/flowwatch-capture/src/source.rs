//! Packet Source
//!
//! Blocking producers feeding the engine's packet queue.

use crate::filter::CaptureFilter;
use crate::CaptureError;
use flowwatch_core::{PacketDescriptor, QueueSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counts reported by a source when it stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSummary {
    /// Frames read from the device or file
    pub frames_read: u64,
    /// Descriptors handed to the packet queue
    pub frames_queued: u64,
    /// Descriptors rejected by the capture filter
    pub frames_filtered: u64,
}

/// A blocking packet producer
///
/// `run` is executed on the blocking thread pool. It returns when the input
/// is exhausted, when `cancel` fires, or when the packet queue is closed.
/// Dropping `queue` on return closes the packet queue for the engine.
pub trait PacketSource: Send + 'static {
    /// Human-readable origin, for logs
    fn describe(&self) -> String;

    /// Read, decode, filter and enqueue until done
    fn run(
        self: Box<Self>,
        queue: QueueSender<PacketDescriptor>,
        cancel: CancellationToken,
    ) -> Result<SourceSummary, CaptureError>;
}

/// Run `source` on the blocking pool
pub fn spawn_source(
    source: Box<dyn PacketSource>,
    queue: QueueSender<PacketDescriptor>,
    cancel: CancellationToken,
) -> JoinHandle<Result<SourceSummary, CaptureError>> {
    tracing::info!(source = %source.describe(), "Starting packet source");
    tokio::task::spawn_blocking(move || source.run(queue, cancel))
}

/// Filter-then-enqueue step shared by every source
pub(crate) struct Forwarder {
    filter: CaptureFilter,
    queue: QueueSender<PacketDescriptor>,
    summary: SourceSummary,
}

impl Forwarder {
    pub(crate) fn new(filter: CaptureFilter, queue: QueueSender<PacketDescriptor>) -> Self {
        Self {
            filter,
            queue,
            summary: SourceSummary::default(),
        }
    }

    /// Returns `false` once the queue is closed and the source should stop
    pub(crate) fn forward(&mut self, packet: PacketDescriptor) -> bool {
        self.summary.frames_read += 1;
        if !self.filter.matches(&packet) {
            self.summary.frames_filtered += 1;
            return true;
        }
        // Stalls while the queue is full
        match self.queue.blocking_send(packet) {
            Ok(()) => {
                self.summary.frames_queued += 1;
                true
            }
            Err(_) => {
                tracing::debug!("packet queue closed, stopping source");
                false
            }
        }
    }

    pub(crate) fn finish(self) -> SourceSummary {
        let summary = self.summary;
        tracing::info!(
            frames_read = summary.frames_read,
            frames_queued = summary.frames_queued,
            frames_filtered = summary.frames_filtered,
            "Packet source finished"
        );
        summary
    }
}
