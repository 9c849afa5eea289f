//! Ingestion task
//!
//! Drains the packet queue into the flow table until every producer is gone.

use crate::janitor::CaptureTicks;
use crate::packet::PacketDescriptor;
use crate::queue::QueueReceiver;
use crate::table::{FlowTable, IngestOutcome};
use std::sync::Arc;

/// Consume descriptors until the queue closes; returns the number consumed
///
/// With `ticks`, every descriptor first advances the capture timeline so
/// idle flows are swept before a later packet can extend them.
pub async fn run_ingest(
    table: Arc<FlowTable>,
    mut packets: QueueReceiver<PacketDescriptor>,
    mut ticks: Option<CaptureTicks>,
) -> u64 {
    tracing::info!(capture_driven = ticks.is_some(), "Starting ingest");
    let mut consumed = 0u64;
    let mut terminated = 0u64;

    while let Some(packet) = packets.recv().await {
        consumed += 1;
        if let Some(ticks) = ticks.as_mut() {
            ticks.advance(packet.timestamp).await;
        }
        if table.ingest(&packet) == IngestOutcome::Terminated {
            terminated += 1;
        }
    }

    tracing::info!(consumed, terminated, "Packet queue closed, ingest finished");
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::LocalAddrs;
    use crate::finalizer::{Finalizer, MemoryEmitter};
    use crate::queue::bounded;
    use crate::table::IdleTimeouts;
    use chrono::Utc;

    #[tokio::test]
    async fn test_ingest_until_closed() {
        let emitter = Arc::new(MemoryEmitter::new());
        let finalizer = Finalizer::new("h", "eth0", emitter.clone());
        let table = Arc::new(FlowTable::new(Arc::new(LocalAddrs::new()), IdleTimeouts::default(), finalizer));

        let (tx, rx) = bounded(4);
        let task = tokio::spawn(run_ingest(table.clone(), rx, None));

        let src = "127.0.0.1:5555".parse().unwrap();
        let dst = "127.0.0.1:80".parse().unwrap();
        for _ in 0..9 {
            tx.send(PacketDescriptor::tcp(src, dst, 100, Utc::now())).await.unwrap();
        }
        tx.send(PacketDescriptor::tcp(src, dst, 40, Utc::now()).terminating(true))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(task.await.unwrap(), 10);
        assert!(table.is_empty());

        let events = emitter.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].packet_count, 10);
        assert_eq!(events[0].byte_count, 940);
        assert_eq!(events[0].direction.as_str(), "local");
    }
}
