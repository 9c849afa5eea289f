//! Flow Table Statistics
//!
//! Lock-free counters updated from the ingest path, the janitor and the
//! finalizer.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Flow table counters
#[derive(Debug, Default)]
pub struct FlowTableStats {
    pub(crate) packets_seen: AtomicU64,
    pub(crate) packets_untracked: AtomicU64,
    pub(crate) bytes_seen: AtomicU64,
    pub(crate) flows_created: AtomicU64,
    pub(crate) flows_terminated: AtomicU64,
    pub(crate) flows_expired: AtomicU64,
    pub(crate) flows_drained: AtomicU64,
    pub(crate) events_dropped: AtomicU64,
}

impl FlowTableStats {
    #[inline(always)]
    pub(crate) fn record_packet(&self, bytes: u32) {
        self.packets_seen.fetch_add(1, Ordering::Relaxed);
        self.bytes_seen.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_untracked(&self) {
        self.packets_untracked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_created(&self) {
        self.flows_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_terminated(&self) {
        self.flows_terminated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_expired(&self) {
        self.flows_expired.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_drained(&self) {
        self.flows_drained.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> FlowTableStatsSnapshot {
        FlowTableStatsSnapshot {
            packets_seen: self.packets_seen.load(Ordering::Relaxed),
            packets_untracked: self.packets_untracked.load(Ordering::Relaxed),
            bytes_seen: self.bytes_seen.load(Ordering::Relaxed),
            flows_created: self.flows_created.load(Ordering::Relaxed),
            flows_terminated: self.flows_terminated.load(Ordering::Relaxed),
            flows_expired: self.flows_expired.load(Ordering::Relaxed),
            flows_drained: self.flows_drained.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowTableStatsSnapshot {
    /// Tracked packets ingested
    pub packets_seen: u64,
    /// Packets dropped for lacking a tracked 5-tuple
    pub packets_untracked: u64,
    /// Bytes of tracked packets
    pub bytes_seen: u64,
    /// Records created
    pub flows_created: u64,
    /// Records finalized by FIN/RST
    pub flows_terminated: u64,
    /// Records finalized by idle timeout
    pub flows_expired: u64,
    /// Records finalized by the shutdown drain
    pub flows_drained: u64,
    /// Events the event queue refused
    pub events_dropped: u64,
}

impl FlowTableStatsSnapshot {
    /// Records finalized by any path
    pub fn flows_finalized(&self) -> u64 {
        self.flows_terminated + self.flows_expired + self.flows_drained
    }

    /// Records still resident (created minus finalized)
    pub fn flows_active(&self) -> u64 {
        self.flows_created.saturating_sub(self.flows_finalized())
    }
}
