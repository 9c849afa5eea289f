//! Flow Table
//!
//! Single authoritative map from [`FlowKey`] to [`FlowRecord`].
//!
//! # Design
//!
//! - One `parking_lot::Mutex` covers lookup, update, finalize and removal
//! - Finalization happens inside the critical section, so a flow can leave
//!   the table through exactly one path
//! - The finalizer never waits (see [`crate::finalizer::EventEmitter`])
//! - Counters live outside the lock in [`FlowTableStats`]

use crate::direction::LocalAddrs;
use crate::finalizer::{EmitResult, EndReason, Finalizer};
use crate::flow::{FlowKey, FlowRecord, TransportProtocol};
use crate::packet::PacketDescriptor;
use crate::stats::{FlowTableStats, FlowTableStatsSnapshot};
use crate::{DEFAULT_TCP_IDLE_TIMEOUT_SECS, DEFAULT_UDP_IDLE_TIMEOUT_SECS};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-protocol inactivity thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeouts {
    /// TCP idle timeout
    pub tcp: Duration,
    /// UDP idle timeout
    pub udp: Duration,
}

impl Default for IdleTimeouts {
    fn default() -> Self {
        Self {
            tcp: Duration::from_secs(DEFAULT_TCP_IDLE_TIMEOUT_SECS),
            udp: Duration::from_secs(DEFAULT_UDP_IDLE_TIMEOUT_SECS),
        }
    }
}

impl IdleTimeouts {
    /// Threshold for a protocol
    #[inline]
    pub fn for_protocol(&self, protocol: TransportProtocol) -> Duration {
        match protocol {
            TransportProtocol::Udp => self.udp,
            _ => self.tcp,
        }
    }
}

/// What [`FlowTable::ingest`] did with a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No tracked 5-tuple; dropped
    Untracked,
    /// First packet of a new flow
    Created,
    /// Existing flow updated
    Updated,
    /// Flow finalized by FIN/RST (possibly created by the same packet)
    Terminated,
}

struct TableState {
    flows: HashMap<FlowKey, FlowRecord>,
    /// Latest capture timestamp seen by ingest
    high_water: Option<DateTime<Utc>>,
}

/// Concurrent flow table
pub struct FlowTable {
    state: Mutex<TableState>,
    local_addrs: Arc<LocalAddrs>,
    timeouts: IdleTimeouts,
    finalizer: Finalizer,
    stats: FlowTableStats,
}

impl FlowTable {
    /// Create an empty table
    pub fn new(local_addrs: Arc<LocalAddrs>, timeouts: IdleTimeouts, finalizer: Finalizer) -> Self {
        Self {
            state: Mutex::new(TableState {
                flows: HashMap::new(),
                high_water: None,
            }),
            local_addrs,
            timeouts,
            finalizer,
            stats: FlowTableStats::default(),
        }
    }

    /// Account one packet
    pub fn ingest(&self, packet: &PacketDescriptor) -> IngestOutcome {
        let Some(key) = packet.flow_key() else {
            self.stats.record_untracked();
            return IngestOutcome::Untracked;
        };
        self.stats.record_packet(packet.length);

        let mut state = self.state.lock();
        if state.high_water.map_or(true, |hw| packet.timestamp > hw) {
            state.high_water = Some(packet.timestamp);
        }

        let outcome = match state.flows.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().update(packet.length, packet.timestamp);
                IngestOutcome::Updated
            }
            Entry::Vacant(entry) => {
                let direction = self.local_addrs.classify(&key.src_ip, &key.dst_ip);
                entry.insert(FlowRecord::new(key, direction, packet.length, packet.timestamp));
                self.stats.record_created();
                IngestOutcome::Created
            }
        };

        if !packet.is_terminating() {
            return outcome;
        }

        if let Some(record) = state.flows.remove(&key) {
            self.stats.record_terminated();
            self.finalize(&record, EndReason::Terminated);
        }
        IngestOutcome::Terminated
    }

    /// Evict every flow idle past its protocol threshold at `now`
    ///
    /// Returns the number of flows evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let before = state.flows.len();

        state.flows.retain(|_, record| {
            if !record.is_idle(now, self.timeouts.for_protocol(record.key.protocol)) {
                return true;
            }
            self.stats.record_expired();
            self.finalize(record, EndReason::IdleTimeout);
            false
        });

        let evicted = before - state.flows.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = state.flows.len(), "swept idle flows");
        }
        evicted
    }

    /// Finalize and remove every resident flow
    pub fn drain(&self) -> usize {
        let mut state = self.state.lock();
        let mut drained = 0;
        for (_, record) in state.flows.drain() {
            self.stats.record_drained();
            self.finalize(&record, EndReason::Shutdown);
            drained += 1;
        }
        drained
    }

    /// Copy of a resident record
    pub fn get(&self, key: &FlowKey) -> Option<FlowRecord> {
        self.state.lock().flows.get(key).cloned()
    }

    /// Resident flow count
    pub fn len(&self) -> usize {
        self.state.lock().flows.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latest capture timestamp ingested so far
    pub fn capture_clock(&self) -> Option<DateTime<Utc>> {
        self.state.lock().high_water
    }

    /// Configured thresholds
    pub fn timeouts(&self) -> IdleTimeouts {
        self.timeouts
    }

    /// Counter snapshot
    pub fn stats(&self) -> FlowTableStatsSnapshot {
        self.stats.snapshot()
    }

    #[inline]
    fn finalize(&self, record: &FlowRecord, reason: EndReason) {
        if self.finalizer.finalize(record, reason) == EmitResult::Dropped {
            self.stats.record_event_dropped();
        }
    }
}
