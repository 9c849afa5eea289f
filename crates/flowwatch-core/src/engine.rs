//! Flow Engine
//!
//! Owns the flow table and the two tasks that share it: ingest and the
//! janitor.

use crate::direction::LocalAddrs;
use crate::finalizer::Finalizer;
use crate::ingest::run_ingest;
use crate::janitor::{Janitor, SweepClock};
use crate::packet::PacketDescriptor;
use crate::queue::{bounded, QueueSender};
use crate::stats::FlowTableStatsSnapshot;
use crate::table::{FlowTable, IdleTimeouts};
use crate::{FlowError, FlowResult, DEFAULT_QUEUE_CAPACITY, DEFAULT_SWEEP_INTERVAL_SECS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Flow engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-protocol idle timeouts
    pub timeouts: IdleTimeouts,
    /// Janitor period
    pub sweep_interval: Duration,
    /// Packet queue capacity
    pub packet_queue_capacity: usize,
    /// Event queue capacity
    pub event_queue_capacity: usize,
    /// Emit resident flows on shutdown
    pub drain_on_shutdown: bool,
    /// Janitor time source
    pub sweep_clock: SweepClock,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeouts: IdleTimeouts::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            packet_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_on_shutdown: true,
            sweep_clock: SweepClock::Wall,
        }
    }
}

impl EngineConfig {
    /// Reject zero durations and capacities
    pub fn validate(&self) -> FlowResult<()> {
        if self.timeouts.tcp.is_zero() || self.timeouts.udp.is_zero() {
            return Err(FlowError::Config("idle timeouts must be non-zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(FlowError::Config("sweep interval must be non-zero".into()));
        }
        if self.packet_queue_capacity == 0 || self.event_queue_capacity == 0 {
            return Err(FlowError::Config("queue capacities must be non-zero".into()));
        }
        Ok(())
    }
}

/// Running flow engine
///
/// The event queue closes once the engine (and with it the table and its
/// finalizer) is dropped, so keep no extra clones of [`FlowEngine::table`]
/// past shutdown.
pub struct FlowEngine {
    config: EngineConfig,
    table: Arc<FlowTable>,
    cancel: CancellationToken,
    ingest: JoinHandle<u64>,
    janitor: JoinHandle<u64>,
}

impl FlowEngine {
    /// Spawn the ingest and janitor tasks on the current tokio runtime
    ///
    /// Returns the engine and the producer half of the packet queue. The
    /// packet source closes the queue by dropping every sender.
    pub fn start(
        config: EngineConfig,
        local_addrs: LocalAddrs,
        finalizer: Finalizer,
    ) -> FlowResult<(Self, QueueSender<PacketDescriptor>)> {
        config.validate()?;

        tracing::info!(
            local_addrs = local_addrs.len(),
            local_networks = local_addrs.networks().len(),
            tcp_timeout_secs = config.timeouts.tcp.as_secs(),
            udp_timeout_secs = config.timeouts.udp.as_secs(),
            "Starting flow engine"
        );

        let table = Arc::new(FlowTable::new(Arc::new(local_addrs), config.timeouts, finalizer));
        let (packets_tx, packets_rx) = bounded(config.packet_queue_capacity);
        let cancel = CancellationToken::new();

        let mut janitor = Janitor::new(table.clone(), config.sweep_interval, config.sweep_clock);
        let ticks = match config.sweep_clock {
            SweepClock::Capture => Some(janitor.capture_driven()),
            SweepClock::Wall => None,
        };
        let ingest = tokio::spawn(run_ingest(table.clone(), packets_rx, ticks));
        let janitor = janitor.spawn(cancel.child_token());

        Ok((
            Self {
                config,
                table,
                cancel,
                ingest,
                janitor,
            },
            packets_tx,
        ))
    }

    /// Shared flow table
    pub fn table(&self) -> &Arc<FlowTable> {
        &self.table
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wait for ingest to drain the packet queue, stop the janitor, then
    /// optionally flush resident flows
    ///
    /// Every [`QueueSender`] must be dropped first or this never returns.
    pub async fn shutdown(self) -> FlowResult<FlowTableStatsSnapshot> {
        tracing::info!("Shutting down flow engine");

        // Capture-driven sweeps need the janitor until ingest is done
        let consumed = self
            .ingest
            .await
            .map_err(|e| FlowError::TaskFailed(format!("ingest: {}", e)))?;

        self.cancel.cancel();
        self.janitor
            .await
            .map_err(|e| FlowError::TaskFailed(format!("janitor: {}", e)))?;

        if self.config.drain_on_shutdown {
            let drained = self.table.drain();
            tracing::info!(drained, "Drained resident flows");
        } else if !self.table.is_empty() {
            tracing::info!(discarded = self.table.len(), "Discarding resident flows");
        }

        let stats = self.table.stats();
        tracing::info!(
            consumed,
            flows_created = stats.flows_created,
            flows_finalized = stats.flows_finalized(),
            events_dropped = stats.events_dropped,
            "Flow engine stopped"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer::{MemoryEmitter, QueueEmitter};
    use chrono::{TimeZone, Utc};

    fn start(config: EngineConfig) -> (FlowEngine, QueueSender<PacketDescriptor>, Arc<MemoryEmitter>) {
        let emitter = Arc::new(MemoryEmitter::new());
        let finalizer = Finalizer::new("h", "eth0", emitter.clone());
        let (engine, tx) = FlowEngine::start(config, LocalAddrs::new(), finalizer).unwrap();
        (engine, tx, emitter)
    }

    async fn feed(tx: QueueSender<PacketDescriptor>, flows: u16) {
        for port in 0..flows {
            let src = std::net::SocketAddr::new("192.0.2.1".parse().unwrap(), 10_000 + port);
            tx.send(PacketDescriptor::udp(src, "192.0.2.2:53".parse().unwrap(), 80, Utc::now()))
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());

        let config = EngineConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FlowError::Config(_))));

        let config = EngineConfig {
            event_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_drains_resident_flows() {
        let (engine, tx, emitter) = start(EngineConfig::default());
        feed(tx, 5).await;

        let stats = engine.shutdown().await.unwrap();
        assert_eq!(stats.packets_seen, 5);
        assert_eq!(stats.flows_drained, 5);
        assert_eq!(emitter.len(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_without_drain() {
        let config = EngineConfig {
            drain_on_shutdown: false,
            ..Default::default()
        };
        let (engine, tx, emitter) = start(config);
        feed(tx, 5).await;

        let stats = engine.shutdown().await.unwrap();
        assert_eq!(stats.flows_created, 5);
        assert_eq!(stats.flows_drained, 0);
        assert!(emitter.is_empty());
    }

    #[tokio::test]
    async fn test_capture_clock_splits_flow_on_replay_gap() {
        let config = EngineConfig {
            sweep_clock: SweepClock::Capture,
            ..Default::default()
        };
        let (engine, tx, emitter) = start(config);

        let t0 = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let src = "1.2.3.4:5000".parse().unwrap();
        let dst = "9.9.9.9:53".parse().unwrap();
        tx.send(PacketDescriptor::udp(src, dst, 60, t0)).await.unwrap();
        tx.send(PacketDescriptor::udp(src, dst, 80, t0 + chrono::Duration::seconds(3600)))
            .await
            .unwrap();
        drop(tx);

        let stats = engine.shutdown().await.unwrap();
        assert_eq!(stats.flows_created, 2);
        assert_eq!(stats.flows_expired, 1);
        assert_eq!(stats.flows_drained, 1);

        let events = emitter.take();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.packet_count == 1 && e.flow_duration == 0.0));
        assert_eq!(events[0].byte_count, 60);
        assert_eq!(events[1].byte_count, 80);
    }

    #[tokio::test]
    async fn test_event_queue_closes_after_shutdown() {
        let (events_tx, mut events_rx) = bounded(16);
        let finalizer = Finalizer::new("h", "eth0", Arc::new(QueueEmitter::new(events_tx)));
        let (engine, tx) = FlowEngine::start(EngineConfig::default(), LocalAddrs::new(), finalizer).unwrap();

        feed(tx, 3).await;
        engine.shutdown().await.unwrap();

        let mut received = 0;
        while events_rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 3);
    }
}
