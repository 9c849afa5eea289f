//! Pipeline
//!
//! Wires source → packet queue → engine → event queue → sink, and runs the
//! ordered shutdown when the source ends or `shutdown` resolves.

use crate::config::{AgentConfig, SinkKind};
use crate::{host, AgentError};
use flowwatch_capture::{spawn_source, LiveSource, PacketSource, PcapFileSource, SourceSummary};
use flowwatch_core::{bounded, Finalizer, FlowEngine, FlowTableStatsSnapshot, QueueEmitter};
use flowwatch_sink::{EventSink, HttpSink, SinkStats, SinkWorker, StdoutSink};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Final counters of one agent run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    /// Packet source
    pub source: SourceSummary,
    /// Flow table
    pub engine: FlowTableStatsSnapshot,
    /// Event delivery
    pub sink: SinkStats,
}

impl RunSummary {
    /// Finalized flows that never reached the collector: dropped on a full
    /// event queue plus failed deliveries
    pub fn events_lost(&self) -> u64 {
        self.engine.events_dropped + self.sink.failed
    }
}

/// Build the configured sink
pub fn build_sink(config: &AgentConfig) -> Result<Arc<dyn EventSink>, AgentError> {
    Ok(match config.sink.kind {
        SinkKind::Http => Arc::new(HttpSink::new(
            config.sink.endpoint_url.clone(),
            Duration::from_secs(config.sink.request_timeout_secs),
        )?),
        SinkKind::Stdout => Arc::new(StdoutSink::new()),
    })
}

/// Build the configured packet source
pub fn build_source(config: &AgentConfig) -> Result<Box<dyn PacketSource>, AgentError> {
    let filter = config.capture_filter()?;
    Ok(match &config.capture.pcap_file {
        Some(path) => Box::new(PcapFileSource::new(path, filter)),
        None => Box::new(LiveSource::new(
            config.capture.interface.clone(),
            config.capture.snap_len,
            config.capture.promiscuous,
            filter,
        )),
    })
}

/// Run with the configured sink
pub async fn run(config: AgentConfig, shutdown: impl Future<Output = ()>) -> Result<RunSummary, AgentError> {
    config.validate()?;
    let sink = build_sink(&config)?;
    run_with_sink(config, sink, shutdown).await
}

/// Run until the source ends or `shutdown` resolves
pub async fn run_with_sink(
    config: AgentConfig,
    sink: Arc<dyn EventSink>,
    shutdown: impl Future<Output = ()>,
) -> Result<RunSummary, AgentError> {
    let engine_config = config.engine_config();
    let hostname = host::hostname();
    let local_addrs = host::discover_local_addrs(config.local_networks()?);
    let source = build_source(&config)?;

    tracing::info!(
        hostname = %hostname,
        interface = %config.capture.interface,
        sink = sink.name(),
        "Starting pipeline"
    );

    let (events_tx, events_rx) = bounded(engine_config.event_queue_capacity);
    let sink_task = tokio::spawn(SinkWorker::new(sink).run(events_rx));

    let finalizer = Finalizer::new(
        hostname,
        config.capture.interface.clone(),
        Arc::new(QueueEmitter::new(events_tx)),
    );
    let (engine, packets_tx) = FlowEngine::start(engine_config, local_addrs, finalizer)?;

    let cancel = CancellationToken::new();
    let mut source_task = spawn_source(source, packets_tx, cancel.clone());

    tokio::pin!(shutdown);
    let source_result = tokio::select! {
        result = &mut source_task => result,
        _ = &mut shutdown => {
            tracing::info!("Shutdown requested, stopping packet source");
            cancel.cancel();
            source_task.await
        }
    };

    let source_result = source_result.map_err(|e| AgentError::Task(format!("packet source: {}", e)))?;
    if let Err(e) = &source_result {
        tracing::error!(error = %e, "Packet source failed");
    }

    // The source has dropped its sender, so ingest finishes once the
    // queue is drained.
    let engine_stats = engine.shutdown().await?;
    let sink_stats = sink_task
        .await
        .map_err(|e| AgentError::Task(format!("sink worker: {}", e)))?;

    let summary = RunSummary {
        source: source_result?,
        engine: engine_stats,
        sink: sink_stats,
    };
    tracing::info!(
        frames_read = summary.source.frames_read,
        flows = summary.engine.flows_created,
        events_delivered = summary.sink.delivered,
        events_failed = summary.sink.failed,
        events_dropped = summary.engine.events_dropped,
        "Pipeline stopped"
    );
    if summary.engine.events_dropped > 0 {
        tracing::warn!(
            events_dropped = summary.engine.events_dropped,
            "Flow events were lost because the event queue was full; raise flow.event_queue_capacity"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowwatch_core::FlowEvent;
    use flowwatch_sink::SinkError;
    use parking_lot::Mutex;
    use std::io::Write;

    #[derive(Default)]
    struct Collect(Mutex<Vec<FlowEvent>>);

    #[async_trait]
    impl EventSink for Collect {
        async fn deliver(&self, event: &FlowEvent) -> Result<(), SinkError> {
            self.0.lock().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "collect"
        }
    }

    fn ipv4_frame(protocol: u8, src: [u8; 4], dst: [u8; 4], l4: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[0x45, 0]);
        frame.extend_from_slice(&((20 + l4.len()) as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0, 64, protocol, 0, 0]);
        frame.extend_from_slice(&src);
        frame.extend_from_slice(&dst);
        frame.extend_from_slice(l4);
        frame
    }

    fn udp(sport: u16, dport: u16) -> Vec<u8> {
        let mut h = sport.to_be_bytes().to_vec();
        h.extend_from_slice(&dport.to_be_bytes());
        h.extend_from_slice(&[0, 8, 0, 0]);
        h
    }

    fn tcp(sport: u16, dport: u16, flags: u8) -> Vec<u8> {
        let mut h = sport.to_be_bytes().to_vec();
        h.extend_from_slice(&dport.to_be_bytes());
        h.extend_from_slice(&[0; 8]);
        h.extend_from_slice(&[0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
        h
    }

    fn write_pcap(frames: &[(u32, Vec<u8>)]) -> tempfile::NamedTempFile {
        let mut bytes = Vec::new();
        for word in [0xa1b2_c3d4u32, 0x0004_0002, 0, 0, 65535, 1] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        for (sec, frame) in frames {
            for word in [*sec, 0, frame.len() as u32, frame.len() as u32] {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
            bytes.extend_from_slice(frame);
        }
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file
    }

    #[tokio::test]
    async fn test_pcap_replay_end_to_end() {
        let pcap = write_pcap(&[
            (100, ipv4_frame(17, [1, 2, 3, 4], [9, 9, 9, 9], &udp(5000, 53))),
            (102, ipv4_frame(17, [1, 2, 3, 4], [9, 9, 9, 9], &udp(5000, 53))),
            (103, ipv4_frame(6, [127, 0, 0, 1], [127, 0, 0, 1], &tcp(40000, 80, 0x02))),
            (104, ipv4_frame(6, [127, 0, 0, 1], [127, 0, 0, 1], &tcp(40000, 80, 0x11))),
            // ICMP is filtered out
            (105, ipv4_frame(1, [1, 2, 3, 4], [9, 9, 9, 9], &[8, 0, 0, 0, 0, 0, 0, 0])),
        ]);

        let mut config = AgentConfig::default();
        config.capture.interface = "replay0".into();
        config.capture.pcap_file = Some(pcap.path().to_path_buf());
        config.sink.kind = SinkKind::Stdout;
        config.validate().unwrap();

        let sink = Arc::new(Collect::default());
        let summary = tokio_test::assert_ok!(run_with_sink(config, sink.clone(), std::future::pending()).await);

        assert_eq!(summary.source.frames_read, 5);
        assert_eq!(summary.source.frames_filtered, 1);
        assert_eq!(summary.engine.packets_seen, 4);
        assert_eq!(summary.engine.flows_terminated, 1);
        assert_eq!(summary.engine.flows_drained, 1);
        assert_eq!(summary.sink.delivered, 2);

        let events = sink.0.lock();
        let tcp_event = events.iter().find(|e| e.dst_port == 80).unwrap();
        assert_eq!(tcp_event.direction.as_str(), "local");
        assert_eq!(tcp_event.packet_count, 2);
        assert_eq!(tcp_event.interface, "replay0");

        let udp_event = events.iter().find(|e| e.dst_port == 53).unwrap();
        assert_eq!(udp_event.packet_count, 2);
        assert!((udp_event.flow_duration - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_replay_ages_flows_by_capture_time() {
        let dns = || ipv4_frame(17, [1, 2, 3, 4], [9, 9, 9, 9], &udp(5000, 53));
        let pcap = write_pcap(&[(100, dns()), (3700, dns())]);

        let mut config = AgentConfig::default();
        config.capture.pcap_file = Some(pcap.path().to_path_buf());

        let sink = Arc::new(Collect::default());
        let summary = tokio_test::assert_ok!(run_with_sink(config, sink.clone(), std::future::pending()).await);

        assert_eq!(summary.engine.flows_created, 2);
        assert_eq!(summary.engine.flows_expired, 1);
        assert_eq!(summary.engine.flows_drained, 1);

        let events = sink.0.lock();
        assert_eq!(events.len(), 2);
        for event in events.iter() {
            assert_eq!(event.packet_count, 1);
            assert_eq!(event.flow_duration, 0.0);
        }
        assert!(events[0].timestamp < events[1].timestamp);
    }

    #[test]
    fn test_events_lost_counts_queue_drops_and_failures() {
        let mut summary = RunSummary::default();
        assert_eq!(summary.events_lost(), 0);

        summary.engine.events_dropped = 3;
        summary.sink = SinkStats { delivered: 10, failed: 2 };
        assert_eq!(summary.events_lost(), 5);
    }

    #[tokio::test]
    async fn test_missing_pcap_fails_after_clean_shutdown() {
        let mut config = AgentConfig::default();
        config.capture.pcap_file = Some("/nonexistent/trace.pcap".into());

        let sink = Arc::new(Collect::default());
        let result = run_with_sink(config, sink, std::future::pending()).await;
        assert!(matches!(result, Err(AgentError::Capture(_))));
    }
}
