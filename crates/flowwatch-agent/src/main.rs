//! flowwatch Agent - Main Entry Point

use anyhow::Context;
use clap::Parser;
use flowwatch_agent::{AgentConfig, Overrides, SinkKind, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flowwatch-agent")]
#[command(version)]
#[command(about = "Per-host network flow telemetry agent", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = "AGENT_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Capture interface
    #[arg(long, short, env = "AGENT_INTERFACE")]
    interface: Option<String>,

    /// Capture filter, e.g. "tcp or udp port 53"
    #[arg(long, short, env = "AGENT_BPF_FILTER")]
    filter: Option<String>,

    /// Bytes captured per frame
    #[arg(long, env = "AGENT_SNAP_LEN")]
    snap_len: Option<usize>,

    /// Put the interface in promiscuous mode
    #[arg(long, env = "AGENT_PROMISCUOUS")]
    promiscuous: Option<bool>,

    /// Collector URL
    #[arg(long, env = "AGENT_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Replay a pcap / pcapng file instead of capturing live
    #[arg(long, env = "AGENT_PCAP_FILE")]
    pcap_file: Option<PathBuf>,

    /// Event sink (http or stdout)
    #[arg(long, env = "AGENT_SINK")]
    sink: Option<SinkKind>,

    /// Print the merged configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            interface: self.interface.clone(),
            filter: self.filter.clone(),
            snap_len: self.snap_len,
            promiscuous: self.promiscuous,
            endpoint_url: self.endpoint_url.clone(),
            pcap_file: self.pcap_file.clone(),
            sink: self.sink,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::info!("flowwatch agent v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AgentConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    config.apply(cli.overrides());
    config.validate().context("invalid configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let summary = flowwatch_agent::run(config, shutdown_signal())
        .await
        .context("agent stopped with an error")?;

    tracing::info!(
        frames_read = summary.source.frames_read,
        frames_filtered = summary.source.frames_filtered,
        flows_created = summary.engine.flows_created,
        flows_finalized = summary.engine.flows_finalized(),
        events_dropped = summary.engine.events_dropped,
        events_delivered = summary.sink.delivered,
        events_failed = summary.sink.failed,
        events_lost = summary.events_lost(),
        "Shutdown complete"
    );
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
