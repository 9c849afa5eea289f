//! Agent Configuration
//!
//! Defaults, then the JSON file, then command-line/environment overrides.

use crate::AgentError;
use flowwatch_capture::CaptureFilter;
use flowwatch_core::{EngineConfig, IdleTimeouts, LocalAddrs, SweepClock};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Packet source settings
    pub capture: CaptureConfig,
    /// Flow engine settings
    pub flow: FlowConfig,
    /// Event delivery settings
    pub sink: SinkConfig,
}

/// Packet source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface to capture on (also stamped on every event)
    pub interface: String,
    /// Capture filter expression
    pub filter: String,
    /// Bytes captured per frame
    pub snap_len: usize,
    /// Put the interface into promiscuous mode
    pub promiscuous: bool,
    /// Replay this file instead of capturing live
    pub pcap_file: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".into(),
            filter: "tcp or udp".into(),
            snap_len: 1024,
            promiscuous: true,
            pcap_file: None,
        }
    }
}

/// Flow engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// TCP idle timeout
    pub tcp_idle_timeout_secs: u64,
    /// UDP idle timeout
    pub udp_idle_timeout_secs: u64,
    /// Janitor period
    pub sweep_interval_secs: u64,
    /// Packet queue capacity
    pub packet_queue_capacity: usize,
    /// Event queue capacity
    pub event_queue_capacity: usize,
    /// Emit resident flows on shutdown
    pub drain_on_shutdown: bool,
    /// Extra CIDRs treated as local
    pub local_networks: Vec<String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            tcp_idle_timeout_secs: flowwatch_core::DEFAULT_TCP_IDLE_TIMEOUT_SECS,
            udp_idle_timeout_secs: flowwatch_core::DEFAULT_UDP_IDLE_TIMEOUT_SECS,
            sweep_interval_secs: flowwatch_core::DEFAULT_SWEEP_INTERVAL_SECS,
            packet_queue_capacity: flowwatch_core::DEFAULT_QUEUE_CAPACITY,
            event_queue_capacity: flowwatch_core::DEFAULT_QUEUE_CAPACITY,
            drain_on_shutdown: true,
            local_networks: Vec::new(),
        }
    }
}

/// Event sink selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// POST each event to `endpoint_url`
    #[default]
    Http,
    /// JSON lines on stdout
    Stdout,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "stdout" => Ok(Self::Stdout),
            other => Err(format!("unknown sink '{}', expected http or stdout", other)),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Stdout => f.write_str("stdout"),
        }
    }
}

/// Event delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink type
    pub kind: SinkKind,
    /// Collector URL for the http sink
    pub endpoint_url: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Http,
            endpoint_url: "http://localhost:8080/post".into(),
            request_timeout_secs: flowwatch_sink::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Command-line / environment overrides; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Capture interface
    pub interface: Option<String>,
    /// Capture filter
    pub filter: Option<String>,
    /// Snap length
    pub snap_len: Option<usize>,
    /// Promiscuous mode
    pub promiscuous: Option<bool>,
    /// Collector URL
    pub endpoint_url: Option<String>,
    /// Replay file
    pub pcap_file: Option<PathBuf>,
    /// Sink type
    pub sink: Option<SinkKind>,
}

impl AgentConfig {
    /// Load from file
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load from file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<(), AgentError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply command-line / environment overrides
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(interface) = overrides.interface {
            self.capture.interface = interface;
        }
        if let Some(filter) = overrides.filter {
            self.capture.filter = filter;
        }
        if let Some(snap_len) = overrides.snap_len {
            self.capture.snap_len = snap_len;
        }
        if let Some(promiscuous) = overrides.promiscuous {
            self.capture.promiscuous = promiscuous;
        }
        if let Some(pcap_file) = overrides.pcap_file {
            self.capture.pcap_file = Some(pcap_file);
        }
        if let Some(endpoint_url) = overrides.endpoint_url {
            self.sink.endpoint_url = endpoint_url;
        }
        if let Some(sink) = overrides.sink {
            self.sink.kind = sink;
        }
    }

    /// Check the merged configuration before startup
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.capture.pcap_file.is_none() && self.capture.interface.trim().is_empty() {
            return Err(AgentError::Config("capture.interface must not be empty".into()));
        }
        if self.capture.snap_len == 0 {
            return Err(AgentError::Config("capture.snap_len must be non-zero".into()));
        }
        self.capture_filter()?;
        self.local_networks()?;

        if self.sink.kind == SinkKind::Http {
            let url = reqwest::Url::parse(&self.sink.endpoint_url).map_err(|e| {
                AgentError::Config(format!("invalid sink.endpoint_url '{}': {}", self.sink.endpoint_url, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(AgentError::Config(format!(
                    "sink.endpoint_url must be http(s), got '{}'",
                    url.scheme()
                )));
            }
            if self.sink.request_timeout_secs == 0 {
                return Err(AgentError::Config("sink.request_timeout_secs must be non-zero".into()));
            }
        }

        self.engine_config().validate()?;
        Ok(())
    }

    /// Compiled capture filter
    pub fn capture_filter(&self) -> Result<CaptureFilter, AgentError> {
        CaptureFilter::parse(&self.capture.filter)
            .map_err(|e| AgentError::Config(format!("invalid capture.filter '{}': {}", self.capture.filter, e)))
    }

    /// Parsed `flow.local_networks`
    pub fn local_networks(&self) -> Result<Vec<IpNetwork>, AgentError> {
        Ok(LocalAddrs::parse_networks(&self.flow.local_networks)?)
    }

    /// Engine settings; file replay ages flows by capture time
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            timeouts: IdleTimeouts {
                tcp: Duration::from_secs(self.flow.tcp_idle_timeout_secs),
                udp: Duration::from_secs(self.flow.udp_idle_timeout_secs),
            },
            sweep_interval: Duration::from_secs(self.flow.sweep_interval_secs),
            packet_queue_capacity: self.flow.packet_queue_capacity,
            event_queue_capacity: self.flow.event_queue_capacity,
            drain_on_shutdown: self.flow.drain_on_shutdown,
            sweep_clock: if self.capture.pcap_file.is_some() {
                SweepClock::Capture
            } else {
                SweepClock::Wall
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.capture.interface, "eth0");
        assert_eq!(config.capture.filter, "tcp or udp");
        assert_eq!(config.capture.snap_len, 1024);
        assert!(config.capture.promiscuous);
        assert_eq!(config.flow.tcp_idle_timeout_secs, 60);
        assert_eq!(config.flow.udp_idle_timeout_secs, 30);
        assert_eq!(config.sink.kind, SinkKind::Http);
        assert_eq!(config.sink.endpoint_url, "http://localhost:8080/post");
        assert!(config.validate().is_ok());

        let engine = config.engine_config();
        assert_eq!(engine.sweep_clock, SweepClock::Wall);
        assert_eq!(engine.timeouts, IdleTimeouts::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"capture": {{"interface": "ens5"}}, "flow": {{"udp_idle_timeout_secs": 15, "local_networks": ["10.0.0.0/8"]}}}}"#
        )
        .unwrap();

        let config = AgentConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.capture.interface, "ens5");
        assert_eq!(config.capture.snap_len, 1024);
        assert_eq!(config.flow.udp_idle_timeout_secs, 15);
        assert_eq!(config.flow.tcp_idle_timeout_secs, 60);
        assert_eq!(config.local_networks().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_uses_defaults_but_malformed_fails() {
        let config = AgentConfig::load_or_default(Path::new("/nonexistent/flowwatch.json")).unwrap();
        assert_eq!(config, AgentConfig::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(AgentConfig::load_or_default(file.path()), Err(AgentError::Parse(_))));
    }

    #[test]
    fn test_save_then_load() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = AgentConfig::default();
        config.sink.kind = SinkKind::Stdout;
        config.save(file.path()).unwrap();

        assert_eq!(AgentConfig::load(file.path()).unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let mut config = AgentConfig::default();
        config.apply(Overrides {
            interface: Some("wlan0".into()),
            filter: Some("udp".into()),
            pcap_file: Some("/tmp/trace.pcap".into()),
            sink: Some(SinkKind::Stdout),
            ..Default::default()
        });

        assert_eq!(config.capture.interface, "wlan0");
        assert_eq!(config.capture.filter, "udp");
        assert_eq!(config.capture.snap_len, 1024);
        assert_eq!(config.sink.kind, SinkKind::Stdout);
        assert_eq!(config.engine_config().sweep_clock, SweepClock::Capture);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = AgentConfig::default();
        config.capture.filter = "tcp and".into();
        assert!(matches!(config.validate(), Err(AgentError::Config(_))));

        let mut config = AgentConfig::default();
        config.flow.local_networks = vec!["10.0.0.0/40".into()];
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.sink.endpoint_url = "ftp://collector/post".into();
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.sink.endpoint_url = "not a url".into();
        assert!(config.validate().is_err());

        // Endpoint is irrelevant for stdout
        config.sink.kind = SinkKind::Stdout;
        assert!(config.validate().is_ok());

        let mut config = AgentConfig::default();
        config.flow.sweep_interval_secs = 0;
        assert!(matches!(config.validate(), Err(AgentError::Engine(_))));
    }

    #[test]
    fn test_sink_kind_parse() {
        assert_eq!("STDOUT".parse::<SinkKind>().unwrap(), SinkKind::Stdout);
        assert_eq!("http".parse::<SinkKind>().unwrap(), SinkKind::Http);
        assert!("kafka".parse::<SinkKind>().is_err());
    }
}
