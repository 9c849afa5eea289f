//! Flow Identity and Record
//!
//! A flow is keyed by the directional 5-tuple. Request and response
//! packets of one connection have distinct keys and are tracked as two
//! independent flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Transport protocol carried in the IP payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TransportProtocol {
    /// Connection-oriented stream protocol
    Tcp,
    /// Connectionless datagram protocol
    Udp,
    /// Any other IP protocol number (never tracked)
    Other(u8),
}

impl TransportProtocol {
    /// Map an IP protocol number
    pub const fn from_ip_number(number: u8) -> Self {
        match number {
            6 => Self::Tcp,
            17 => Self::Udp,
            n => Self::Other(n),
        }
    }

    /// IP protocol number
    pub const fn ip_number(&self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
            Self::Other(n) => *n,
        }
    }

    /// Whether the engine keeps flow state for this protocol
    pub const fn is_tracked(&self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Other(n) => write!(f, "IP({})", n),
        }
    }
}

impl From<TransportProtocol> for String {
    fn from(protocol: TransportProtocol) -> Self {
        protocol.to_string()
    }
}

impl TryFrom<String> for TransportProtocol {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "TCP" => Ok(Self::Tcp),
            "UDP" => Ok(Self::Udp),
            other => other
                .strip_prefix("IP(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|n| n.parse::<u8>().ok())
                .map(Self::Other)
                .ok_or_else(|| format!("unknown protocol: {}", other)),
        }
    }
}

/// Direction of a flow relative to this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Remote source, local destination
    Inbound,
    /// Local source, remote destination
    Outbound,
    /// Both endpoints local
    Local,
    /// Neither endpoint local
    Unknown,
}

impl Direction {
    /// Classify from the two address-membership tests
    pub const fn from_locality(src_is_local: bool, dst_is_local: bool) -> Self {
        match (src_is_local, dst_is_local) {
            (true, false) => Self::Outbound,
            (false, true) => Self::Inbound,
            (true, true) => Self::Local,
            (false, false) => Self::Unknown,
        }
    }

    /// Lowercase name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Local => "local",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directional 5-tuple flow key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    /// Source address
    pub src_ip: IpAddr,
    /// Destination address
    pub dst_ip: IpAddr,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Transport protocol
    pub protocol: TransportProtocol,
}

impl FlowKey {
    /// Create new flow key
    pub const fn new(
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
        protocol: TransportProtocol,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// Key of the opposite direction of the same conversation
    pub const fn reverse(&self) -> Self {
        Self::new(
            self.dst_ip,
            self.src_ip,
            self.dst_port,
            self.src_port,
            self.protocol,
        )
    }

    /// Textual flow id: `srcIP:srcPort-dstIP:dstPort-PROTOCOL`
    pub fn flow_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}-{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

/// Running state of one resident flow
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    /// Flow key
    pub key: FlowKey,
    /// Direction, fixed at creation
    pub direction: Direction,
    /// Capture time of the first packet
    pub start_time: DateTime<Utc>,
    /// Capture time of the most recent packet
    pub last_seen: DateTime<Utc>,
    /// Packets seen
    pub packet_count: u64,
    /// Bytes seen
    pub byte_count: u64,
}

impl FlowRecord {
    /// Create a record from the first packet of a flow
    pub fn new(key: FlowKey, direction: Direction, length: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            direction,
            start_time: timestamp,
            last_seen: timestamp,
            packet_count: 1,
            byte_count: length as u64,
        }
    }

    /// Account one more packet
    ///
    /// Out-of-order timestamps never move `last_seen` backwards.
    #[inline]
    pub fn update(&mut self, length: u32, timestamp: DateTime<Utc>) {
        self.packet_count = self.packet_count.saturating_add(1);
        self.byte_count = self.byte_count.saturating_add(length as u64);
        if timestamp > self.last_seen {
            self.last_seen = timestamp;
        }
    }

    /// Whether the flow has been quiet for longer than `timeout` at `now`
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match (now - self.last_seen).to_std() {
            Ok(idle) => idle > timeout,
            // now is before last_seen
            Err(_) => false,
        }
    }

    /// Seconds between first and last packet
    pub fn duration_secs(&self) -> f64 {
        (self.last_seen - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Mean packet size in bytes
    pub fn avg_packet_size(&self) -> f64 {
        if self.packet_count == 0 {
            return 0.0;
        }
        self.byte_count as f64 / self.packet_count as f64
    }
}
