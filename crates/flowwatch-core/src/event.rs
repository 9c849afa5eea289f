//! Flow Event
//!
//! Immutable summary emitted once per flow lifecycle.

use crate::flow::{Direction, FlowRecord, TransportProtocol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Finalized flow summary (wire format of the event sink)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// `srcIP:srcPort-dstIP:dstPort-PROTOCOL`
    pub flow_id: String,
    /// Time of the last packet of the flow
    pub timestamp: DateTime<Utc>,
    /// Capture interface
    pub interface: String,
    /// Host that observed the flow
    pub hostname: String,
    /// Direction relative to the host
    pub direction: Direction,

    // 5-tuple
    /// Source address
    pub src_ip: IpAddr,
    /// Destination address
    pub dst_ip: IpAddr,
    /// Source port, sent as a decimal string
    #[serde(with = "port_string")]
    pub src_port: u16,
    /// Destination port, sent as a decimal string
    #[serde(with = "port_string")]
    pub dst_port: u16,
    /// Transport protocol
    pub protocol: TransportProtocol,

    /// Seconds between first and last packet
    pub flow_duration: f64,
    /// Total packets
    pub packet_count: u64,
    /// Total bytes
    pub byte_count: u64,
    /// `byte_count / packet_count`
    pub avg_packet_size: f64,
}

impl FlowEvent {
    /// Derive the event from a finalized record
    pub fn from_record(record: &FlowRecord, interface: &str, hostname: &str) -> Self {
        Self {
            flow_id: record.key.flow_id(),
            timestamp: record.last_seen,
            interface: interface.to_string(),
            hostname: hostname.to_string(),
            direction: record.direction,
            src_ip: record.key.src_ip,
            dst_ip: record.key.dst_ip,
            src_port: record.key.src_port,
            dst_port: record.key.dst_port,
            protocol: record.key.protocol,
            flow_duration: record.duration_secs(),
            packet_count: record.packet_count,
            byte_count: record.byte_count,
            avg_packet_size: record.avg_packet_size(),
        }
    }
}

/// Ports travel as decimal strings (`"443"`); the collector rejects numbers
mod port_string {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(port)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let value = String::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid port '{}'", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowKey;
    use chrono::TimeZone;

    fn record() -> FlowRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let key = FlowKey::new(
            "1.2.3.4".parse().unwrap(),
            "9.9.9.9".parse().unwrap(),
            5000,
            53,
            TransportProtocol::Udp,
        );
        let mut record = FlowRecord::new(key, Direction::Unknown, 60, t0);
        record.update(80, t0 + chrono::Duration::seconds(2));
        record.update(40, t0 + chrono::Duration::milliseconds(4250));
        record
    }

    #[test]
    fn test_from_record() {
        let event = FlowEvent::from_record(&record(), "eth0", "sensor-1");

        assert_eq!(event.flow_id, "1.2.3.4:5000-9.9.9.9:53-UDP");
        assert_eq!(event.interface, "eth0");
        assert_eq!(event.hostname, "sensor-1");
        assert_eq!(event.packet_count, 3);
        assert_eq!(event.byte_count, 180);
        assert!((event.avg_packet_size - 60.0).abs() < 1e-9);
        assert!((event.flow_duration - 4.25).abs() < 1e-9);
        assert_eq!(event.timestamp, record().last_seen);
    }

    #[test]
    fn test_json_shape() {
        let event = FlowEvent::from_record(&record(), "eth0", "sensor-1");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["protocol"], "UDP");
        assert_eq!(value["direction"], "unknown");
        assert_eq!(value["src_ip"], "1.2.3.4");
        assert_eq!(value["src_port"], "5000");
        assert_eq!(value["dst_port"], "53");
        assert_eq!(value["packet_count"], 3);
        assert_eq!(value["byte_count"], 180);
        assert_eq!(value["timestamp"], "2024-03-09T12:00:04.250Z");
        assert_eq!(value.as_object().unwrap().len(), 14);
    }

    #[test]
    fn test_json_round_trip() {
        let event = FlowEvent::from_record(&record(), "eth0", "sensor-1");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: FlowEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.flow_id, event.flow_id);
        assert_eq!(parsed.timestamp, event.timestamp);
        assert_eq!(parsed.protocol, event.protocol);
        assert_eq!(parsed.direction, event.direction);
        assert_eq!(parsed.packet_count, event.packet_count);
        assert_eq!((parsed.src_port, parsed.dst_port), (5000, 53));
        assert!((parsed.flow_duration - event.flow_duration).abs() < 1e-12);
        assert!((parsed.avg_packet_size - event.avg_packet_size).abs() < 1e-12);
    }

    #[test]
    fn test_port_must_be_decimal_string() {
        let event = FlowEvent::from_record(&record(), "eth0", "sensor-1");
        let mut value = serde_json::to_value(&event).unwrap();

        value["dst_port"] = serde_json::json!("70000");
        assert!(serde_json::from_value::<FlowEvent>(value.clone()).is_err());

        value["dst_port"] = serde_json::json!(53);
        assert!(serde_json::from_value::<FlowEvent>(value).is_err());
    }
}
