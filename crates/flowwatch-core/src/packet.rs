//! Packet Descriptor
//!
//! Input contract between the packet source and the engine.

use crate::flow::{FlowKey, TransportProtocol};
use chrono::{DateTime, Utc};
use std::net::{IpAddr, SocketAddr};

/// Network-layer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkLayer {
    /// Source address
    pub src: IpAddr,
    /// Destination address
    pub dst: IpAddr,
}

/// Transport-layer identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLayer {
    /// Protocol
    pub protocol: TransportProtocol,
    /// Source port (0 for portless protocols)
    pub src_port: u16,
    /// Destination port (0 for portless protocols)
    pub dst_port: u16,
    /// TCP FIN or RST seen
    pub terminating: bool,
}

/// One observed packet
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDescriptor {
    /// Network layer, if the frame carried one
    pub network: Option<NetworkLayer>,
    /// Transport layer, if the packet carried one
    pub transport: Option<TransportLayer>,
    /// Original length on the wire
    pub length: u32,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
}

impl PacketDescriptor {
    /// TCP packet between two socket addresses
    pub fn tcp(src: SocketAddr, dst: SocketAddr, length: u32, timestamp: DateTime<Utc>) -> Self {
        Self::with_transport(src, dst, TransportProtocol::Tcp, length, timestamp)
    }

    /// UDP packet between two socket addresses
    pub fn udp(src: SocketAddr, dst: SocketAddr, length: u32, timestamp: DateTime<Utc>) -> Self {
        Self::with_transport(src, dst, TransportProtocol::Udp, length, timestamp)
    }

    fn with_transport(
        src: SocketAddr,
        dst: SocketAddr,
        protocol: TransportProtocol,
        length: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            network: Some(NetworkLayer {
                src: src.ip(),
                dst: dst.ip(),
            }),
            transport: Some(TransportLayer {
                protocol,
                src_port: src.port(),
                dst_port: dst.port(),
                terminating: false,
            }),
            length,
            timestamp,
        }
    }

    /// Set the FIN/RST flag
    pub fn terminating(mut self, terminating: bool) -> Self {
        if let Some(transport) = self.transport.as_mut() {
            transport.terminating = terminating;
        }
        self
    }

    /// Flow key, if this packet belongs to a tracked flow
    ///
    /// Requires both layers and a tracked transport protocol.
    pub fn flow_key(&self) -> Option<FlowKey> {
        let network = self.network?;
        let transport = self.transport?;
        if !transport.protocol.is_tracked() {
            return None;
        }
        Some(FlowKey::new(
            network.src,
            network.dst,
            transport.src_port,
            transport.dst_port,
            transport.protocol,
        ))
    }

    /// Whether this packet ends its flow (TCP FIN or RST only)
    pub fn is_terminating(&self) -> bool {
        matches!(
            self.transport,
            Some(TransportLayer {
                protocol: TransportProtocol::Tcp,
                terminating: true,
                ..
            })
        )
    }
}
