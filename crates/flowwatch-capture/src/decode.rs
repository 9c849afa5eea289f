//! Frame Decoder
//!
//! L2-L4 header extraction into [`PacketDescriptor`]s. Never fails: layers
//! that cannot be decoded are left as `None` and the descriptor is later
//! dropped by the flow table as untracked.

use chrono::{DateTime, Utc};
use flowwatch_core::{NetworkLayer, PacketDescriptor, TransportLayer, TransportProtocol};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const MAX_VLAN_TAGS: usize = 2;
const SLL_HEADER_LEN: usize = 16;
const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_MIN_HEADER: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const MAX_IPV6_EXT_HEADERS: usize = 8;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;

const TCP_FIN: u8 = 0x01;
const TCP_RST: u8 = 0x04;

/// Link-layer framing of captured bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// Ethernet II, optionally 802.1Q/802.1ad tagged
    Ethernet,
    /// Linux cooked capture (v1)
    LinuxSll,
    /// Bare IPv4 or IPv6, told apart by the version nibble
    RawIp,
}

impl LinkType {
    /// Map a pcap `LINKTYPE_*` value
    pub fn from_linktype(linktype: i32) -> Option<Self> {
        match linktype {
            1 => Some(Self::Ethernet),
            113 => Some(Self::LinuxSll),
            // LINKTYPE_RAW, the legacy DLT_RAW values, IPV4, IPV6
            101 | 12 | 14 | 228 | 229 => Some(Self::RawIp),
            _ => None,
        }
    }
}

/// Decode one captured frame
///
/// `wire_len` is the original frame length, which may exceed `frame.len()`
/// when the capture was truncated to a snap length.
pub fn decode_frame(
    link: LinkType,
    frame: &[u8],
    wire_len: u32,
    timestamp: DateTime<Utc>,
) -> PacketDescriptor {
    let (network, transport) = match link_payload(link, frame) {
        Some((ETHERTYPE_IPV4, payload)) => split(parse_ipv4(payload)),
        Some((ETHERTYPE_IPV6, payload)) => split(parse_ipv6(payload)),
        _ => (None, None),
    };

    PacketDescriptor {
        network,
        transport,
        length: wire_len,
        timestamp,
    }
}

type Layers = (NetworkLayer, Option<TransportLayer>);

fn split(layers: Option<Layers>) -> (Option<NetworkLayer>, Option<TransportLayer>) {
    match layers {
        Some((network, transport)) => (Some(network), transport),
        None => (None, None),
    }
}

#[inline]
fn be16(bytes: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*bytes.get(offset)?, *bytes.get(offset + 1)?]))
}

// ============================================================================
// L2
// ============================================================================

/// Ethertype and L3 payload
fn link_payload(link: LinkType, frame: &[u8]) -> Option<(u16, &[u8])> {
    match link {
        LinkType::Ethernet => ethernet_payload(frame),
        LinkType::LinuxSll => {
            let protocol = be16(frame, 14)?;
            Some((protocol, frame.get(SLL_HEADER_LEN..)?))
        }
        LinkType::RawIp => match frame.first()? >> 4 {
            4 => Some((ETHERTYPE_IPV4, frame)),
            6 => Some((ETHERTYPE_IPV6, frame)),
            _ => None,
        },
    }
}

fn ethernet_payload(frame: &[u8]) -> Option<(u16, &[u8])> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let mut ethertype = be16(frame, 12)?;
    let mut offset = ETH_HEADER_LEN;

    for _ in 0..MAX_VLAN_TAGS {
        if ethertype != ETHERTYPE_VLAN && ethertype != ETHERTYPE_QINQ {
            break;
        }
        // Inner ethertype follows the 2-byte TCI
        ethertype = be16(frame, offset + 2)?;
        offset += VLAN_TAG_LEN;
    }

    Some((ethertype, frame.get(offset..)?))
}

// ============================================================================
// L3
// ============================================================================

fn parse_ipv4(packet: &[u8]) -> Option<Layers> {
    if packet.len() < IPV4_MIN_HEADER {
        return None;
    }
    let version_ihl = packet[0];
    if version_ihl >> 4 != 4 {
        return None;
    }
    let ihl_bytes = ((version_ihl & 0x0f) as usize) * 4;
    if ihl_bytes < IPV4_MIN_HEADER || packet.len() < ihl_bytes {
        return None;
    }

    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    let network = NetworkLayer {
        src: IpAddr::V4(src),
        dst: IpAddr::V4(dst),
    };

    // Trim link-layer padding when the total length is sane
    let total_len = be16(packet, 2)? as usize;
    let end = if total_len >= ihl_bytes && total_len <= packet.len() {
        total_len
    } else {
        packet.len()
    };

    let fragment_offset = be16(packet, 6)? & 0x1fff;
    let transport = if fragment_offset == 0 {
        parse_transport(packet[9], &packet[ihl_bytes..end])
    } else {
        None
    };

    Some((network, transport))
}

fn parse_ipv6(packet: &[u8]) -> Option<Layers> {
    if packet.len() < IPV6_HEADER_LEN || packet[0] >> 4 != 6 {
        return None;
    }

    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&packet[8..24]);
    dst.copy_from_slice(&packet[24..40]);
    let network = NetworkLayer {
        src: IpAddr::V6(Ipv6Addr::from(src)),
        dst: IpAddr::V6(Ipv6Addr::from(dst)),
    };

    let mut next_header = packet[6];
    let mut offset = IPV6_HEADER_LEN;

    for _ in 0..MAX_IPV6_EXT_HEADERS {
        match next_header {
            // Hop-by-hop, routing, destination options
            0 | 43 | 60 => {
                let Some(&len) = packet.get(offset + 1) else {
                    return Some((network, None));
                };
                next_header = packet[offset];
                offset += (len as usize + 1) * 8;
            }
            // Fragment
            44 => {
                let Some(frag) = be16(packet, offset + 2) else {
                    return Some((network, None));
                };
                if frag >> 3 != 0 {
                    return Some((network, None));
                }
                next_header = packet[offset];
                offset += 8;
            }
            _ => break,
        }
    }

    let transport = packet
        .get(offset..)
        .and_then(|segment| parse_transport(next_header, segment));
    Some((network, transport))
}

// ============================================================================
// L4
// ============================================================================

fn parse_transport(ip_protocol: u8, segment: &[u8]) -> Option<TransportLayer> {
    match TransportProtocol::from_ip_number(ip_protocol) {
        TransportProtocol::Tcp => {
            if segment.len() < TCP_MIN_HEADER {
                return None;
            }
            let flags = segment[13];
            Some(TransportLayer {
                protocol: TransportProtocol::Tcp,
                src_port: be16(segment, 0)?,
                dst_port: be16(segment, 2)?,
                terminating: flags & (TCP_FIN | TCP_RST) != 0,
            })
        }
        TransportProtocol::Udp => {
            if segment.len() < UDP_HEADER_LEN {
                return None;
            }
            Some(TransportLayer {
                protocol: TransportProtocol::Udp,
                src_port: be16(segment, 0)?,
                dst_port: be16(segment, 2)?,
                terminating: false,
            })
        }
        other => Some(TransportLayer {
            protocol: other,
            src_port: 0,
            dst_port: 0,
            terminating: false,
        }),
    }
}
