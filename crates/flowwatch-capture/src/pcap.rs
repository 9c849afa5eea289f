//! Pcap Replay
//!
//! Replays a legacy pcap or pcapng file through the decoder, keeping the
//! recorded capture timestamps and original frame lengths.

use crate::decode::{decode_frame, LinkType};
use crate::filter::CaptureFilter;
use crate::source::{Forwarder, PacketSource, SourceSummary};
use crate::CaptureError;
use chrono::{DateTime, TimeZone, Utc};
use flowwatch_core::{PacketDescriptor, QueueSender};
use pcap_parser::pcapng::Block;
use pcap_parser::traits::PcapNGPacketBlock;
use pcap_parser::{create_reader, PcapBlockOwned, PcapError};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const READER_BUFFER_SIZE: usize = 1 << 16;

const MAGIC_NANOS: u32 = 0xa1b2_3c4d;
const MAGIC_NANOS_SWAPPED: u32 = 0x4d3c_b2a1;

/// Pcap/pcapng file source
pub struct PcapFileSource {
    path: PathBuf,
    filter: CaptureFilter,
}

impl PcapFileSource {
    /// Create source for `path`
    pub fn new(path: impl AsRef<Path>, filter: CaptureFilter) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            filter,
        }
    }
}

/// Per-interface decoding parameters (one for legacy pcap)
#[derive(Debug, Clone, Copy)]
struct Interface {
    link: LinkType,
    /// Timestamp units per second
    units_per_sec: u64,
    /// Seconds added to every timestamp
    offset_secs: i64,
}

impl Interface {
    fn new(linktype: i32, units_per_sec: u64, offset_secs: i64) -> Result<Self, CaptureError> {
        let link = LinkType::from_linktype(linktype).ok_or(CaptureError::UnsupportedLinkType(linktype))?;
        Ok(Self {
            link,
            units_per_sec,
            offset_secs,
        })
    }

    fn timestamp(&self, ticks: u64) -> DateTime<Utc> {
        let secs = (ticks / self.units_per_sec) as i64 + self.offset_secs;
        let frac = ticks % self.units_per_sec;
        let nanos = (frac as u128 * 1_000_000_000 / self.units_per_sec as u128) as u32;
        Utc.timestamp_opt(secs, nanos).single().unwrap_or_default()
    }
}

/// Decode the pcapng `if_tsresol` option
fn ts_units_per_sec(tsresol: u8) -> u64 {
    let exponent = (tsresol & 0x7f) as u32;
    let units = if tsresol & 0x80 != 0 {
        2u64.checked_pow(exponent)
    } else {
        10u64.checked_pow(exponent)
    };
    match units {
        Some(units) if units > 0 => units,
        _ => 1_000_000,
    }
}

impl PacketSource for PcapFileSource {
    fn describe(&self) -> String {
        format!("pcap file {}", self.path.display())
    }

    fn run(
        self: Box<Self>,
        queue: QueueSender<PacketDescriptor>,
        cancel: CancellationToken,
    ) -> Result<SourceSummary, CaptureError> {
        let file = File::open(&self.path)?;
        let mut reader = create_reader(READER_BUFFER_SIZE, file)
            .map_err(|e| CaptureError::Pcap(format!("{}: {}", self.path.display(), e)))?;

        let mut forwarder = Forwarder::new(self.filter, queue);
        let mut interfaces: Vec<Interface> = Vec::new();
        let mut last_timestamp = DateTime::<Utc>::default();

        loop {
            if cancel.is_cancelled() {
                tracing::info!("pcap replay cancelled");
                break;
            }

            let packet = match reader.next() {
                Ok((offset, block)) => {
                    let packet = match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            let units = match header.magic_number {
                                MAGIC_NANOS | MAGIC_NANOS_SWAPPED => 1_000_000_000,
                                _ => 1_000_000,
                            };
                            interfaces = vec![Interface::new(header.network.0, units, 0)?];
                            None
                        }
                        PcapBlockOwned::Legacy(block) => {
                            let iface = *interfaces
                                .first()
                                .ok_or_else(|| CaptureError::Pcap("packet before file header".into()))?;
                            let ticks = block.ts_sec as u64 * iface.units_per_sec + block.ts_usec as u64;
                            Some(decode_frame(iface.link, block.data, block.origlen, iface.timestamp(ticks)))
                        }
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            interfaces.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            interfaces.push(Interface::new(
                                idb.linktype.0,
                                ts_units_per_sec(idb.if_tsresol),
                                idb.if_tsoffset,
                            )?);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let iface = *interfaces.get(epb.if_id as usize).ok_or_else(|| {
                                CaptureError::Pcap(format!("unknown interface id {}", epb.if_id))
                            })?;
                            let ticks = ((epb.ts_high as u64) << 32) | epb.ts_low as u64;
                            Some(decode_frame(iface.link, epb.packet_data(), epb.origlen, iface.timestamp(ticks)))
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            // No timestamp recorded; reuse the previous one
                            let iface = *interfaces
                                .first()
                                .ok_or_else(|| CaptureError::Pcap("packet before interface block".into()))?;
                            Some(decode_frame(iface.link, spb.packet_data(), spb.origlen, last_timestamp))
                        }
                        _ => None,
                    };
                    reader.consume(offset);
                    packet
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| CaptureError::Pcap(format!("refill failed: {}", e)))?;
                    continue;
                }
                Err(e) => return Err(CaptureError::Pcap(format!("parse failed: {}", e))),
            };

            if let Some(packet) = packet {
                last_timestamp = packet.timestamp;
                if !forwarder.forward(packet) {
                    break;
                }
            }
        }

        Ok(forwarder.finish())
    }
}
