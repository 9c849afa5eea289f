//! flowwatch Packet Sources
//!
//! Everything upstream of the packet queue: frame decoding, the capture
//! filter, pcap replay and live AF_PACKET capture.
//!
//! ```text
//!   pcap file ─┐
//!              ├─▶ decode_frame ─▶ CaptureFilter ─▶ blocking_send ─▶ packet queue
//!   AF_PACKET ─┘
//! ```
//!
//! Sources are blocking and run on tokio's blocking pool via
//! [`spawn_source`].

#![warn(missing_docs)]

pub mod decode;
pub mod filter;
pub mod live;
pub mod pcap;
pub mod source;

use thiserror::Error;

pub use decode::{decode_frame, LinkType};
pub use filter::{CaptureFilter, FilterError};
pub use live::LiveSource;
pub use pcap::PcapFileSource;
pub use source::{spawn_source, PacketSource, SourceSummary};

/// Capture error types
#[derive(Debug, Error)]
pub enum CaptureError {
    /// File or socket I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed capture file
    #[error("pcap error: {0}")]
    Pcap(String),

    /// Link-layer type the decoder does not handle
    #[error("unsupported link type: {0}")]
    UnsupportedLinkType(i32),

    /// Invalid capture filter
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// Interface lookup, bind or option failure
    #[error("interface error: {0}")]
    Interface(String),

    /// Capture mode not available on this platform
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;
