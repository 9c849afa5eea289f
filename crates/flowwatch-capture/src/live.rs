//! Live Capture
//!
//! AF_PACKET raw socket bound to one interface (Linux only). Reads use a
//! short timeout so cancellation is observed even on a quiet link.

use crate::filter::CaptureFilter;
use crate::source::{PacketSource, SourceSummary};
use crate::CaptureError;
use flowwatch_core::{PacketDescriptor, QueueSender};
use tokio_util::sync::CancellationToken;

/// Live interface source
pub struct LiveSource {
    interface: String,
    snap_len: usize,
    promiscuous: bool,
    filter: CaptureFilter,
}

impl LiveSource {
    /// Create source for `interface`
    pub fn new(interface: impl Into<String>, snap_len: usize, promiscuous: bool, filter: CaptureFilter) -> Self {
        Self {
            interface: interface.into(),
            snap_len,
            promiscuous,
            filter,
        }
    }
}

impl PacketSource for LiveSource {
    fn describe(&self) -> String {
        format!(
            "interface {} (snaplen {}, promisc {}, filter {})",
            self.interface, self.snap_len, self.promiscuous, self.filter
        )
    }

    #[cfg(target_os = "linux")]
    fn run(
        self: Box<Self>,
        queue: QueueSender<PacketDescriptor>,
        cancel: CancellationToken,
    ) -> Result<SourceSummary, CaptureError> {
        linux::capture(*self, queue, cancel)
    }

    #[cfg(not(target_os = "linux"))]
    fn run(
        self: Box<Self>,
        _queue: QueueSender<PacketDescriptor>,
        _cancel: CancellationToken,
    ) -> Result<SourceSummary, CaptureError> {
        Err(CaptureError::Unsupported(format!(
            "live capture on {} requires Linux AF_PACKET",
            self.interface
        )))
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::LiveSource;
    use crate::decode::{decode_frame, LinkType};
    use crate::source::{Forwarder, SourceSummary};
    use crate::CaptureError;
    use chrono::Utc;
    use flowwatch_core::{PacketDescriptor, QueueSender};
    use socket2::{Domain, Protocol, Socket, Type};
    use std::ffi::CString;
    use std::io;
    use std::mem::{self, MaybeUninit};
    use std::os::fd::{AsRawFd, RawFd};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const READ_TIMEOUT: Duration = Duration::from_secs(1);

    pub(super) fn capture(
        source: LiveSource,
        queue: QueueSender<PacketDescriptor>,
        cancel: CancellationToken,
    ) -> Result<SourceSummary, CaptureError> {
        let protocol = (libc::ETH_P_ALL as u16).to_be();
        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(Protocol::from(protocol as i32)))
            .map_err(|e| CaptureError::Interface(format!("failed to create packet socket: {}", e)))?;

        let ifindex = interface_index(&source.interface)?;
        bind_interface(socket.as_raw_fd(), ifindex, protocol)
            .map_err(|e| CaptureError::Interface(format!("failed to bind {}: {}", source.interface, e)))?;
        if source.promiscuous {
            enable_promiscuous(socket.as_raw_fd(), ifindex)
                .map_err(|e| CaptureError::Interface(format!("failed to set promisc on {}: {}", source.interface, e)))?;
        }
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        tracing::info!(interface = %source.interface, ifindex, "Live capture started");

        let mut forwarder = Forwarder::new(source.filter, queue);
        let mut buf = vec![MaybeUninit::<u8>::uninit(); source.snap_len.max(64)];

        while !cancel.is_cancelled() {
            // MSG_TRUNC makes the kernel report the full frame length
            let wire_len = match socket.recv_with_flags(&mut buf, libc::MSG_TRUNC) {
                Ok(n) => n,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                    continue;
                }
                Err(e) => return Err(CaptureError::Io(e)),
            };
            let captured = wire_len.min(buf.len());
            // SAFETY: the kernel initialized the first `captured` bytes
            let frame = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, captured) };

            let packet = decode_frame(LinkType::Ethernet, frame, wire_len as u32, Utc::now());
            if !forwarder.forward(packet) {
                break;
            }
        }

        Ok(forwarder.finish())
    }

    fn interface_index(iface: &str) -> Result<u32, CaptureError> {
        let ifname = CString::new(iface).map_err(|_| CaptureError::Interface(format!("invalid interface name {:?}", iface)))?;
        let ifindex = unsafe { libc::if_nametoindex(ifname.as_ptr()) };
        if ifindex == 0 {
            return Err(CaptureError::Interface(format!(
                "interface {} not found: {}",
                iface,
                io::Error::last_os_error()
            )));
        }
        Ok(ifindex)
    }

    fn bind_interface(fd: RawFd, ifindex: u32, protocol: u16) -> io::Result<()> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex as libc::c_int;

        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn enable_promiscuous(fd: RawFd, ifindex: u32) -> io::Result<()> {
        let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
        mreq.mr_ifindex = ifindex as libc::c_int;
        mreq.mr_type = libc::PACKET_MR_PROMISC as libc::c_ushort;

        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const _ as *const libc::c_void,
                mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

}
