//! Packet capture functionality
//!
//! Capture and decode Ethernet frames from an interface through a raw
//! `AF_PACKET` socket in promiscuous mode.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use libc::{c_int, c_void, sockaddr_ll, AF_PACKET, SOCK_RAW};

use crate::error::{CaptureError, Result};
use crate::frames::{decode_frame, DecodedFrame};

/// Maximum capture buffer size
const CAPTURE_BUFFER_SIZE: usize = 65536;

/// Default receive timeout, bounding how long a reader ignores a stop request
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

const SOL_PACKET: c_int = 263;
const PACKET_ADD_MEMBERSHIP: c_int = 1;
const PACKET_MR_PROMISC: libc::c_ushort = 1;
const PACKET_OUTGOING: u8 = 4;

#[repr(C)]
struct PacketMreq {
    mr_ifindex: c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

/// Anything that yields decoded frames one at a time
///
/// `next_frame` must return within a bounded time (`Ok(None)` on timeout)
/// so readers can observe cancellation between calls.
pub trait FrameSource: Send {
    /// Read the next frame that passes the source's filter
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;

    /// Capture statistics so far
    fn stats(&self) -> CaptureStats;
}

/// Packet capture socket
pub struct PacketCapture {
    fd: RawFd,
    interface: String,
    ifindex: i32,
    buffer: Vec<u8>,
    filter: CaptureFilter,
    stats: CaptureStats,
}

impl PacketCapture {
    /// Open a promiscuous capture on an interface with the default timeout
    pub fn new(interface: &str) -> Result<Self> {
        Self::with_timeout(interface, DEFAULT_READ_TIMEOUT)
    }

    /// Open a promiscuous capture with an explicit receive timeout
    pub fn with_timeout(interface: &str, read_timeout: Duration) -> Result<Self> {
        if !crate::check_privileges() {
            return Err(CaptureError::Permission(
                "Root privileges required for packet capture".into(),
            ));
        }

        let ifindex = get_ifindex(interface)?;

        let fd = unsafe {
            libc::socket(
                AF_PACKET,
                SOCK_RAW,
                c_int::from((libc::ETH_P_ALL as u16).to_be()),
            )
        };

        if fd < 0 {
            return Err(CaptureError::Socket(format!(
                "Failed to create capture socket: {}",
                io::Error::last_os_error()
            )));
        }

        // From here on the Drop impl closes the socket on any early return
        let capture = Self {
            fd,
            interface: interface.to_string(),
            ifindex,
            buffer: vec![0u8; CAPTURE_BUFFER_SIZE],
            filter: CaptureFilter::default(),
            stats: CaptureStats::default(),
        };

        capture.bind()?;
        capture.enable_promiscuous()?;
        capture.set_read_timeout(read_timeout)?;

        log::debug!(
            "Created capture socket on {} (index {})",
            capture.interface,
            ifindex
        );

        Ok(capture)
    }

    fn bind(&self) -> Result<()> {
        let mut addr: sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = AF_PACKET as u16;
        addr.sll_ifindex = self.ifindex;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();

        let res = unsafe {
            libc::bind(
                self.fd,
                &addr as *const sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<sockaddr_ll>() as u32,
            )
        };

        if res < 0 {
            return Err(CaptureError::Socket(format!(
                "Failed to bind capture socket to {}: {}",
                self.interface,
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn enable_promiscuous(&self) -> Result<()> {
        let mreq = PacketMreq {
            mr_ifindex: self.ifindex,
            mr_type: PACKET_MR_PROMISC,
            mr_alen: 0,
            mr_address: [0; 8],
        };

        let res = unsafe {
            libc::setsockopt(
                self.fd,
                SOL_PACKET,
                PACKET_ADD_MEMBERSHIP,
                &mreq as *const PacketMreq as *const c_void,
                mem::size_of::<PacketMreq>() as u32,
            )
        };

        if res < 0 {
            return Err(CaptureError::Socket(format!(
                "Could not start promiscuous mode on {}: {}",
                self.interface,
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn set_read_timeout(&self, timeout: Duration) -> Result<()> {
        let timeout = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: libc::suseconds_t::from(timeout.subsec_micros() as i32),
        };

        let res = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const _ as *const c_void,
                mem::size_of::<libc::timeval>() as u32,
            )
        };

        if res < 0 {
            return Err(CaptureError::Socket(format!(
                "Failed to set receive timeout: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    /// Interface this capture is bound to
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Read next frame (blocking with timeout)
    ///
    /// Returns `Ok(None)` on timeout and for frames that fail to decode or
    /// don't pass the filter.
    pub fn next_packet(&mut self) -> Result<Option<CapturedFrame>> {
        let mut from: sockaddr_ll = unsafe { mem::zeroed() };
        let mut from_len = mem::size_of::<sockaddr_ll>() as libc::socklen_t;

        let received = unsafe {
            libc::recvfrom(
                self.fd,
                self.buffer.as_mut_ptr() as *mut c_void,
                self.buffer.len(),
                0,
                &mut from as *mut sockaddr_ll as *mut libc::sockaddr,
                &mut from_len,
            )
        };

        if received < 0 {
            return receive_error(io::Error::last_os_error());
        }

        if received == 0 {
            return Ok(None);
        }

        let data = &self.buffer[..received as usize];
        self.stats.frames_received += 1;
        self.stats.bytes_received += received as u64;

        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.decode_errors += 1;
                log::trace!("Failed to decode frame: {}", e);
                return Ok(None);
            }
        };

        let captured = CapturedFrame {
            timestamp: Instant::now(),
            length: data.len(),
            outgoing: from.sll_pkttype == PACKET_OUTGOING,
            frame,
        };

        if !self.filter.matches(&captured) {
            return Ok(None);
        }

        self.stats.frames_passed_filter += 1;
        Ok(Some(captured))
    }
}

/// Map a failed `recvfrom` onto the capture result
///
/// Timeouts yield `Ok(None)`. `ENETDOWN` and `ENXIO` are reported while the
/// link is cycled for an address change and clear once it is back up.
fn receive_error(err: io::Error) -> Result<Option<CapturedFrame>> {
    match (err.kind(), err.raw_os_error()) {
        (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted, _) => {
            Ok(None)
        }
        (_, Some(libc::ENETDOWN | libc::ENXIO)) => {
            Err(CaptureError::LinkDown(format!("Receive failed: {}", err)))
        }
        _ => Err(CaptureError::Capture(format!("Receive failed: {}", err))),
    }
}

impl FrameSource for PacketCapture {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        self.next_packet()
    }

    fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }
}

impl Drop for PacketCapture {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

impl AsRawFd for PacketCapture {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// Resolve an interface index
pub fn get_ifindex(interface: &str) -> Result<i32> {
    if interface.is_empty() || interface.len() >= libc::IFNAMSIZ {
        return Err(CaptureError::Interface(format!(
            "Invalid interface name '{}'",
            interface
        )));
    }
    let name = std::ffi::CString::new(interface).map_err(|_| {
        CaptureError::Interface(format!("Interface name '{}' contains NUL", interface))
    })?;

    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(CaptureError::Interface(format!(
            "Interface {} not found",
            interface
        )));
    }
    Ok(index as i32)
}

/// Capture filter configuration
///
/// The default passes TCP over IPv4/IPv6 in both directions.
#[derive(Debug, Clone)]
pub struct CaptureFilter {
    /// Only pass frames carrying TCP
    pub tcp_only: bool,
    /// Pass frames sent by this host
    pub include_outgoing: bool,
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self {
            tcp_only: true,
            include_outgoing: true,
        }
    }
}

impl CaptureFilter {
    /// Check if frame matches filter
    pub fn matches(&self, captured: &CapturedFrame) -> bool {
        if self.tcp_only && !captured.frame.is_tcp() {
            return false;
        }
        if !self.include_outgoing && captured.outgoing {
            return false;
        }
        true
    }
}

/// A captured frame with metadata
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Capture timestamp
    pub timestamp: Instant,
    /// Frame length on the wire (as received)
    pub length: usize,
    /// Whether this host sent the frame
    pub outgoing: bool,
    /// Decoded headers
    pub frame: DecodedFrame,
}

impl CapturedFrame {
    /// Wrap an already decoded frame received now
    pub fn new(frame: DecodedFrame, length: usize, outgoing: bool) -> Self {
        Self {
            timestamp: Instant::now(),
            length,
            outgoing,
            frame,
        }
    }

    /// Decode raw Ethernet bytes into a frame received now
    pub fn from_bytes(data: &[u8], outgoing: bool) -> Result<Self> {
        Ok(Self::new(decode_frame(data)?, data.len(), outgoing))
    }

    /// Source address
    pub fn source(&self) -> netfree_evasion::MacAddress {
        self.frame.ethernet.source
    }

    /// Destination address
    pub fn destination(&self) -> netfree_evasion::MacAddress {
        self.frame.ethernet.destination
    }
}

/// Capture statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Total frames received
    pub frames_received: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Frames that passed filter
    pub frames_passed_filter: u64,
    /// Frames whose headers failed to decode
    pub decode_errors: u64,
}

impl CaptureStats {
    /// Filter pass rate in percent
    pub fn filter_pass_rate(&self) -> f32 {
        if self.frames_received == 0 {
            0.0
        } else {
            (self.frames_passed_filter as f32 / self.frames_received as f32) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::tests::ipv4_tcp_frame;
    use crate::frames::{TcpHeader, ETHERTYPE_ARP};

    fn arp_frame() -> Vec<u8> {
        let mut frame = vec![0xFF; 6];
        frame.extend_from_slice(&[0x3C, 0x22, 0xFB, 0x44, 0x55, 0x66]);
        frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());
        frame.extend_from_slice(&[0u8; 28]);
        frame
    }

    #[test]
    fn test_default_filter_is_tcp_only() {
        let filter = CaptureFilter::default();
        let tcp = CapturedFrame::from_bytes(&ipv4_tcp_frame(TcpHeader::ACK), false).unwrap();
        let arp = CapturedFrame::from_bytes(&arp_frame(), false).unwrap();

        assert!(filter.matches(&tcp));
        assert!(!filter.matches(&arp));
        let any = CaptureFilter {
            tcp_only: false,
            ..Default::default()
        };
        assert!(any.matches(&arp));
    }

    #[test]
    fn test_outgoing_filter() {
        let filter = CaptureFilter {
            include_outgoing: false,
            ..Default::default()
        };
        let outgoing = CapturedFrame::from_bytes(&ipv4_tcp_frame(TcpHeader::ACK), true).unwrap();
        assert!(!filter.matches(&outgoing));
        assert!(CaptureFilter::default().matches(&outgoing));
    }

    #[test]
    fn test_filter_pass_rate() {
        let stats = CaptureStats {
            frames_received: 8,
            frames_passed_filter: 2,
            ..Default::default()
        };
        assert!((stats.filter_pass_rate() - 25.0).abs() < f32::EPSILON);
        assert_eq!(CaptureStats::default().filter_pass_rate(), 0.0);
    }

    #[test]
    fn test_link_cycle_errors_are_link_down() {
        let down = receive_error(io::Error::from_raw_os_error(libc::ENETDOWN)).unwrap_err();
        assert!(down.is_link_down());
        let gone = receive_error(io::Error::from_raw_os_error(libc::ENXIO)).unwrap_err();
        assert!(gone.is_link_down());

        let fatal = receive_error(io::Error::from_raw_os_error(libc::ENODEV)).unwrap_err();
        assert!(!fatal.is_transient());
        assert!(receive_error(io::Error::from_raw_os_error(libc::EAGAIN))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_ifindex() {
        assert!(get_ifindex("").is_err());
        assert!(get_ifindex("does-not-exist0").is_err());
    }
}

