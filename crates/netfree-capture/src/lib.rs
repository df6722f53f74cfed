//! # netfree-capture
//!
//! Raw link-layer capture for netfree: a promiscuous `AF_PACKET` session,
//! bounds-checked Ethernet/IPv4/IPv6/TCP header decoding and a capture
//! filter that stands in for a `"tcp"` BPF program.
//!
//! ## Example
//!
//! ```no_run
//! use netfree_capture::{FrameSource, PacketCapture};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut capture = PacketCapture::new("wlan0")?;
//! for _ in 0..100 {
//!     if let Some(frame) = capture.next_frame()? {
//!         println!("{} -> {}", frame.source(), frame.destination());
//!     }
//! }
//! println!("{:?}", capture.stats());
//! # Ok(())
//! # }
//! ```

#![cfg(target_os = "linux")]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod error;
pub mod frames;

pub use capture::{
    CaptureFilter, CaptureStats, CapturedFrame, FrameSource, PacketCapture, DEFAULT_READ_TIMEOUT,
};
pub use error::{CaptureError, Result};
pub use frames::{decode_frame, DecodedFrame, EthernetHeader, NetworkHeader, TcpHeader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with sufficient privileges for raw socket operations
pub fn check_privileges() -> bool {
    // Root or CAP_NET_RAW; only the uid is checked
    unsafe { libc::geteuid() == 0 }
}
