//! # netfree-evasion
//!
//! Link-layer identity handling for netfree: the [`MacAddress`] type,
//! reading and assigning interface addresses, restoring the original
//! address, and discovering the router's address.
//!
//! ## Example
//!
//! ```no_run
//! use netfree_evasion::{router_mac, MacManager};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut manager = MacManager::new();
//!     let original = manager.remember_original("wlan0")?;
//!     println!("Original MAC: {}", original);
//!
//!     if let Some(router) = router_mac("wlan0")? {
//!         println!("Router MAC: {}", router);
//!     }
//!
//!     manager.restore("wlan0")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Support
//!
//! Linux only: addresses are changed with `SIOCSIFHWADDR` and read from
//! sysfs/procfs. Root privileges (or `CAP_NET_ADMIN`) are required to
//! change an address.

#![cfg(target_os = "linux")]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod gateway;
pub mod ioctl;
pub mod mac;

pub use error::{EvasionError, Result};
pub use gateway::router_mac;
pub use mac::{MacAddress, MacManager, MacState, MAC_SIZE};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with sufficient privileges
///
/// Changing an interface address requires root or `CAP_NET_ADMIN`.
#[must_use]
pub fn check_privileges() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check if an interface exists
///
/// # Arguments
///
/// * `interface` - Network interface name (e.g., "wlan0")
#[must_use]
pub fn interface_exists(interface: &str) -> bool {
    if interface.is_empty() || interface.contains('/') || interface.contains('\0') {
        return false;
    }

    let path = format!("/sys/class/net/{}", interface);
    std::path::Path::new(&path).exists()
}

/// Check if an interface is wireless
#[must_use]
pub fn is_wireless(interface: &str) -> bool {
    if !interface_exists(interface) {
        return false;
    }

    let wireless_path = format!("/sys/class/net/{}/wireless", interface);
    let phy_path = format!("/sys/class/net/{}/phy80211", interface);

    std::path::Path::new(&wireless_path).exists() || std::path::Path::new(&phy_path).exists()
}
