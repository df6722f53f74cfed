//! Router (default gateway) MAC discovery from procfs.
//!
//! The gateway IPv4 address comes from `/proc/net/route` and is resolved to
//! a link-layer address through the kernel neighbour table in
//! `/proc/net/arp`. Both parsers work on file contents so they can be
//! exercised without a live interface.

use std::net::Ipv4Addr;

use crate::error::{EvasionError, Result};
use crate::mac::MacAddress;

const PROC_NET_ROUTE: &str = "/proc/net/route";
const PROC_NET_ARP: &str = "/proc/net/arp";

const RTF_UP: u32 = 0x0001;
const RTF_GATEWAY: u32 = 0x0002;
const ATF_COM: u32 = 0x0002;

/// Look up the router MAC address for an interface
///
/// Returns `Ok(None)` when the interface has no default route or the
/// gateway has no complete neighbour entry yet.
///
/// # Errors
///
/// Returns an error if procfs cannot be read
pub fn router_mac(interface: &str) -> Result<Option<MacAddress>> {
    let routes = std::fs::read_to_string(PROC_NET_ROUTE)
        .map_err(|e| EvasionError::System(format!("Failed to read {}: {}", PROC_NET_ROUTE, e)))?;

    let Some(gateway) = parse_default_gateway(&routes, interface) else {
        log::debug!("{}: no default gateway in {}", interface, PROC_NET_ROUTE);
        return Ok(None);
    };

    let neighbours = std::fs::read_to_string(PROC_NET_ARP)
        .map_err(|e| EvasionError::System(format!("Failed to read {}: {}", PROC_NET_ARP, e)))?;

    let mac = parse_neighbour_mac(&neighbours, gateway, interface);
    if mac.is_none() {
        log::debug!("{}: gateway {} not in neighbour table", interface, gateway);
    }
    Ok(mac)
}

/// Find the default gateway for `interface` in `/proc/net/route` contents
#[must_use]
pub fn parse_default_gateway(contents: &str, interface: &str) -> Option<Ipv4Addr> {
    contents.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[0] != interface || fields[1] != "00000000" {
            return None;
        }

        let flags = u32::from_str_radix(fields[3], 16).ok()?;
        if flags & (RTF_UP | RTF_GATEWAY) != (RTF_UP | RTF_GATEWAY) {
            return None;
        }

        // procfs prints the raw network-order word in host byte order
        let raw = u32::from_str_radix(fields[2], 16).ok()?;
        let gateway = Ipv4Addr::from(raw.to_ne_bytes());
        (!gateway.is_unspecified()).then_some(gateway)
    })
}

/// Find the MAC address of `ip` on `interface` in `/proc/net/arp` contents
#[must_use]
pub fn parse_neighbour_mac(contents: &str, ip: Ipv4Addr, interface: &str) -> Option<MacAddress> {
    contents.lines().skip(1).find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 || parts[5] != interface {
            return None;
        }
        if parts[0].parse::<Ipv4Addr>().ok()? != ip {
            return None;
        }

        let flags = u32::from_str_radix(parts[2].trim_start_matches("0x"), 16).ok()?;
        if flags & ATF_COM == 0 {
            return None;
        }

        let mac: MacAddress = parts[3].parse().ok()?;
        (!mac.is_zero()).then_some(mac)
    })
}
