//! MAC address identity and interface address management
//!
//! This module provides:
//! - A 6-byte [`MacAddress`] value type with parsing and formatting
//! - [`MacManager`], which reads, assigns and restores interface addresses
//!   and remembers the original address of every interface it touched
//!
//! ## Example
//!
//! ```no_run
//! use netfree_evasion::mac::{MacAddress, MacManager};
//!
//! let mut manager = MacManager::new();
//! let candidate: MacAddress = "3C:22:FB:10:20:30".parse().unwrap();
//! manager.set_mac("wlan0", &candidate).unwrap();
//!
//! // ...probe the network...
//!
//! manager.restore("wlan0").unwrap();
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{EvasionError, Result};

/// Number of bytes in an Ethernet MAC address
pub const MAC_SIZE: usize = 6;

/// A 6-byte link-layer address
///
/// Serializes as its `AA:BB:CC:DD:EE:FF` text form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; MAC_SIZE]);

impl MacAddress {
    /// Broadcast address (FF:FF:FF:FF:FF:FF)
    pub const BROADCAST: MacAddress = MacAddress([0xFF; MAC_SIZE]);

    /// Zero/null address
    pub const ZERO: MacAddress = MacAddress([0x00; MAC_SIZE]);

    /// Create a new MAC address from bytes
    #[must_use]
    pub const fn new(bytes: [u8; MAC_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, which must hold exactly 6 bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not 6
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; MAC_SIZE] = slice.try_into().map_err(|_| {
            EvasionError::InvalidMac(format!("Expected {} bytes, got {}", MAC_SIZE, slice.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Parse a MAC address from string
    ///
    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` and `AABBCCDDEEFF`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid MAC address
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MAC_SIZE] {
        &self.0
    }

    /// Check if this is the broadcast address
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; MAC_SIZE]
    }

    /// Check if this is the all-zero address
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0x00; MAC_SIZE]
    }

    /// Check if this is a multicast address (bit 0 of first octet set)
    ///
    /// The broadcast address is also multicast.
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Check if this is a unicast address
    #[must_use]
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast()
    }

    /// Check if this is a locally administered address (bit 1 of first octet set)
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// Get the OUI (vendor) portion
    #[must_use]
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }
}

impl From<[u8; MAC_SIZE]> for MacAddress {
    fn from(bytes: [u8; MAC_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({})", self)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = EvasionError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        let parts: Vec<&str> = if s.contains(':') {
            s.split(':').collect()
        } else if s.contains('-') {
            s.split('-').collect()
        } else if s.len() == MAC_SIZE * 2 && s.is_ascii() {
            (0..MAC_SIZE).map(|i| &s[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(EvasionError::InvalidMac(format!(
                "Unrecognized MAC format: {}",
                s
            )));
        };

        if parts.len() != MAC_SIZE {
            return Err(EvasionError::InvalidMac(format!(
                "Expected 6 octets, got {}",
                parts.len()
            )));
        }

        let mut bytes = [0u8; MAC_SIZE];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || part.len() > 2 {
                return Err(EvasionError::InvalidMac(format!("Invalid hex octet: {}", part)));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| EvasionError::InvalidMac(format!("Invalid hex octet: {}", part)))?;
        }

        Ok(Self(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// State of a MAC address change on one interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacState {
    /// Interface name
    pub interface: String,
    /// Address the interface had before we first touched it
    pub original_mac: MacAddress,
    /// Address currently applied
    pub current_mac: MacAddress,
    /// Whether a different address has been applied
    pub is_spoofed: bool,
    /// Timestamp of the last change (Unix epoch)
    pub changed_at: i64,
}

impl MacState {
    /// Check if MAC needs to be restored
    #[must_use]
    pub fn needs_restore(&self) -> bool {
        self.is_spoofed && self.original_mac != self.current_mac
    }
}

/// Manager for MAC address operations
///
/// Tracks state changes and provides restoration capability.
/// Implements Drop to automatically restore MACs on cleanup.
pub struct MacManager {
    states: HashMap<String, MacState>,
    auto_restore: bool,
}

impl MacManager {
    /// Create a new MAC manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            auto_restore: true,
        }
    }

    /// Set whether to auto-restore on drop
    pub fn set_auto_restore(&mut self, auto: bool) {
        self.auto_restore = auto;
    }

    /// Get the current MAC address of an interface
    ///
    /// Reads `/sys/class/net/<iface>/address` first and falls back to the
    /// `SIOCGIFHWADDR` ioctl.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface doesn't exist or MAC can't be read
    pub fn current_mac(&self, interface: &str) -> Result<MacAddress> {
        crate::ioctl::validate_ifname(interface)?;

        let path = format!("/sys/class/net/{}/address", interface);
        match std::fs::read_to_string(&path) {
            Ok(contents) => match contents.trim().parse::<MacAddress>() {
                Ok(mac) => return Ok(mac),
                Err(e) => log::debug!("Unparseable address in {}: {}", path, e),
            },
            Err(e) => log::debug!("Failed to read {}: {}", path, e),
        }

        crate::ioctl::get_hwaddr(interface)
    }

    /// Record the current address of an interface as its original
    ///
    /// Later calls return the address captured by the first call.
    ///
    /// # Errors
    ///
    /// Returns an error if the current address cannot be read
    pub fn remember_original(&mut self, interface: &str) -> Result<MacAddress> {
        if let Some(state) = self.states.get(interface) {
            return Ok(state.original_mac);
        }

        let current = self.current_mac(interface)?;
        self.states.insert(
            interface.to_string(),
            MacState {
                interface: interface.to_string(),
                original_mac: current,
                current_mac: current,
                is_spoofed: false,
                changed_at: chrono::Utc::now().timestamp(),
            },
        );
        Ok(current)
    }

    /// Get the original MAC address recorded for an interface
    #[must_use]
    pub fn original_mac(&self, interface: &str) -> Option<MacAddress> {
        self.states.get(interface).map(|state| state.original_mac)
    }

    /// Set the MAC address of an interface
    ///
    /// The link is brought down for the assignment and brought back up
    /// even when the assignment fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Interface doesn't exist
    /// - Permission denied (need root)
    /// - Driver doesn't support MAC changes
    pub fn set_mac(&mut self, interface: &str, mac: &MacAddress) -> Result<MacState> {
        self.remember_original(interface)?;

        let current = self.current_mac(interface)?;
        if current == *mac {
            let state = self.state_mut(interface)?;
            state.current_mac = current;
            state.is_spoofed = state.original_mac != current;
            return Ok(state.clone());
        }

        if mac.is_multicast() {
            return Err(EvasionError::InvalidMac(format!(
                "{} is a group address and cannot be assigned",
                mac
            )));
        }

        apply_mac(interface, mac)?;

        let state = self.state_mut(interface)?;
        state.current_mac = *mac;
        state.is_spoofed = state.original_mac != *mac;
        state.changed_at = chrono::Utc::now().timestamp();
        log::info!("{}: MAC set to {}", interface, mac);

        Ok(state.clone())
    }

    /// Restore the original MAC address
    ///
    /// # Errors
    ///
    /// Returns an error if restoration fails
    pub fn restore(&mut self, interface: &str) -> Result<()> {
        if let Some(state) = self.states.remove(interface) {
            if state.needs_restore() {
                restore_state(&state)?;
                log::info!("{}: MAC restored to {}", interface, state.original_mac);
            }
        }

        Ok(())
    }

    /// Restore all modified interfaces
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, but attempts all restorations
    pub fn restore_all(&mut self) -> Result<()> {
        let mut first_error: Option<EvasionError> = None;

        for (_, state) in self.states.drain() {
            if state.needs_restore() {
                if let Err(e) = restore_state(&state) {
                    log::warn!("Failed to restore MAC on {}: {}", state.interface, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Get the saved state for an interface
    #[must_use]
    pub fn get_state(&self, interface: &str) -> Option<&MacState> {
        self.states.get(interface)
    }

    fn state_mut(&mut self, interface: &str) -> Result<&mut MacState> {
        self.states.get_mut(interface).ok_or_else(|| {
            EvasionError::InterfaceError(format!("no recorded state for {}", interface))
        })
    }
}

fn apply_mac(interface: &str, mac: &MacAddress) -> Result<()> {
    crate::ioctl::set_link_up(interface, false)?;
    let result = crate::ioctl::set_hwaddr(interface, mac);
    let up_result = crate::ioctl::set_link_up(interface, true);
    result?;
    up_result
}

fn restore_state(state: &MacState) -> Result<()> {
    apply_mac(&state.interface, &state.original_mac).map_err(|e| {
        if e.is_permission_error() {
            e
        } else {
            EvasionError::RestoreError(format!("{}: {}", state.interface, e))
        }
    })
}

impl Drop for MacManager {
    fn drop(&mut self) {
        if self.auto_restore && !self.states.is_empty() {
            if let Err(e) = self.restore_all() {
                log::error!("Failed to restore MAC addresses on drop: {}", e);
            }
        }
    }
}

impl Default for MacManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_colon() {
        let mac: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_mac_parse_dash() {
        let mac: MacAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_mac_parse_continuous() {
        let mac: MacAddress = "aabbccddeeff".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_mac_parse_sysfs_line() {
        let mac: MacAddress = "3c:22:fb:0a:1b:2c\n".parse().unwrap();
        assert_eq!(mac.to_string(), "3C:22:FB:0A:1B:2C");
    }

    #[test]
    fn test_invalid_mac() {
        assert!("not a mac".parse::<MacAddress>().is_err());
        assert!("AA:BB".parse::<MacAddress>().is_err());
        assert!("AA:BB:CC:DD:EE:GG".parse::<MacAddress>().is_err());
        assert!("AA:BB:CC:DD:EE:".parse::<MacAddress>().is_err());
        assert!("AAA:BB:CC:DD:EE:F".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_from_slice() {
        let mac = MacAddress::from_slice(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(mac, MacAddress::new([1, 2, 3, 4, 5, 6]));
        assert!(MacAddress::from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_address_classes() {
        assert!(MacAddress::BROADCAST.is_broadcast());
        assert!(MacAddress::BROADCAST.is_multicast());
        assert!(MacAddress::ZERO.is_zero());
        assert!(MacAddress::new([0x01, 0x00, 0x5E, 0, 0, 1]).is_multicast());

        let local = MacAddress::new([0x02, 0, 0, 0, 0, 1]);
        assert!(local.is_local());
        assert!(local.is_unicast());
        assert_eq!(local.oui(), [0x02, 0, 0]);
    }

    #[test]
    fn test_state_needs_restore() {
        let original = MacAddress::new([0x3C, 0x22, 0xFB, 0, 0, 1]);
        let mut state = MacState {
            interface: "wlan0".into(),
            original_mac: original,
            current_mac: original,
            is_spoofed: false,
            changed_at: 0,
        };
        assert!(!state.needs_restore());

        state.current_mac = MacAddress::new([0x3C, 0x22, 0xFB, 0, 0, 2]);
        state.is_spoofed = true;
        assert!(state.needs_restore());
    }

    #[test]
    fn test_serde_as_text() {
        let mac = MacAddress::new([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"DE:AD:BE:EF:00:01\"");
        let back: MacAddress = serde_json::from_str("\"de-ad-be-ef-00-01\"").unwrap();
        assert_eq!(back, mac);
        assert!(serde_json::from_str::<MacAddress>("\"nope\"").is_err());
    }

    #[test]
    fn test_manager_without_state_has_no_original() {
        let manager = MacManager::new();
        assert!(manager.original_mac("wlan0").is_none());
        assert!(manager.get_state("wlan0").is_none());
    }
}
