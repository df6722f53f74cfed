use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::queue::NETFREE_MIN_ADDRESSES;

pub const DEFAULT_IFACE: &str = "wlan0";
pub const DEFAULT_PROBE_URL: &str = "http://www.google.com/";
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_ROOT_PATH: &str = "/var/lib/netfree";

/// Runtime settings, from the environment and then the command line
#[derive(Debug, Clone, PartialEq)]
pub struct NetfreeConfig {
    /// Interface to capture on and spoof; `None` means the default was used
    pub interface: Option<String>,
    pub min_addresses: usize,
    pub probe_url: String,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub root_path: Option<PathBuf>,
}

impl Default for NetfreeConfig {
    fn default() -> Self {
        Self {
            interface: None,
            min_addresses: NETFREE_MIN_ADDRESSES,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            root_path: None,
        }
    }
}

impl NetfreeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unparsable numbers keep the defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let interface = lookup("NETFREE_IFACE").filter(|v| !v.trim().is_empty());
        let min_addresses = lookup("NETFREE_MIN_ADDRESSES")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.min_addresses);
        let probe_url = lookup("NETFREE_PROBE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.probe_url);
        let probe_timeout = lookup("NETFREE_PROBE_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.probe_timeout);
        let poll_interval = lookup("NETFREE_POLL_INTERVAL_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let root_path = lookup("NETFREE_ROOT").map(PathBuf::from);

        Self {
            interface,
            min_addresses,
            probe_url,
            probe_timeout,
            poll_interval,
            root_path,
        }
    }

    pub fn interface_or_default(&self) -> &str {
        self.interface.as_deref().unwrap_or(DEFAULT_IFACE)
    }
}

/// State directory: explicit path, else the default if it exists, else the cwd
pub fn resolve_root(input: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = input {
        return Ok(path);
    }

    let default = PathBuf::from(DEFAULT_ROOT_PATH);
    if default.exists() {
        return Ok(default);
    }

    env::current_dir().context("determining current directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = NetfreeConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, NetfreeConfig::default());
        assert_eq!(cfg.interface_or_default(), DEFAULT_IFACE);
        assert_eq!(cfg.min_addresses, 5);
    }

    #[test]
    fn environment_overrides() {
        let cfg = NetfreeConfig::from_lookup(lookup(&[
            ("NETFREE_IFACE", "wlan1"),
            ("NETFREE_MIN_ADDRESSES", "12"),
            ("NETFREE_PROBE_URL", "http://example.com/generate_204"),
            ("NETFREE_PROBE_TIMEOUT_SECS", "2"),
            ("NETFREE_POLL_INTERVAL_MS", "250"),
            ("NETFREE_ROOT", "/tmp/netfree"),
        ]));

        assert_eq!(cfg.interface_or_default(), "wlan1");
        assert_eq!(cfg.min_addresses, 12);
        assert_eq!(cfg.probe_url, "http://example.com/generate_204");
        assert_eq!(cfg.probe_timeout, Duration::from_secs(2));
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.root_path, Some(PathBuf::from("/tmp/netfree")));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let cfg = NetfreeConfig::from_lookup(lookup(&[
            ("NETFREE_MIN_ADDRESSES", "lots"),
            ("NETFREE_PROBE_TIMEOUT_SECS", "0"),
            ("NETFREE_POLL_INTERVAL_MS", "-5"),
            ("NETFREE_IFACE", "  "),
        ]));
        assert_eq!(cfg, NetfreeConfig::default());
    }

    #[test]
    fn explicit_root_wins() {
        let root = resolve_root(Some(PathBuf::from("/srv/netfree"))).unwrap();
        assert_eq!(root, PathBuf::from("/srv/netfree"));
    }
}
