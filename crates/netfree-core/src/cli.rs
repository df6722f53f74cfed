use std::path::PathBuf;

use clap::Parser;
use netfree_evasion::MacAddress;

use crate::config::NetfreeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "netfree",
    author,
    version,
    about = "Get past captive portals by borrowing the MAC address of a device that already paid"
)]
pub struct Cli {
    /// Wireless interface to listen on and spoof (default: wlan0, or NETFREE_IFACE)
    pub interface: Option<String>,

    /// Router MAC to exclude, when it can't be discovered from the neighbour table
    #[arg(long)]
    pub router_mac: Option<MacAddress>,

    /// Addresses to observe before the first one is tried
    #[arg(long)]
    pub min_addresses: Option<usize>,

    /// URL that must answer 200 OK for a candidate to count as online
    #[arg(long)]
    pub probe_url: Option<String>,

    /// Connectivity probe timeout in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub probe_timeout_secs: Option<u64>,

    /// How often to poll the queue while it is short, in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: Option<u64>,

    /// Stop at the first candidate with Internet access instead of asking
    #[arg(long)]
    pub non_interactive: bool,

    /// Give up after this many candidates
    #[arg(long)]
    pub max_attempts: Option<u64>,

    /// Keep the accepted address on exit instead of restoring the original
    #[arg(long)]
    pub keep: bool,

    /// State directory for logs and logging config (default /var/lib/netfree or cwd)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Log filter overriding the configured level (e.g. "debug", "netfree::queue=trace")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print the interface's current and router MAC as JSON and exit
    #[arg(long)]
    pub status: bool,
}

impl Cli {
    /// Layer the command line over an environment-derived config
    pub fn apply(&self, mut config: NetfreeConfig) -> NetfreeConfig {
        if let Some(interface) = &self.interface {
            config.interface = Some(interface.clone());
        }
        if let Some(min) = self.min_addresses {
            config.min_addresses = min;
        }
        if let Some(url) = &self.probe_url {
            config.probe_url = url.clone();
        }
        if let Some(secs) = self.probe_timeout_secs {
            config.probe_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = std::time::Duration::from_millis(ms);
        }
        if let Some(root) = &self.root {
            config.root_path = Some(root.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bare_invocation_uses_defaults() {
        let cli = Cli::try_parse_from(["netfree"]).unwrap();
        assert!(cli.interface.is_none());
        assert!(!cli.non_interactive);
        assert_eq!(cli.apply(NetfreeConfig::default()), NetfreeConfig::default());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "netfree",
            "wlan1",
            "--router-mac",
            "a4:2b:b0:11:22:33",
            "--min-addresses",
            "3",
            "--probe-timeout-secs",
            "9",
            "--poll-interval-ms",
            "50",
            "--non-interactive",
        ])
        .unwrap();

        assert_eq!(
            cli.router_mac,
            Some(MacAddress::new([0xA4, 0x2B, 0xB0, 0x11, 0x22, 0x33]))
        );
        let config = cli.apply(NetfreeConfig::default());
        assert_eq!(config.interface_or_default(), "wlan1");
        assert_eq!(config.min_addresses, 3);
        assert_eq!(config.probe_timeout, Duration::from_secs(9));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(cli.non_interactive);
    }

    #[test]
    fn bad_router_mac_is_rejected() {
        assert!(Cli::try_parse_from(["netfree", "--router-mac", "not-a-mac"]).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Cli::try_parse_from(["netfree", "--probe-timeout-secs", "0"]).is_err());
    }
}
