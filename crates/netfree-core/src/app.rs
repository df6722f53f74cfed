use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use netfree_capture::PacketCapture;
use netfree_evasion::{router_mac, MacAddress, MacManager};
use netfree_logging::LoggingConfig;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cancel;
use crate::cli::Cli;
use crate::config::{resolve_root, NetfreeConfig};
use crate::probe::HttpProbe;
use crate::queue::{PriorityMacQueue, ScoreWeights};
use crate::scanner::{ExclusionSet, Scanner};
use crate::signals::SignalWatcher;
use crate::spoof::{AcceptFirst, CandidateDecider, PromptDecider, SpoofConfig, SpoofLoop, SpoofOutcome};

/// Entry point of the `netfree` binary after argument parsing
pub fn run(cli: Cli) -> Result<()> {
    let config = cli.apply(NetfreeConfig::from_env());
    let root = resolve_root(config.root_path.clone())?;

    let log_cfg = netfree_logging::fs::read_config(&root);
    let _logging = netfree_logging::init("netfree", &root, &log_cfg)?;
    if cli.log_level.is_some() {
        netfree_logging::apply(&log_cfg.clone().with_level(cli.log_level.as_deref()))
            .context("applying --log-level")?;
    }
    run_retention(&root, &log_cfg);

    let iface = config.interface_or_default().to_string();
    if config.interface.is_some() {
        info!("Using iface: {}", iface);
    } else {
        info!("Using default iface: {}", iface);
    }
    if !netfree_evasion::interface_exists(&iface) {
        bail!("interface {} not found", iface);
    }

    if cli.status {
        return print_status(&iface, cli.router_mac);
    }

    if !netfree_evasion::check_privileges() {
        bail!("netfree must run as root to capture traffic and change MAC addresses");
    }
    if !netfree_evasion::is_wireless(&iface) {
        warn!("{} does not look like a wireless interface", iface);
    }

    let mut manager = MacManager::new();
    let original = manager
        .remember_original(&iface)
        .with_context(|| format!("reading MAC address of {}", iface))?;
    info!("Original MAC address: {}", original);

    let router = discover_router(&iface, cli.router_mac);

    let cancel = cancel::new_flag();
    let _signals = SignalWatcher::install(Arc::clone(&cancel))?;

    let queue = Arc::new(PriorityMacQueue::new(ScoreWeights::default()));
    let exclusions: ExclusionSet = std::iter::once(original).chain(router).collect();
    let capture =
        PacketCapture::new(&iface).with_context(|| format!("opening capture on {}", iface))?;
    let scanner = Scanner::start(capture, Arc::clone(&queue), exclusions, None)?;

    let spoof = SpoofLoop::new(SpoofConfig {
        interface: iface.clone(),
        min_addresses: config.min_addresses,
        poll_interval: config.poll_interval,
        max_attempts: cli.max_attempts,
    })
    .with_producer(scanner.liveness());
    let result = HttpProbe::new(config.probe_url.clone(), config.probe_timeout).and_then(|probe| {
        let mut decider: Box<dyn CandidateDecider> = if cli.non_interactive {
            Box::new(AcceptFirst)
        } else {
            Box::new(PromptDecider::new())
        };
        spoof.run(&queue, &mut manager, &probe, decider.as_mut(), Some(&cancel))
    });

    // The producer must be gone before the queue is torn down
    match scanner.stop() {
        Ok(report) => info!(
            frames = report.frames,
            observations = report.observations,
            pass_rate = report.capture.filter_pass_rate(),
            "Scanner stopped"
        ),
        Err(err) => warn!("{:#}", err),
    }
    queue.shutdown();

    let keep = cli.keep && matches!(&result, Ok(SpoofOutcome { accepted: Some(_), .. }));
    if keep {
        manager.set_auto_restore(false);
    } else {
        let restored = manager
            .restore(&iface)
            .with_context(|| format!("restoring original MAC on {}", iface));
        if let Err(err) = restored {
            // Report the loop's own failure first, if any
            result?;
            return Err(err);
        }
    }

    report_outcome(&iface, &result?, keep);
    Ok(())
}

fn run_retention(root: &Path, cfg: &LoggingConfig) {
    if let Err(err) = netfree_logging::run_retention(root, cfg) {
        warn!("Log retention failed: {:#}", err);
    }
}

fn discover_router(iface: &str, cli_router: Option<MacAddress>) -> Option<MacAddress> {
    if let Some(mac) = cli_router {
        info!("Router MAC address (from command line): {}", mac);
        return Some(mac);
    }
    match router_mac(iface) {
        Ok(Some(mac)) => {
            info!("Router MAC address: {}", mac);
            Some(mac)
        }
        Ok(None) => {
            warn!("Router MAC unknown; it will not be excluded from candidates");
            None
        }
        Err(err) => {
            warn!("Router MAC lookup failed: {}", err);
            None
        }
    }
}

fn report_outcome(iface: &str, outcome: &SpoofOutcome, kept: bool) {
    info!(
        attempts = outcome.attempts,
        failures = outcome.failures,
        online = outcome.online,
        producer_stopped = outcome.producer_stopped,
        "Spoofing finished"
    );
    if outcome.producer_stopped {
        println!("Packet capture stopped; no more candidates to try");
    }
    match outcome.accepted {
        Some(mac) if kept => println!("{} keeps MAC address {}", iface, mac),
        Some(mac) => println!("Stopped at {}; original MAC address restored", mac),
        None => println!(
            "No address accepted after {} attempts; original MAC address restored",
            outcome.attempts
        ),
    }
}

fn print_status(iface: &str, cli_router: Option<MacAddress>) -> Result<()> {
    let manager = MacManager::new();
    let current = manager
        .current_mac(iface)
        .with_context(|| format!("reading MAC address of {}", iface))?;
    let router = match cli_router {
        Some(mac) => Some(mac),
        None => router_mac(iface).context("looking up router MAC")?,
    };

    let payload = status_payload(iface, current, router, netfree_evasion::is_wireless(iface));
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn status_payload(
    iface: &str,
    current: MacAddress,
    router: Option<MacAddress>,
    wireless: bool,
) -> Value {
    json!({
        "interface": iface,
        "mac": current,
        "locally_administered": current.is_local(),
        "router_mac": router,
        "wireless": wireless,
        "checked_at": chrono::Utc::now().to_rfc3339(),
    })
}
