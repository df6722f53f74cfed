//! Capture producer: feeds addresses seen on the wire into the ranking queue.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use netfree_capture::{CaptureStats, CapturedFrame, FrameSource};
use netfree_evasion::MacAddress;
use netfree_logging::targets::T_CAPTURE;
use tracing::{debug, error, info, warn};

use crate::cancel::{self, cancel_sleep, CancelFlag};
use crate::queue::{PriorityMacQueue, QueueError};

pub const CAPTURE_THREAD_NAME: &str = "netfree-capture";

/// Pause between reads while the link is down
pub const LINK_DOWN_BACKOFF: Duration = Duration::from_millis(250);

/// Addresses the producer never reports
#[derive(Debug, Clone)]
pub struct ExclusionSet {
    addresses: HashSet<MacAddress>,
    skip_group_addresses: bool,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self {
            addresses: HashSet::new(),
            skip_group_addresses: true,
        }
    }

    pub fn insert(&mut self, mac: MacAddress) -> bool {
        self.addresses.insert(mac)
    }

    /// Report multicast, broadcast and all-zero addresses too
    pub fn include_group_addresses(mut self) -> Self {
        self.skip_group_addresses = false;
        self
    }

    pub fn is_excluded(&self, mac: &MacAddress) -> bool {
        if self.addresses.contains(mac) {
            return true;
        }
        self.skip_group_addresses && (mac.is_multicast() || mac.is_zero())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<MacAddress> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = MacAddress>>(iter: I) -> Self {
        let mut set = Self::new();
        set.addresses.extend(iter);
        set
    }
}

/// Addresses to record for one frame: source, then destination
///
/// The source of an outgoing frame is this host and is skipped. A frame
/// addressed to its own sender yields the address once.
pub fn observe_frame(frame: &CapturedFrame, exclusions: &ExclusionSet) -> Vec<MacAddress> {
    let mut seen = Vec::with_capacity(2);

    let source = frame.source();
    if !frame.outgoing && !exclusions.is_excluded(&source) {
        seen.push(source);
    }

    let destination = frame.destination();
    if !exclusions.is_excluded(&destination) && !seen.contains(&destination) {
        seen.push(destination);
    }

    seen
}

/// What the producer thread did before it stopped
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Frames that passed the capture filter
    pub frames: u64,
    /// Successful queue upserts
    pub observations: u64,
    /// Times the link went down under the capture
    pub link_outages: u64,
    /// Counters from the capture session
    pub capture: CaptureStats,
    /// Error that ended the capture early
    pub error: Option<String>,
}

/// Handle to the running capture thread
pub struct Scanner {
    handle: Option<JoinHandle<ScanReport>>,
    stop: CancelFlag,
    alive: Arc<AtomicBool>,
}

/// Cleared when the producer thread returns or unwinds
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scanner {
    /// Spawn the producer thread reading from `source`
    ///
    /// `max_frames` bounds how many passing frames are processed.
    pub fn start<S>(
        source: S,
        queue: Arc<PriorityMacQueue>,
        exclusions: ExclusionSet,
        max_frames: Option<u64>,
    ) -> Result<Self>
    where
        S: FrameSource + 'static,
    {
        let stop = cancel::new_flag();
        let thread_stop = Arc::clone(&stop);
        let alive = Arc::new(AtomicBool::new(true));
        let guard = AliveGuard(Arc::clone(&alive));

        let handle = thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.to_string())
            .spawn(move || {
                let _guard = guard;
                produce(source, &queue, &exclusions, &thread_stop, max_frames)
            })
            .context("spawning capture thread")?;

        Ok(Self {
            handle: Some(handle),
            stop,
            alive,
        })
    }

    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Shared flag that stays `true` while the producer thread runs
    pub fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Ask the thread to stop and wait for it
    ///
    /// Returns within about one capture read timeout.
    pub fn stop(mut self) -> Result<ScanReport> {
        self.join()
    }

    fn join(&mut self) -> Result<ScanReport> {
        cancel::cancel(&self.stop);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("capture thread already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow!("capture thread panicked"))
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.join() {
                warn!(target: T_CAPTURE, "{:#}", err);
            }
        }
    }
}

fn produce<S: FrameSource>(
    mut source: S,
    queue: &PriorityMacQueue,
    exclusions: &ExclusionSet,
    stop: &CancelFlag,
    max_frames: Option<u64>,
) -> ScanReport {
    let mut report = ScanReport::default();
    let mut link_down = false;
    info!(
        target: T_CAPTURE,
        excluded = exclusions.len(),
        ?max_frames,
        "Capture started"
    );

    'capture: while !stop.load(Ordering::Relaxed) {
        if max_frames.is_some_and(|max| report.frames >= max) {
            info!(target: T_CAPTURE, frames = report.frames, "Frame limit reached");
            break;
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(err) if err.is_link_down() => {
                if !link_down {
                    warn!(target: T_CAPTURE, "Link down, waiting for it to come back: {}", err);
                    link_down = true;
                    report.link_outages += 1;
                }
                if cancel_sleep(Some(stop), LINK_DOWN_BACKOFF).is_err() {
                    break;
                }
                continue;
            }
            Err(err) if err.is_transient() => {
                debug!(target: T_CAPTURE, "Skipping frame: {}", err);
                continue;
            }
            Err(err) => {
                error!(target: T_CAPTURE, "Capture failed: {}", err);
                report.error = Some(err.to_string());
                break;
            }
        };
        if link_down {
            info!(target: T_CAPTURE, "Link back up");
            link_down = false;
        }
        report.frames += 1;

        for mac in observe_frame(&frame, exclusions) {
            match queue.upsert(mac, 0.0) {
                Ok(()) => report.observations += 1,
                Err(QueueError::Closed) => {
                    warn!(target: T_CAPTURE, "Queue closed under running capture");
                    break 'capture;
                }
            }
        }
    }

    report.capture = source.stats();
    info!(
        target: T_CAPTURE,
        frames = report.frames,
        observations = report.observations,
        link_outages = report.link_outages,
        received = report.capture.frames_received,
        decode_errors = report.capture.decode_errors,
        "Capture stopped"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use netfree_capture::{DecodedFrame, EthernetHeader};

    const SELF_MAC: MacAddress = MacAddress::new([0x02, 0xAA, 0xAA, 0xAA, 0xAA, 0x01]);
    const ROUTER: MacAddress = MacAddress::new([0xA4, 0x2B, 0xB0, 0x11, 0x22, 0x33]);
    const PEER: MacAddress = MacAddress::new([0x3C, 0x22, 0xFB, 0x44, 0x55, 0x66]);

    fn frame(source: MacAddress, destination: MacAddress, outgoing: bool) -> CapturedFrame {
        let decoded = DecodedFrame {
            ethernet: EthernetHeader {
                destination,
                source,
                ethertype: 0x0800,
                vlan: None,
            },
            network: None,
            tcp: None,
        };
        CapturedFrame::new(decoded, 60, outgoing)
    }

    fn exclusions() -> ExclusionSet {
        [SELF_MAC, ROUTER].into_iter().collect()
    }

    #[test]
    fn reports_source_then_destination() {
        let peer2 = MacAddress::new([0x3C, 0x22, 0xFB, 0x44, 0x55, 0x77]);
        let seen = observe_frame(&frame(PEER, peer2, false), &ExclusionSet::new());
        assert_eq!(seen, vec![PEER, peer2]);
    }

    #[test]
    fn router_and_self_are_skipped() {
        let excl = exclusions();
        assert_eq!(observe_frame(&frame(PEER, ROUTER, false), &excl), vec![PEER]);
        assert_eq!(observe_frame(&frame(ROUTER, PEER, false), &excl), vec![PEER]);
        assert!(observe_frame(&frame(SELF_MAC, ROUTER, false), &excl).is_empty());
    }

    #[test]
    fn outgoing_source_is_skipped() {
        let seen = observe_frame(&frame(PEER, ROUTER, true), &ExclusionSet::new());
        assert_eq!(seen, vec![ROUTER]);
    }

    #[test]
    fn group_addresses_are_skipped_by_default() {
        let excl = ExclusionSet::new();
        assert_eq!(
            observe_frame(&frame(PEER, MacAddress::BROADCAST, false), &excl),
            vec![PEER]
        );
        let multicast = MacAddress::new([0x01, 0x00, 0x5E, 0x00, 0x00, 0xFB]);
        assert_eq!(observe_frame(&frame(PEER, multicast, false), &excl), vec![PEER]);

        let all = ExclusionSet::new().include_group_addresses();
        assert_eq!(
            observe_frame(&frame(PEER, MacAddress::BROADCAST, false), &all),
            vec![PEER, MacAddress::BROADCAST]
        );
    }

    #[test]
    fn self_addressed_frame_counts_once() {
        let seen = observe_frame(&frame(PEER, PEER, false), &ExclusionSet::new());
        assert_eq!(seen, vec![PEER]);
    }
}
