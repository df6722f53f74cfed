//! Consumer side: take the best candidate, wear it, check for Internet access.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use netfree_evasion::{MacAddress, MacManager};
use netfree_logging::targets::T_SPOOF;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::{cancel_sleep, check_cancel, is_cancelled, CancelFlag};
use crate::probe::ConnectivityProbe;
use crate::queue::{PriorityMacQueue, QueueError, NETFREE_MIN_ADDRESSES};

/// Applies link-layer addresses to an interface
pub trait MacAssigner {
    fn assign(&mut self, interface: &str, mac: &MacAddress) -> Result<()>;
    fn restore(&mut self, interface: &str) -> Result<()>;
}

impl MacAssigner for MacManager {
    fn assign(&mut self, interface: &str, mac: &MacAddress) -> Result<()> {
        self.set_mac(interface, mac)
            .with_context(|| format!("assigning {} to {}", mac, interface))?;
        Ok(())
    }

    fn restore(&mut self, interface: &str) -> Result<()> {
        MacManager::restore(self, interface)
            .with_context(|| format!("restoring original MAC on {}", interface))
    }
}

/// Answer to "this address reaches the Internet, keep going?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Try the next candidate
    Next,
    /// Stop with the current address
    Quit,
}

pub trait CandidateDecider {
    fn decide(&mut self, mac: &MacAddress, cancel: Option<&CancelFlag>) -> Result<Decision>;
}

/// Stops at the first address that gets online
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptFirst;

impl CandidateDecider for AcceptFirst {
    fn decide(&mut self, _mac: &MacAddress, _cancel: Option<&CancelFlag>) -> Result<Decision> {
        Ok(Decision::Quit)
    }
}

/// Asks the operator on stdin
///
/// Lines are read on a helper thread so a pending prompt still notices
/// cancellation. A closed stdin counts as quit.
#[derive(Default)]
pub struct PromptDecider {
    answers: Option<Receiver<String>>,
}

impl PromptDecider {
    pub fn new() -> Self {
        Self::default()
    }

    fn answers(&mut self) -> Result<&Receiver<String>> {
        if self.answers.is_none() {
            self.answers = Some(spawn_stdin_reader()?);
        }
        self.answers
            .as_ref()
            .ok_or_else(|| anyhow!("stdin reader unavailable"))
    }
}

impl CandidateDecider for PromptDecider {
    fn decide(&mut self, mac: &MacAddress, cancel: Option<&CancelFlag>) -> Result<Decision> {
        let answers = self.answers()?;
        // Ignore anything typed before the question was asked
        while answers.try_recv().is_ok() {}

        println!(
            "I think I found one ({}). Check it out and let me know if it works, \
             or quit and reset the interface.",
            mac
        );
        print!("Next/Quit (N/Q): ");
        io::stdout().flush().context("flushing prompt")?;

        loop {
            check_cancel(cancel)?;
            match answers.recv_timeout(Duration::from_millis(200)) {
                Ok(line) => return Ok(parse_answer(&line)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    println!();
                    return Ok(Decision::Quit);
                }
            }
        }
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("netfree-prompt".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawning stdin reader")?;
    Ok(rx)
}

/// `q`/`Q` quits; anything else moves on
pub fn parse_answer(line: &str) -> Decision {
    match line.trim_start().chars().next() {
        Some('q') | Some('Q') => Decision::Quit,
        _ => Decision::Next,
    }
}

#[derive(Debug, Clone)]
pub struct SpoofConfig {
    pub interface: String,
    /// Queue population required before the first candidate is taken
    pub min_addresses: usize,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Stop after this many candidates; unbounded when `None`
    pub max_attempts: Option<u64>,
}

impl SpoofConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            min_addresses: NETFREE_MIN_ADDRESSES,
            poll_interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpoofOutcome {
    /// Address in place when the operator quit
    pub accepted: Option<MacAddress>,
    /// Candidates popped from the queue
    pub attempts: u64,
    /// Candidates that could not be assigned
    pub failures: u64,
    /// Candidates that passed the connectivity probe
    pub online: u64,
    /// The loop ended because nothing was left to refill the queue
    pub producer_stopped: bool,
}

pub struct SpoofLoop {
    config: SpoofConfig,
    producer: Option<Arc<AtomicBool>>,
}

impl SpoofLoop {
    pub fn new(config: SpoofConfig) -> Self {
        Self {
            config,
            producer: None,
        }
    }

    /// Stop waiting on the queue once `alive` is cleared
    pub fn with_producer(mut self, alive: Arc<AtomicBool>) -> Self {
        self.producer = Some(alive);
        self
    }

    pub fn config(&self) -> &SpoofConfig {
        &self.config
    }

    /// Cycle through candidates until one is accepted, the attempt limit is
    /// hit, or `cancel` is raised
    ///
    /// Cancellation is not an error; it ends the loop with `accepted: None`.
    pub fn run<A, P, D>(
        &self,
        queue: &PriorityMacQueue,
        assigner: &mut A,
        probe: &P,
        decider: &mut D,
        cancel: Option<&CancelFlag>,
    ) -> Result<SpoofOutcome>
    where
        A: MacAssigner + ?Sized,
        P: ConnectivityProbe + ?Sized,
        D: CandidateDecider + ?Sized,
    {
        let iface = self.config.interface.as_str();
        let mut outcome = SpoofOutcome::default();

        info!(
            target: T_SPOOF,
            min = self.config.min_addresses,
            "Waiting for addresses"
        );
        match self.warm_up(queue, cancel) {
            Ok(true) => {}
            Ok(false) => {
                warn!(target: T_SPOOF, "Capture stopped before enough addresses were seen");
                outcome.producer_stopped = true;
                return Ok(outcome);
            }
            Err(err) if is_cancelled(&err) => return Ok(outcome),
            Err(err) => return Err(err),
        }

        loop {
            if interrupted(check_cancel(cancel))? {
                info!(target: T_SPOOF, "Spoofing cancelled");
                return Ok(outcome);
            }
            if self
                .config
                .max_attempts
                .is_some_and(|max| outcome.attempts >= max)
            {
                info!(target: T_SPOOF, attempts = outcome.attempts, "Attempt limit reached");
                return Ok(outcome);
            }

            let Some(mac) = queue.pop()? else {
                if self.producer_stopped() && queue.is_empty() {
                    warn!(target: T_SPOOF, "Queue drained and capture has stopped");
                    outcome.producer_stopped = true;
                    return Ok(outcome);
                }
                if interrupted(cancel_sleep(cancel, self.config.poll_interval))? {
                    return Ok(outcome);
                }
                continue;
            };
            outcome.attempts += 1;

            if let Err(err) = assigner.assign(iface, &mac) {
                warn!(target: T_SPOOF, "{:#}", err);
                outcome.failures += 1;
                continue;
            }
            info!(target: T_SPOOF, %mac, attempt = outcome.attempts, "Trying address");

            if !probe.is_online() {
                debug!(target: T_SPOOF, %mac, "No Internet access");
                continue;
            }
            outcome.online += 1;
            info!(target: T_SPOOF, %mac, "Internet access");

            match decider.decide(&mac, cancel) {
                Ok(Decision::Quit) => {
                    outcome.accepted = Some(mac);
                    return Ok(outcome);
                }
                Ok(Decision::Next) => continue,
                Err(err) if is_cancelled(&err) => return Ok(outcome),
                Err(err) => return Err(err),
            }
        }
    }
}

impl SpoofLoop {
    fn producer_stopped(&self) -> bool {
        self.producer
            .as_ref()
            .is_some_and(|alive| !alive.load(Ordering::Acquire))
    }

    /// `Ok(false)` when the producer is gone and the queue is still short
    fn warm_up(&self, queue: &PriorityMacQueue, cancel: Option<&CancelFlag>) -> Result<bool> {
        if self.producer.is_none() {
            queue.wait_for_length(
                self.config.min_addresses,
                self.config.poll_interval,
                cancel,
            )?;
            return Ok(true);
        }

        let poll = self.config.poll_interval.max(Duration::from_millis(1));
        loop {
            if !queue.is_open() {
                return Err(QueueError::Closed.into());
            }
            if queue.length() >= self.config.min_addresses {
                return Ok(true);
            }
            if self.producer_stopped() {
                // Its last upserts may have landed after the check above
                return Ok(queue.length() >= self.config.min_addresses);
            }
            cancel_sleep(cancel, poll)?;
        }
    }
}

/// `Ok(true)` when `result` is a cancellation
fn interrupted(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(false),
        Err(err) if is_cancelled(&err) => Ok(true),
        Err(err) => Err(err),
    }
}
