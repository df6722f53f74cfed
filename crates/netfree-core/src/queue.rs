//! Ranking queue of observed MAC addresses.
//!
//! Every observation of an address bumps its count, stamps its last-seen
//! time and recomputes its score:
//!
//! ```text
//! score = REVCOUNT_WEIGHT * count + TIMEDELTA_WEIGHT * last_seen
//! ```
//!
//! Entries are kept in a vector sorted by non-increasing score. Because the
//! time term can move a score either way, an updated entry is taken out and
//! reinserted on every observation. New and updated entries both go
//! immediately before the first entry with a strictly lower score, so ties
//! keep the order in which entries reached that score.
//!
//! One mutex guards the whole vector; each operation holds it from lookup
//! to final position, so readers never see a half-moved entry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use netfree_evasion::MacAddress;
use netfree_logging::targets::T_QUEUE;
use once_cell::sync::Lazy;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::cancel::{cancel_sleep, CancelFlag};

pub use netfree_evasion::MAC_SIZE;

/// Weight of the observation count in the score
pub const REVCOUNT_WEIGHT: f64 = 1.0;
/// Weight of the last-seen timestamp in the score
pub const TIMEDELTA_WEIGHT: f64 = 1.0;
/// Addresses to collect before the first candidate is taken
pub const NETFREE_MIN_ADDRESSES: usize = 5;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Seconds elapsed on the process-wide monotonic clock
pub fn monotonic_seconds() -> f64 {
    EPOCH.elapsed().as_secs_f64()
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("MAC queue is shut down")]
    Closed,
}

/// Coefficients of the linear score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreWeights {
    pub revcount: f64,
    pub timedelta: f64,
}

impl ScoreWeights {
    pub const fn new(revcount: f64, timedelta: f64) -> Self {
        Self {
            revcount,
            timedelta,
        }
    }

    pub fn score(&self, count: u32, last_seen: f64) -> f64 {
        self.revcount * f64::from(count) + self.timedelta * last_seen
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self::new(REVCOUNT_WEIGHT, TIMEDELTA_WEIGHT)
    }
}

/// One tracked address
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacEntry {
    pub address: MacAddress,
    pub count: u32,
    pub last_seen: f64,
    pub score: f64,
}

/// Concurrent score-ordered set of MAC addresses
///
/// Shared between the capture thread (producer) and the spoof loop
/// (consumer) as `Arc<PriorityMacQueue>`.
#[derive(Debug)]
pub struct PriorityMacQueue {
    weights: ScoreWeights,
    // None once shut down
    entries: Mutex<Option<Vec<MacEntry>>>,
    // Only written while `entries` is locked
    length: AtomicUsize,
}

impl PriorityMacQueue {
    /// Create an empty, open queue
    pub fn new(weights: ScoreWeights) -> Self {
        Lazy::force(&EPOCH);
        Self {
            weights,
            entries: Mutex::new(Some(Vec::new())),
            length: AtomicUsize::new(0),
        }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<MacEntry>>> {
        // Mutations leave the vector sorted before anything that can panic
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset to empty and (re)open the queue
    pub fn initialize(&self) {
        let mut guard = self.lock();
        *guard = Some(Vec::new());
        self.length.store(0, Ordering::Release);
    }

    /// Drop every entry and close the queue
    ///
    /// Later `upsert`/`peek`/`pop` calls fail with [`QueueError::Closed`]
    /// until [`initialize`](Self::initialize) is called again. Stop the
    /// producer before calling this.
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        let dropped = guard.take().map_or(0, |entries| entries.len());
        self.length.store(0, Ordering::Release);
        debug!(target: T_QUEUE, dropped, "MAC queue shut down");
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Record one observation of `address` at `timestamp` seconds
    ///
    /// A timestamp that is not a positive finite number is replaced with
    /// [`monotonic_seconds`].
    pub fn upsert(&self, address: MacAddress, timestamp: f64) -> Result<(), QueueError> {
        let last_seen = if timestamp.is_finite() && timestamp > 0.0 {
            timestamp
        } else {
            monotonic_seconds()
        };

        let mut guard = self.lock();
        let entries = guard.as_mut().ok_or(QueueError::Closed)?;

        let entry = match entries.iter().position(|e| e.address == address) {
            Some(index) => {
                let mut entry = entries.remove(index);
                entry.count = entry.count.saturating_add(1);
                entry.last_seen = last_seen;
                entry.score = self.weights.score(entry.count, last_seen);
                entry
            }
            None => MacEntry {
                address,
                count: 1,
                last_seen,
                score: self.weights.score(1, last_seen),
            },
        };

        let position = insertion_index(entries, entry.score);
        entries.insert(position, entry);
        self.length.store(entries.len(), Ordering::Release);

        trace!(
            target: T_QUEUE,
            %address,
            count = entry.count,
            score = entry.score,
            position,
            "observed"
        );
        Ok(())
    }

    /// Highest-scored address, left in place
    pub fn peek(&self) -> Result<Option<MacAddress>, QueueError> {
        let guard = self.lock();
        let entries = guard.as_ref().ok_or(QueueError::Closed)?;
        Ok(entries.first().map(|e| e.address))
    }

    /// Remove and return the highest-scored address
    pub fn pop(&self) -> Result<Option<MacAddress>, QueueError> {
        let mut guard = self.lock();
        let entries = guard.as_mut().ok_or(QueueError::Closed)?;
        if entries.is_empty() {
            return Ok(None);
        }

        let entry = entries.remove(0);
        self.length.store(entries.len(), Ordering::Release);
        debug!(
            target: T_QUEUE,
            address = %entry.address,
            count = entry.count,
            score = entry.score,
            remaining = entries.len(),
            "popped"
        );
        Ok(Some(entry.address))
    }

    /// Number of entries; 0 once shut down
    pub fn length(&self) -> usize {
        self.length.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Copy of all entries, front to back
    pub fn snapshot(&self) -> Vec<MacEntry> {
        self.lock().as_ref().cloned().unwrap_or_default()
    }

    pub fn get(&self, address: &MacAddress) -> Option<MacEntry> {
        self.lock()
            .as_ref()?
            .iter()
            .find(|e| e.address == *address)
            .copied()
    }

    /// Sleep-poll until at least `min` addresses are queued
    ///
    /// Fails with [`QueueError::Closed`] if the queue is shut down while
    /// waiting, or with `CancelledError` when `cancel` is raised.
    pub fn wait_for_length(
        &self,
        min: usize,
        poll: Duration,
        cancel: Option<&CancelFlag>,
    ) -> Result<()> {
        let poll = poll.max(Duration::from_millis(1));
        loop {
            if !self.is_open() {
                return Err(QueueError::Closed.into());
            }
            let length = self.length();
            if length >= min {
                return Ok(());
            }
            trace!(target: T_QUEUE, length, min, "waiting for addresses");
            cancel_sleep(cancel, poll)?;
        }
    }
}

impl Default for PriorityMacQueue {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

/// Index of the first entry scoring strictly below `score`
fn insertion_index(entries: &[MacEntry], score: f64) -> usize {
    entries
        .iter()
        .position(|e| e.score < score)
        .unwrap_or(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{cancel, is_cancelled, new_flag};

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
    }

    fn assert_sorted(queue: &PriorityMacQueue) {
        let snapshot = queue.snapshot();
        for pair in snapshot.windows(2) {
            assert!(
                pair[0].score >= pair[1].score,
                "unsorted: {:?}",
                snapshot
            );
        }
    }

    #[test]
    fn new_entry_starts_at_count_one() {
        let queue = PriorityMacQueue::new(ScoreWeights::new(2.0, 0.5));
        queue.upsert(mac(1), 10.0).unwrap();

        let entry = queue.get(&mac(1)).unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.last_seen, 10.0);
        assert_eq!(entry.score, 2.0 + 5.0);
        assert_eq!(queue.length(), 1);
    }

    #[test]
    fn repeated_observation_updates_in_place() {
        let queue = PriorityMacQueue::default();
        queue.upsert(mac(1), 3.0).unwrap();
        queue.upsert(mac(1), 3.0).unwrap();

        assert_eq!(queue.length(), 1);
        let entry = queue.get(&mac(1)).unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.last_seen, 3.0);
        assert_eq!(entry.score, REVCOUNT_WEIGHT * 2.0 + TIMEDELTA_WEIGHT * 3.0);
    }

    #[test]
    fn non_positive_timestamp_uses_monotonic_clock() {
        let queue = PriorityMacQueue::new(ScoreWeights::new(0.0, 1.0));
        let before = monotonic_seconds();
        queue.upsert(mac(1), 0.0).unwrap();
        queue.upsert(mac(2), -4.0).unwrap();
        queue.upsert(mac(3), f64::NAN).unwrap();
        let after = monotonic_seconds();

        for last in 1..=3 {
            let entry = queue.get(&mac(last)).unwrap();
            assert!(entry.last_seen >= before && entry.last_seen <= after);
        }
    }

    #[test]
    fn equal_new_score_goes_after_existing() {
        let queue = PriorityMacQueue::new(ScoreWeights::new(0.0, 1.0));
        queue.upsert(mac(1), 7.0).unwrap();
        queue.upsert(mac(2), 7.0).unwrap();
        queue.upsert(mac(3), 7.0).unwrap();

        let order: Vec<_> = queue.snapshot().iter().map(|e| e.address).collect();
        assert_eq!(order, vec![mac(1), mac(2), mac(3)]);
    }

    #[test]
    fn updated_entry_is_repositioned_after_equal_scores() {
        let queue = PriorityMacQueue::new(ScoreWeights::new(1.0, 0.0));
        queue.upsert(mac(1), 1.0).unwrap();
        queue.upsert(mac(1), 1.0).unwrap();
        queue.upsert(mac(2), 1.0).unwrap();
        // mac(2) climbs to 2 and ties mac(1); it lands behind it
        queue.upsert(mac(2), 1.0).unwrap();

        let order: Vec<_> = queue.snapshot().iter().map(|e| e.address).collect();
        assert_eq!(order, vec![mac(1), mac(2)]);

        queue.upsert(mac(2), 1.0).unwrap();
        assert_eq!(queue.peek().unwrap(), Some(mac(2)));
    }

    #[test]
    fn score_can_drop_and_entry_moves_back() {
        let queue = PriorityMacQueue::new(ScoreWeights::new(1.0, -1.0));
        queue.upsert(mac(1), 1.0).unwrap(); // 0
        queue.upsert(mac(2), 2.0).unwrap(); // -1
        assert_eq!(queue.peek().unwrap(), Some(mac(1)));

        queue.upsert(mac(1), 10.0).unwrap(); // 2 - 10 = -8
        assert_eq!(queue.peek().unwrap(), Some(mac(2)));
        assert_sorted(&queue);
    }

    #[test]
    fn stays_sorted_under_mixed_updates() {
        let queue = PriorityMacQueue::new(ScoreWeights::new(1.5, -0.25));
        for step in 0..200u32 {
            let address = mac((step * 7 % 13) as u8);
            queue.upsert(address, f64::from(step % 17) + 1.0).unwrap();
            assert_sorted(&queue);
        }
        assert_eq!(queue.length(), 13);
        assert_eq!(queue.length(), queue.snapshot().len());
    }

    #[test]
    fn pop_removes_best_and_shrinks_length() {
        let queue = PriorityMacQueue::new(ScoreWeights::new(0.0, 1.0));
        queue.upsert(mac(1), 1.0).unwrap();
        queue.upsert(mac(2), 2.0).unwrap();

        assert_eq!(queue.peek().unwrap(), Some(mac(2)));
        assert_eq!(queue.length(), 2);
        assert_eq!(queue.pop().unwrap(), Some(mac(2)));
        assert_eq!(queue.length(), 1);
        assert!(queue.get(&mac(2)).is_none());
        assert_eq!(queue.pop().unwrap(), Some(mac(1)));
        assert_eq!(queue.pop().unwrap(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn shutdown_closes_and_initialize_reopens() {
        let queue = PriorityMacQueue::default();
        queue.upsert(mac(1), 1.0).unwrap();
        queue.shutdown();

        assert!(!queue.is_open());
        assert_eq!(queue.length(), 0);
        assert_eq!(queue.upsert(mac(1), 1.0), Err(QueueError::Closed));
        assert_eq!(queue.peek(), Err(QueueError::Closed));
        assert_eq!(queue.pop(), Err(QueueError::Closed));
        assert!(queue.snapshot().is_empty());
        assert!(queue.get(&mac(1)).is_none());

        queue.initialize();
        assert!(queue.is_open());
        assert_eq!(queue.pop(), Ok(None));
        queue.upsert(mac(1), 1.0).unwrap();
        assert_eq!(queue.length(), 1);
    }

    #[test]
    fn initialize_clears_entries() {
        let queue = PriorityMacQueue::default();
        queue.upsert(mac(1), 1.0).unwrap();
        queue.initialize();
        assert!(queue.is_empty());
        assert_eq!(queue.peek(), Ok(None));
    }

    #[test]
    fn wait_for_length_returns_when_populated() {
        let queue = PriorityMacQueue::default();
        queue.upsert(mac(1), 1.0).unwrap();
        queue.upsert(mac(2), 1.0).unwrap();
        queue
            .wait_for_length(2, Duration::from_millis(5), None)
            .unwrap();
    }

    #[test]
    fn wait_for_length_observes_cancel() {
        let queue = PriorityMacQueue::default();
        let flag = new_flag();
        cancel(&flag);

        let err = queue
            .wait_for_length(5, Duration::from_millis(5), Some(&flag))
            .unwrap_err();
        assert!(is_cancelled(&err));
    }

    #[test]
    fn wait_for_length_fails_when_closed() {
        let queue = PriorityMacQueue::default();
        queue.shutdown();
        let err = queue
            .wait_for_length(1, Duration::from_millis(5), None)
            .unwrap_err();
        assert_eq!(err.downcast_ref::<QueueError>(), Some(&QueueError::Closed));
    }
}
