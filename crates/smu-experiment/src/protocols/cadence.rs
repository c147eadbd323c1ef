//! Anchored sampling schedule for time-based protocols.
//!
//! Slot `k` is due at `origin + k·interval` and exists while
//! `k·interval < duration`. After a sample finishes at elapsed `e`, the next
//! slot is the first whose deadline is not yet behind `e`; slots the engine
//! ran past are skipped, never replayed in a burst.

use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct Cadence {
    interval: Duration,
    duration: Duration,
    slot: u64,
}

impl Cadence {
    pub(crate) fn new(interval: Duration, duration: Duration) -> Self {
        Self {
            interval,
            duration,
            slot: 0,
        }
    }

    /// Offset from the origin of the pending slot, `None` once the schedule
    /// is exhausted.
    pub(crate) fn due(&self) -> Option<Duration> {
        let k = u32::try_from(self.slot).ok()?;
        let offset = self.interval.checked_mul(k)?;
        (offset < self.duration).then_some(offset)
    }

    /// Move past the slot just sampled, skipping any slot whose deadline is
    /// already behind `elapsed`.
    pub(crate) fn advance(&mut self, elapsed: Duration) {
        let interval = self.interval.as_nanos().max(1);
        let reached = elapsed.as_nanos().div_ceil(interval);
        let reached = u64::try_from(reached).unwrap_or(u64::MAX);
        self.slot = (self.slot + 1).max(reached);
    }

    /// Slots in a schedule that is never late.
    pub(crate) fn nominal_slots(&self) -> u64 {
        let interval = self.interval.as_nanos().max(1);
        u64::try_from(self.duration.as_nanos().div_ceil(interval)).unwrap_or(u64::MAX)
    }
}
