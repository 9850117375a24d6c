//! Cancellable delayed tasks.
//!
//! A [`TimerService`] stores deadlines keyed by caller-defined values. It never
//! sleeps: the driver asks for [`TimerService::next_deadline`], waits until
//! then, and calls [`TimerService::fire_due`] with the current time.
//!
//! # Invariants
//!
//! - Cancellation is immediate. A cancelled [`TimerId`] is removed from the
//!   pending set and can never be returned by `fire_due`.
//! - Ids are never reused, so a stale id held by a caller cannot cancel a newer
//!   timer.
//! - `fire_due` returns timers in deadline order, ties broken by scheduling
//!   order.

use std::{collections::BTreeMap, fmt, time::Duration};

use crate::env::Moment;

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Pending<K, I> {
    key: K,
    deadline: I,
}

/// Set of pending one-shot timers.
#[derive(Debug, Clone)]
pub struct TimerService<K, I> {
    next_id: u64,
    pending: BTreeMap<TimerId, Pending<K, I>>,
}

impl<K, I> Default for TimerService<K, I> {
    fn default() -> Self {
        Self { next_id: 0, pending: BTreeMap::new() }
    }
}

impl<K, I: Moment> TimerService<K, I> {
    /// Create an empty timer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `key` to fire at `deadline`.
    pub fn schedule(&mut self, key: K, deadline: I) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, Pending { key, deadline });
        id
    }

    /// Schedule `key` to fire `delay` after `now`.
    pub fn schedule_after(&mut self, key: K, now: I, delay: Duration) -> TimerId {
        self.schedule(key, now + delay)
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    /// Whether `id` is still waiting to fire.
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Deadline of a pending timer.
    pub fn deadline(&self, id: TimerId) -> Option<I> {
        self.pending.get(&id).map(|p| p.deadline)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<I> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every timer whose deadline is at or before `now`.
    pub fn fire_due(&mut self, now: I) -> Vec<(TimerId, K)> {
        let mut due: Vec<(I, TimerId)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, p)| (p.deadline, *id))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, id)| self.pending.remove(&id).map(|p| (id, p.key)))
            .collect()
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn fires_only_when_due() {
        let t0 = Instant::now();
        let mut timers = TimerService::new();
        let id = timers.schedule_after("retry", t0, 3000 * MS);

        assert!(timers.fire_due(t0 + 2999 * MS).is_empty());
        assert_eq!(timers.fire_due(t0 + 3000 * MS), vec![(id, "retry")]);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let t0 = Instant::now();
        let mut timers = TimerService::new();
        let id = timers.schedule_after("idle", t0, 10 * MS);

        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert!(timers.fire_due(t0 + 100 * MS).is_empty());
    }

    #[test]
    fn fires_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = TimerService::new();
        let late = timers.schedule_after('b', t0, 20 * MS);
        let early = timers.schedule_after('a', t0, 10 * MS);
        let tie = timers.schedule_after('c', t0, 20 * MS);

        assert_eq!(timers.next_deadline(), Some(t0 + 10 * MS));
        assert_eq!(timers.fire_due(t0 + 50 * MS), vec![(early, 'a'), (late, 'b'), (tie, 'c')]);
    }

    #[test]
    fn ids_are_not_reused() {
        let t0 = Instant::now();
        let mut timers = TimerService::new();
        let first = timers.schedule_after((), t0, MS);
        timers.cancel(first);
        let second = timers.schedule_after((), t0, MS);

        assert_ne!(first, second);
        assert!(!timers.cancel(first));
        assert!(timers.is_pending(second));
    }
}
