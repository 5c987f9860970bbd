//! Deterministic timer wheel for session and held-connection timeouts.
//!
//! Timers never capture state or run callbacks. Arming returns an opaque
//! [`TimerId`]; firing is driven explicitly by the registry's scheduling turn
//! via [`TimerWheel::pop_due`], and the registry validates each fired entry
//! against current session membership before acting on it. Tests therefore
//! control time completely.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Display;
use std::time::Instant;

use bosh_types::{Rid, Sid};

/// Opaque handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// What an armed timer means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Session-wide idle timeout.
    Inactivity {
        /// The session to reap when this fires.
        sid: Sid,
    },
    /// Long-poll expiry for the held connection at `rid`.
    Wait {
        /// The session holding the connection.
        sid: Sid,
        /// The RID whose slot should be released with an empty body.
        rid: Rid,
    },
}

/// Min-heap of deadlines with lazy cancellation.
///
/// Cancelling removes the live entry but leaves a tombstone in the heap;
/// [`pop_due`](Self::pop_due) and [`next_deadline`](Self::next_deadline) skip
/// tombstones as they surface.
pub struct TimerWheel {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, TimerKind>,
    next_id: u64,
}

impl TimerWheel {
    /// Creates an empty wheel.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Arms a timer for `deadline`.
    pub fn arm(&mut self, deadline: Instant, kind: TimerKind) -> TimerId {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.heap.push(Reverse((deadline, id)));
        self.entries.insert(id, kind);
        TimerId(id)
    }

    /// Cancels an armed timer. Returns false when it already fired or was
    /// cancelled before.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id.0).is_some()
    }

    /// Pops the next timer whose deadline is at or before `now`, skipping
    /// cancelled entries.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, TimerKind)> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            self.heap.pop();
            if let Some(kind) = self.entries.remove(&id) {
                return Some((TimerId(id), kind));
            }
            // Tombstone of a cancelled timer; keep draining.
        }
        None
    }

    /// Earliest live deadline, for sizing a poll timeout.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.entries.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Number of live (armed, uncancelled) timers.
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}
