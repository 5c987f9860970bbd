//! Held connections and response bookkeeping records.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use bosh_types::{BodyElement, Rid, StreamId};

use crate::timer::TimerId;
use crate::transport::ResponseHandle;

/// One held HTTP response: the long-poll slot belonging to `rid`.
pub struct HeldConnection {
    /// RID of the request this connection arrived on.
    pub rid: Rid,
    /// The transport's write handle.
    pub handle: Box<dyn ResponseHandle>,
    /// Wait timer, cancelled when the slot is consumed by a send.
    pub wait_timer: TimerId,
}

impl fmt::Debug for HeldConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldConnection")
            .field("rid", &self.rid)
            .field("wait_timer", &self.wait_timer)
            .finish_non_exhaustive()
    }
}

/// A session's held connections, kept sorted ascending by RID.
///
/// Requests can arrive out of RID order, so insertion is positional rather
/// than append-only; consumption is always oldest-RID-first.
#[derive(Debug, Default)]
pub struct HeldQueue {
    slots: VecDeque<HeldConnection>,
}

impl HeldQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Inserts a slot, keeping ascending-RID order.
    pub fn insert(&mut self, slot: HeldConnection) {
        let pos = self
            .slots
            .iter()
            .position(|held| held.rid > slot.rid)
            .unwrap_or(self.slots.len());
        self.slots.insert(pos, slot);
        debug_assert!(self.is_sorted());
    }

    /// Removes and returns the slot with the lowest RID.
    pub fn pop_oldest(&mut self) -> Option<HeldConnection> {
        self.slots.pop_front()
    }

    /// Removes the slot held for `rid`, if present.
    pub fn remove_by_rid(&mut self, rid: Rid) -> Option<HeldConnection> {
        let pos = self.slots.iter().position(|held| held.rid == rid)?;
        self.slots.remove(pos)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeldConnection> {
        self.slots.iter()
    }

    /// True when slots are in ascending RID order. Always holds; exposed for
    /// property tests.
    pub fn is_sorted(&self) -> bool {
        self.slots
            .iter()
            .zip(self.slots.iter().skip(1))
            .all(|(a, b)| a.rid <= b.rid)
    }
}

/// A response waiting for a free held connection.
#[derive(Debug)]
pub struct PendingResponse {
    /// The wrapper to deliver.
    pub body: BodyElement,
    /// The stream this response belongs to, when known.
    pub stream: Option<StreamId>,
}

/// A response sent but not yet acknowledged by the client.
#[derive(Debug, Clone)]
pub struct UnackedResponse {
    /// The wrapper exactly as sent, for verbatim redelivery.
    pub body: BodyElement,
    /// When it went out, for loss-report timing.
    pub sent_at: Instant,
}
