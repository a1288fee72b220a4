use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::ids::ConnectionId;
use crate::models::queue::{reorder_by_indices, AggregatableQueue, StreamRef};

/// Fair-share dispenser over a room's per-owner `AggregatableQueue`s.
///
/// `rr` points at the sub-queue due to serve next. A map from owner to list
/// position backs lookups for push-merge and direct manipulation; it is
/// rebuilt after every structural change rather than maintained
/// incrementally, since room-scale queue counts make that cheap and the
/// alternative invites the map and list drifting out of sync.
#[derive(Debug, Default)]
pub struct RoundRobinQueue {
    list: Vec<AggregatableQueue>,
    index: HashMap<ConnectionId, usize>,
    rr: usize,
}

impl RoundRobinQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            list: Vec::new(),
            index: HashMap::new(),
            rr: 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[must_use]
    pub fn owners(&self) -> Vec<ConnectionId> {
        self.list.iter().map(AggregatableQueue::owner).collect()
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .list
            .iter()
            .enumerate()
            .map(|(i, q)| (q.owner(), i))
            .collect();
    }

    /// Merge a sub-queue into the rotation.
    ///
    /// If `owner` already has a sub-queue, its items are appended to the
    /// existing one, respecting capacity; any that don't fit are collected
    /// into `Error::Multiple` rather than silently dropped. Otherwise the
    /// new sub-queue is inserted at the current `rr` slot (pushing whatever
    /// was serving there, and everything after it, one place right) and
    /// `rr` is incremented so the slot that was about to serve keeps
    /// serving — the newcomer joins at the back of the current rotation.
    pub fn push(&mut self, mut incoming: AggregatableQueue) -> Result<()> {
        if let Some(&pos) = self.index.get(&incoming.owner()) {
            let existing = &mut self.list[pos];
            let mut errors = Vec::new();
            while let Ok(item) = incoming.pop_front() {
                if let Err(e) = existing.push(item) {
                    errors.push(e);
                }
            }
            return if errors.is_empty() {
                Ok(())
            } else {
                Err(Error::Multiple(errors))
            };
        }

        if self.list.is_empty() {
            self.list.push(incoming);
            self.rr = 0;
        } else {
            let insert_pos = self.rr.min(self.list.len());
            self.list.insert(insert_pos, incoming);
            self.rr += 1;
        }
        self.rebuild_index();
        Ok(())
    }

    /// Add a single item to `owner`'s sub-queue, creating one via [`push`]
    /// if this is their first submission.
    pub fn push_item(&mut self, owner: ConnectionId, item: StreamRef, capacity: usize) -> Result<()> {
        if let Some(&pos) = self.index.get(&owner) {
            self.list[pos].push(item)
        } else {
            let mut fresh = AggregatableQueue::new(owner, capacity);
            fresh.push(item)?;
            self.push(fresh)
        }
    }

    /// Remove a specific item from `owner`'s sub-queue by stream id.
    pub fn remove_item(&mut self, owner: &ConnectionId, stream_id: &str) -> Result<StreamRef> {
        let &pos = self.index.get(owner).ok_or(Error::NotFound)?;
        let item = self.list[pos].delete(stream_id)?;
        if self.list[pos].is_empty() {
            self.remove_at(pos);
        }
        Ok(item)
    }

    /// Drain every item from `owner`'s sub-queue without removing the
    /// sub-queue from the rotation (the next dispense naturally reaps it).
    pub fn drain_owner(&mut self, owner: &ConnectionId) -> Vec<StreamRef> {
        match self.index.get(owner) {
            Some(&pos) => self.list[pos].drain(),
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn owner_queue(&self, owner: &ConnectionId) -> Option<&AggregatableQueue> {
        self.index.get(owner).map(|&pos| &self.list[pos])
    }

    pub fn owner_queue_mut(&mut self, owner: &ConnectionId) -> Option<&mut AggregatableQueue> {
        let pos = *self.index.get(owner)?;
        Some(&mut self.list[pos])
    }

    /// Dispense the next item in round-robin order, skipping and reaping
    /// any sub-queue that has gone empty.
    pub fn next(&mut self) -> Result<StreamRef> {
        loop {
            if self.list.is_empty() {
                return Err(Error::QueueEmpty);
            }
            if self.rr >= self.list.len() {
                self.rr = 0;
            }
            if self.list[self.rr].is_empty() {
                self.remove_at(self.rr);
                continue;
            }
            let item = self.list[self.rr].pop_front()?;
            if self.list[self.rr].is_empty() {
                self.remove_at(self.rr);
            } else {
                self.rr = (self.rr + 1) % self.list.len();
            }
            return Ok(item);
        }
    }

    /// For each non-empty sub-queue, its head item, in list order.
    #[must_use]
    pub fn peek_items(&self) -> Vec<StreamRef> {
        self.list
            .iter()
            .filter_map(|q| q.list().first().cloned())
            .collect()
    }

    /// [`peek_items`](Self::peek_items), rotated so the sub-queue currently
    /// at `rr` appears first — the order in which they'll actually be
    /// served.
    #[must_use]
    pub fn serialize_peek(&self) -> Vec<StreamRef> {
        if self.list.is_empty() {
            return Vec::new();
        }
        let peeked = self.peek_items();
        let mut rotated = Vec::with_capacity(peeked.len());
        rotated.extend_from_slice(&peeked[self.rr.min(peeked.len())..]);
        rotated.extend_from_slice(&peeked[..self.rr.min(peeked.len())]);
        rotated
    }

    /// Reorder the sub-queue rotation itself (not the items within any one
    /// sub-queue). Does not adjust `rr`; whichever owner now sits at the old
    /// `rr` index serves next, by design — reordering the rotation doesn't
    /// reset whose turn it is.
    pub fn reorder(&mut self, new_order: &[usize]) -> Result<()> {
        let list = std::mem::take(&mut self.list);
        self.list = reorder_by_indices(list, new_order)?;
        if self.rr >= self.list.len() {
            self.rr = 0;
        }
        self.rebuild_index();
        Ok(())
    }

    fn remove_at(&mut self, idx: usize) {
        self.list.remove(idx);
        if idx < self.rr {
            self.rr -= 1;
        }
        if self.list.is_empty() || self.rr >= self.list.len() {
            self.rr = 0;
        }
        self.rebuild_index();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stream::Stream;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn item(url: &str) -> StreamRef {
        Arc::new(Mutex::new(Stream::new(url.to_string(), None)))
    }

    #[test]
    fn dispenses_round_robin_and_reaps_empties() {
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let mut rr = RoundRobinQueue::new();
        rr.push_item(alice, item("s1"), 20).unwrap();
        rr.push_item(bob, item("s2"), 20).unwrap();
        rr.push_item(bob, item("s3"), 20).unwrap();

        let first = rr.next().unwrap();
        assert_eq!(first.lock().id(), "s1");
        assert_eq!(rr.owners(), vec![bob]);

        let second = rr.next().unwrap();
        assert_eq!(second.lock().id(), "s2");
        assert_eq!(rr.owners(), vec![bob]);

        let third = rr.next().unwrap();
        assert_eq!(third.lock().id(), "s3");
        assert!(rr.is_empty());

        assert_eq!(rr.next().unwrap_err(), Error::QueueEmpty);
    }

    #[test]
    fn new_owner_joins_behind_the_currently_serving_slot() {
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let carol = ConnectionId::new();
        let mut rr = RoundRobinQueue::new();
        rr.push_item(alice, item("a"), 20).unwrap();
        rr.push_item(bob, item("b"), 20).unwrap();
        // advance so bob is about to serve
        rr.next().unwrap();
        rr.push_item(carol, item("c"), 20).unwrap();
        // bob should still serve next, unaffected by carol's insertion
        let next = rr.next().unwrap();
        assert_eq!(next.lock().id(), "b");
    }

    #[test]
    fn reorder_does_not_reset_whose_turn_it_is() {
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let mut rr = RoundRobinQueue::new();
        rr.push_item(alice, item("a"), 20).unwrap();
        rr.push_item(bob, item("b"), 20).unwrap();
        // pre-reorder rotation is [bob, alice] (bob joined behind alice's
        // serving slot); reversing it yields [alice, bob].
        rr.reorder(&[1, 0]).unwrap();
        assert_eq!(rr.owners(), vec![alice, bob]);
    }

    #[test]
    fn serialize_peek_rotates_so_rr_is_first() {
        let alice = ConnectionId::new();
        let bob = ConnectionId::new();
        let mut rr = RoundRobinQueue::new();
        rr.push_item(alice, item("a"), 20).unwrap();
        rr.push_item(bob, item("b"), 20).unwrap();
        // list is [bob, alice] with rr=1 (alice serves next)
        let rotated = rr.serialize_peek();
        let ids: Vec<_> = rotated.iter().map(|s| s.lock().id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
