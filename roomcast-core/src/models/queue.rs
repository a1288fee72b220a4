use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::ids::ConnectionId;
use crate::models::stream::Stream;

/// Shared handle to a `Stream`.
///
/// Owned strongly by whichever queue or playback slot currently holds it;
/// the `Stream` itself only ever points back at its referrers by id.
pub type StreamRef = Arc<Mutex<Stream>>;

/// Reorder `items` according to `new_order`.
///
/// `new_order` lists original indices in their desired new relative
/// position. It may be shorter than `items` (only the first `new_order.len()`
/// slots are pinned; the rest keep their original relative order appended at
/// the end) but every index it contains must be in range and appear at most
/// once, even among entries beyond what ends up placed.
pub fn reorder_by_indices<T>(items: Vec<T>, new_order: &[usize]) -> Result<Vec<T>> {
    let size = items.len();
    let mut seen = HashSet::with_capacity(new_order.len());
    for &idx in new_order {
        if idx >= size {
            return Err(Error::ReorderRange);
        }
        if !seen.insert(idx) {
            return Err(Error::ReorderDuplicate);
        }
    }

    let take = new_order.len().min(size);
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut result = Vec::with_capacity(size);
    for &idx in &new_order[..take] {
        result.push(slots[idx].take().expect("index validated unique above"));
    }
    for slot in slots {
        if let Some(item) = slot {
            result.push(item);
        }
    }
    Ok(result)
}

/// A single owner's FIFO submission queue, capped at a fixed capacity.
///
/// One of these exists per connection that has submitted at least one
/// stream to a room; `RoundRobinQueue` dispenses fairly across however many
/// are currently non-empty.
#[derive(Debug)]
pub struct AggregatableQueue {
    owner: ConnectionId,
    capacity: usize,
    items: VecDeque<StreamRef>,
}

impl AggregatableQueue {
    #[must_use]
    pub fn new(owner: ConnectionId, capacity: usize) -> Self {
        Self {
            owner,
            capacity,
            items: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, stream: StreamRef) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(Error::QueueFull);
        }
        self.items.push_back(stream);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Result<StreamRef> {
        self.items.pop_front().ok_or(Error::QueueEmpty)
    }

    /// Remove and return a specific item by stream id, wherever it sits in
    /// the queue.
    pub fn delete(&mut self, stream_id: &str) -> Result<StreamRef> {
        let pos = self
            .items
            .iter()
            .position(|item| item.lock().id() == stream_id)
            .ok_or(Error::NotFound)?;
        Ok(self.items.remove(pos).expect("position just located"))
    }

    pub fn reorder(&mut self, new_order: &[usize]) -> Result<()> {
        let items: Vec<StreamRef> = self.items.drain(..).collect();
        let reordered = reorder_by_indices(items, new_order)?;
        self.items = reordered.into();
        Ok(())
    }

    #[must_use]
    pub fn list(&self) -> Vec<StreamRef> {
        self.items.iter().cloned().collect()
    }

    /// Drain every item, returning them in order. Used when a room clears a
    /// single owner's contributions.
    pub fn drain(&mut self) -> Vec<StreamRef> {
        self.items.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stream(url: &str) -> StreamRef {
        Arc::new(Mutex::new(Stream::new(url.to_string(), None)))
    }

    #[test]
    fn reorder_moves_pinned_indices_to_front_and_appends_the_rest() {
        let items = vec!["a", "b", "c", "d"];
        let result = reorder_by_indices(items, &[3, 1]).unwrap();
        assert_eq!(result, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn reorder_full_permutation() {
        let items = vec!["a", "b", "c", "d"];
        let result = reorder_by_indices(items, &[3, 1, 2, 0]).unwrap();
        assert_eq!(result, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn reorder_rejects_duplicates_and_out_of_range() {
        let items = vec!["a", "b"];
        assert_eq!(
            reorder_by_indices(items.clone(), &[0, 0]).unwrap_err(),
            Error::ReorderDuplicate
        );
        assert_eq!(
            reorder_by_indices(items, &[5]).unwrap_err(),
            Error::ReorderRange
        );
    }

    #[test]
    fn queue_respects_capacity() {
        let mut queue = AggregatableQueue::new(ConnectionId::new(), 1);
        queue.push(make_stream("a")).unwrap();
        assert_eq!(queue.push(make_stream("b")).unwrap_err(), Error::QueueFull);
    }

    #[test]
    fn delete_finds_item_anywhere_in_queue() {
        let mut queue = AggregatableQueue::new(ConnectionId::new(), 5);
        queue.push(make_stream("a")).unwrap();
        queue.push(make_stream("b")).unwrap();
        let removed = queue.delete("a").unwrap();
        assert_eq!(removed.lock().id(), "a");
        assert_eq!(queue.len(), 1);
        assert!(queue.delete("a").is_err());
    }
}
