use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::ids::{ConnectionId, RoomName};
use crate::models::queue::{AggregatableQueue, StreamRef};
use crate::models::round_robin::RoundRobinQueue;
use crate::models::timer::{Timer, TimerStatus};

struct PlaybackState {
    current: Option<StreamRef>,
    queue: RoundRobinQueue,
    started_by: Option<ConnectionId>,
    last_admin_departure: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
}

/// A snapshot of a room's playback, shaped for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStatus {
    pub queue_length: usize,
    pub started_by: Option<ConnectionId>,
    pub created_by: Option<ConnectionId>,
    pub stream_url: Option<String>,
    pub timer: TimerStatus,
}

/// A room's playback: the currently-loaded stream, its clock, and the
/// fair-share submission queue feeding it.
///
/// `current` and `queue` share one mutex so that a stream swap (dropping
/// the old stream's parent ref, adopting the new one, and possibly
/// autoplaying) happens as a single atomic step — no command interleaves
/// with "load the next stream" partway through. Admin status itself lives
/// in the room's `Authorizer`, not here; `last_admin_departure` only
/// tracks the grace-window clock the admin picker reads.
pub struct Playback {
    pub room: RoomName,
    pub timer: Timer,
    state: Mutex<PlaybackState>,
    queue_capacity: usize,
}

impl Playback {
    #[must_use]
    pub fn new(room: RoomName, tick_period: Duration, queue_capacity: usize) -> Self {
        Self {
            room,
            timer: Timer::new(tick_period),
            state: Mutex::new(PlaybackState {
                current: None,
                queue: RoundRobinQueue::new(),
                started_by: None,
                last_admin_departure: None,
                last_updated: Utc::now(),
            }),
            queue_capacity,
        }
    }

    #[must_use]
    pub fn current(&self) -> Option<StreamRef> {
        self.state.lock().current.clone()
    }

    #[must_use]
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.state.lock().last_updated
    }

    #[must_use]
    pub fn idle_for(&self) -> chrono::Duration {
        Utc::now() - self.last_updated()
    }

    #[must_use]
    pub fn last_admin_departure(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_admin_departure
    }

    /// Record that the room's last admin connection just left. Read by the
    /// admin picker's grace-window check.
    pub fn mark_admin_departed(&self) {
        self.state.lock().last_admin_departure = Some(Utc::now());
    }

    /// Whether the admin-election grace window has elapsed: either no
    /// admin has ever departed, or at least `grace` has passed since.
    #[must_use]
    pub fn admin_grace_elapsed(&self, grace: Duration) -> bool {
        match self.last_admin_departure() {
            None => true,
            Some(departed) => {
                Utc::now() - departed
                    >= chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::zero())
            }
        }
    }

    fn touch(state: &mut PlaybackState) {
        state.last_updated = Utc::now();
    }

    fn require_loaded(state: &PlaybackState) -> Result<()> {
        if state.current.is_some() {
            Ok(())
        } else {
            Err(Error::NoStreamLoaded)
        }
    }

    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        let state = self.state.lock();
        PlaybackStatus {
            queue_length: state.queue.owners().len(),
            started_by: state.started_by,
            created_by: state.current.as_ref().and_then(|s| s.lock().creation_source),
            stream_url: state.current.as_ref().map(|s| s.lock().id().to_string()),
            timer: self.timer.status(),
        }
    }

    /// Replace the currently-loaded stream, releasing the previous one's
    /// parent ref on this room and adopting the new one's. `startedBy` is
    /// taken from the stream's labelled ref for this room if present, else
    /// left unset. Resets the clock to stopped; does not itself start
    /// playback — callers that want autoplay call `play` afterward, same
    /// as the command table's "set/load" vs. "play" distinction.
    pub fn set_stream(&self, stream: StreamRef, submitter: Option<ConnectionId>) {
        let mut state = self.state.lock();
        if let Some(old) = state.current.take() {
            old.lock().remove_parent_ref(&self.room);
        }
        {
            let mut s = stream.lock();
            s.add_parent_ref(self.room.clone());
            if let Some(sub) = submitter {
                s.set_labelled_ref(self.room.clone(), sub);
            }
        }
        state.started_by = stream.lock().labelled_ref(&self.room);
        state.current = Some(stream);
        Self::touch(&mut state);
        self.timer.stop();
    }

    /// Advance to the next queued item and start it playing, in the same
    /// atomic swap-and-play step as [`set_stream`] followed by [`play`].
    /// The dequeued item already carries its parent/labelled refs from
    /// when it was submitted.
    pub fn play_next(&self) -> Result<StreamRef> {
        let mut state = self.state.lock();
        let next = state.queue.next()?;
        if let Some(old) = state.current.take() {
            old.lock().remove_parent_ref(&self.room);
        }
        state.started_by = next.lock().labelled_ref(&self.room);
        state.current = Some(Arc::clone(&next));
        Self::touch(&mut state);
        self.timer.stop();
        self.timer.play();
        Ok(next)
    }

    pub fn play(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::require_loaded(&state)?;
        Self::touch(&mut state);
        self.timer.play();
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::require_loaded(&state)?;
        Self::touch(&mut state);
        self.timer.pause();
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        Self::require_loaded(&state)?;
        Self::touch(&mut state);
        self.timer.stop();
        Ok(())
    }

    pub fn seek(&self, time: f64) -> Result<()> {
        let mut state = self.state.lock();
        Self::require_loaded(&state)?;
        Self::touch(&mut state);
        self.timer.set(time);
        Ok(())
    }

    pub fn add_to_queue(&self, owner: ConnectionId, stream: StreamRef) -> Result<()> {
        {
            let mut s = stream.lock();
            s.add_parent_ref(self.room.clone());
            s.set_labelled_ref(self.room.clone(), owner);
        }
        let mut state = self.state.lock();
        let result = state.queue.push_item(owner, stream, self.queue_capacity);
        Self::touch(&mut state);
        result
    }

    pub fn remove_from_queue(&self, owner: &ConnectionId, stream_id: &str) -> Result<StreamRef> {
        let mut state = self.state.lock();
        let removed = state.queue.remove_item(owner, stream_id)?;
        Self::touch(&mut state);
        drop(state);
        {
            let mut s = removed.lock();
            s.remove_parent_ref(&self.room);
            s.remove_labelled_ref(&self.room);
        }
        Ok(removed)
    }

    pub fn reorder_my_queue(&self, owner: &ConnectionId, new_order: &[usize]) -> Result<()> {
        let mut state = self.state.lock();
        let sub_queue = state.queue.owner_queue_mut(owner).ok_or(Error::NotFound)?;
        sub_queue.reorder(new_order)?;
        Self::touch(&mut state);
        Ok(())
    }

    pub fn reorder_room_queue(&self, new_order: &[usize]) -> Result<()> {
        let mut state = self.state.lock();
        state.queue.reorder(new_order)?;
        Self::touch(&mut state);
        Ok(())
    }

    /// Drain one owner's sub-queue, dropping each item's refs on this room.
    pub fn clear_user_queue(&self, owner: &ConnectionId) -> Vec<StreamRef> {
        let mut state = self.state.lock();
        let drained = state.queue.drain_owner(owner);
        Self::touch(&mut state);
        drop(state);
        for item in &drained {
            let mut s = item.lock();
            s.remove_parent_ref(&self.room);
            s.remove_labelled_ref(&self.room);
        }
        drained
    }

    /// Drain every owner's sub-queue.
    pub fn clear_queue(&self) -> Vec<StreamRef> {
        let mut state = self.state.lock();
        let owners = state.queue.owners();
        let mut all = Vec::new();
        for owner in owners {
            all.extend(state.queue.drain_owner(&owner));
        }
        Self::touch(&mut state);
        drop(state);
        for item in &all {
            let mut s = item.lock();
            s.remove_parent_ref(&self.room);
            s.remove_labelled_ref(&self.room);
        }
        all
    }

    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<(ConnectionId, Vec<StreamRef>)> {
        let state = self.state.lock();
        state
            .queue
            .owners()
            .into_iter()
            .filter_map(|owner| state.queue.owner_queue(&owner).map(|q| (owner, q.list())))
            .collect()
    }

    /// The room's queue as the client will see it: one head item per
    /// non-empty owner, rotated so whoever serves next appears first.
    #[must_use]
    pub fn room_queue_peek(&self) -> Vec<StreamRef> {
        self.state.lock().queue.serialize_peek()
    }

    /// One owner's full sub-queue, in order.
    #[must_use]
    pub fn owner_queue_list(&self, owner: &ConnectionId) -> Vec<StreamRef> {
        self.state
            .lock()
            .queue
            .owner_queue(owner)
            .map(AggregatableQueue::list)
            .unwrap_or_default()
    }

    /// Tear down this room's playback entirely: drop the labelled ref on
    /// the current stream, stop and clear the timer, and drain every
    /// sub-queue. Used by the playback reaper.
    pub fn cleanup(&self) -> Vec<StreamRef> {
        let mut state = self.state.lock();
        if let Some(current) = state.current.take() {
            let mut s = current.lock();
            s.remove_parent_ref(&self.room);
            s.remove_labelled_ref(&self.room);
        }
        let owners = state.queue.owners();
        let mut drained = Vec::new();
        for owner in owners {
            drained.extend(state.queue.drain_owner(&owner));
        }
        state.started_by = None;
        drop(state);
        self.timer.stop();
        for item in &drained {
            let mut s = item.lock();
            s.remove_parent_ref(&self.room);
            s.remove_labelled_ref(&self.room);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stream::Stream;

    fn stream(url: &str) -> StreamRef {
        Arc::new(Mutex::new(Stream::new(url.to_string(), None)))
    }

    #[test]
    fn commands_require_a_loaded_stream() {
        let playback = Playback::new(RoomName::from("lobby"), Duration::from_secs(1), 20);
        assert_eq!(playback.play().unwrap_err(), Error::NoStreamLoaded);
        assert_eq!(playback.pause().unwrap_err(), Error::NoStreamLoaded);
        assert_eq!(playback.seek(5.0).unwrap_err(), Error::NoStreamLoaded);
    }

    #[test]
    fn set_stream_swaps_parent_refs() {
        let room = RoomName::from("lobby");
        let playback = Playback::new(room.clone(), Duration::from_secs(1), 20);
        let first = stream("a");
        let second = stream("b");
        playback.set_stream(first.clone(), None);
        assert!(first.lock().has_parent_refs());

        playback.set_stream(second.clone(), None);
        assert!(!first.lock().has_parent_refs());
        assert!(second.lock().has_parent_refs());
    }

    #[test]
    fn queue_and_play_next_roundtrip() {
        let room = RoomName::from("lobby");
        let playback = Playback::new(room, Duration::from_secs(1), 20);
        let owner = ConnectionId::new();
        playback.add_to_queue(owner, stream("a")).unwrap();
        let next = playback.play_next().unwrap();
        assert_eq!(next.lock().id(), "a");
        assert_eq!(playback.current().unwrap().lock().id(), "a");
        assert_eq!(playback.status().started_by, Some(owner));
    }

    #[test]
    fn remove_from_queue_drops_refs() {
        let room = RoomName::from("lobby");
        let playback = Playback::new(room, Duration::from_secs(1), 20);
        let owner = ConnectionId::new();
        let item = stream("a");
        playback.add_to_queue(owner, item.clone()).unwrap();
        playback.remove_from_queue(&owner, "a").unwrap();
        assert!(!item.lock().has_parent_refs());
    }

    #[test]
    fn cleanup_releases_current_and_queued_streams() {
        let room = RoomName::from("lobby");
        let playback = Playback::new(room, Duration::from_secs(1), 20);
        let owner = ConnectionId::new();
        let current = stream("a");
        let queued = stream("b");
        playback.set_stream(current.clone(), None);
        playback.add_to_queue(owner, queued.clone()).unwrap();

        playback.cleanup();

        assert!(!current.lock().has_parent_refs());
        assert!(!queued.lock().has_parent_refs());
        assert!(playback.current().is_none());
    }

    #[test]
    fn admin_grace_window() {
        let playback = Playback::new(RoomName::from("lobby"), Duration::from_secs(1), 20);
        assert!(playback.admin_grace_elapsed(Duration::from_secs(180)));
        playback.mark_admin_departed();
        assert!(!playback.admin_grace_elapsed(Duration::from_secs(180)));
    }
}
