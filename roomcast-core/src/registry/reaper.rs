use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::models::namespace::Namespace;
use crate::registry::stream_registry::StreamRegistry;

/// A background scan loop, torn down the same way [`crate::models::timer::Timer`]
/// tears down its ticker: a bounded, capacity-one stop channel rather than
/// an abort handle, so a scan already in flight always finishes.
pub struct ReaperHandle {
    stop_tx: mpsc::Sender<()>,
}

impl ReaperHandle {
    /// Wrap an already-spawned loop's stop sender. Used by other periodic
    /// loops (the admin picker) that follow this same teardown shape.
    #[must_use]
    pub fn from_stop_tx(stop_tx: mpsc::Sender<()>) -> Self {
        Self { stop_tx }
    }

    /// Signal the loop to stop after its current iteration.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(()).await;
    }
}

/// Periodically reaps rooms that have had zero connections for at least
/// `reap_age` and evicts stream registry entries idle for the same.
pub struct RoomReaper {
    namespace: Arc<Namespace>,
    streams: Arc<StreamRegistry>,
    interval: Duration,
    reap_age: chrono::Duration,
}

impl RoomReaper {
    #[must_use]
    pub fn new(namespace: Arc<Namespace>, streams: Arc<StreamRegistry>, interval: Duration, reap_age: Duration) -> Self {
        Self {
            namespace,
            streams,
            interval,
            reap_age: chrono::Duration::from_std(reap_age).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Run one scan pass, returning the room names and stream urls reaped.
    pub fn scan_once(&self) -> (Vec<String>, Vec<String>) {
        let mut reaped_rooms = Vec::new();
        for name in self.namespace.room_names() {
            let Some(room) = self.namespace.get(&name) else {
                continue;
            };
            if self.namespace.is_reapable(&name) && room.playback.idle_for() >= self.reap_age {
                self.namespace.reap(&name);
                reaped_rooms.push(name.to_string());
            }
        }
        let reaped_streams = self.streams.reap_idle(self.reap_age);
        if !reaped_rooms.is_empty() || !reaped_streams.is_empty() {
            info!(rooms = reaped_rooms.len(), streams = reaped_streams.len(), "reaper pass complete");
        }
        (reaped_rooms, reaped_streams)
    }

    /// Spawn the periodic loop, returning a handle that stops it.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> ReaperHandle {
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.scan_once();
                    }
                    _ = rx.recv() => return,
                }
            }
        });
        ReaperHandle { stop_tx: tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Client, ConnectionId, RoomName};
    use crate::service::capabilities::{AlwaysPresentFileChecker, NullMetadataFetcher};
    use std::time::Duration as StdDuration;

    fn reaper() -> RoomReaper {
        let namespace = Arc::new(Namespace::new(StdDuration::from_secs(1), 20));
        let streams = Arc::new(StreamRegistry::new(Arc::new(NullMetadataFetcher), Arc::new(AlwaysPresentFileChecker)));
        RoomReaper::new(namespace, streams, StdDuration::from_secs(60), StdDuration::from_secs(0))
    }

    #[test]
    fn scan_reaps_empty_rooms_past_the_age_threshold() {
        let reaper = reaper();
        let room_name = RoomName::from("lobby");
        let room = reaper.namespace.get_or_create(&room_name);
        let id = ConnectionId::new();
        room.add_client(Client::new(id, 2, "alice".to_string())).unwrap();
        room.remove_client(&id);

        let (reaped_rooms, _) = reaper.scan_once();
        assert_eq!(reaped_rooms, vec!["lobby".to_string()]);
        assert!(reaper.namespace.get(&room_name).is_none());
    }

    #[test]
    fn scan_leaves_occupied_rooms_alone() {
        let reaper = reaper();
        let room_name = RoomName::from("lobby");
        let room = reaper.namespace.get_or_create(&room_name);
        room.add_client(Client::new(ConnectionId::new(), 2, "alice".to_string())).unwrap();

        let (reaped_rooms, _) = reaper.scan_once();
        assert!(reaped_rooms.is_empty());
        assert!(reaper.namespace.get(&room_name).is_some());
    }
}
