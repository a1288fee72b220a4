use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::models::client::Client;
use crate::models::events::{Envelope, StreamSyncPayload};
use crate::models::ids::{ConnectionId, RoomName};
use crate::models::playback::Playback;
use crate::models::rbac::{default_roles, Authorizer};

/// A single room: its connected clients, its playback, and its own RBAC
/// bindings. Rooms are independent of one another — nothing here reaches
/// across to another room's state.
pub struct Room {
    pub name: RoomName,
    pub playback: Playback,
    pub authorizer: Authorizer,
    clients: Mutex<HashMap<ConnectionId, Client>>,
    sync_ticker_installed: AtomicBool,
}

impl Room {
    fn new(name: RoomName, tick_period: Duration, queue_capacity: usize) -> Self {
        let authorizer = Authorizer::new(true);
        for role in default_roles() {
            authorizer.add_role(role);
        }
        Self {
            playback: Playback::new(name.clone(), tick_period, queue_capacity),
            name,
            authorizer,
            clients: Mutex::new(HashMap::new()),
            sync_ticker_installed: AtomicBool::new(false),
        }
    }

    /// Register the periodic `streamsync` broadcast, once per room, the
    /// first time it's needed (a room's first connection). The timer ticks
    /// every wall-second regardless; this callback only broadcasts every
    /// `interval_secs`-th tick.
    pub fn ensure_stream_sync_ticker(self: &Arc<Self>, interval_secs: u64) {
        if self.sync_ticker_installed.swap(true, Ordering::SeqCst) {
            return;
        }
        let room = Arc::clone(self);
        let interval = interval_secs.max(1) as f64;
        self.playback.timer.on_tick(move |time| {
            if time % interval == 0.0 {
                if let Ok(envelope) = Envelope::new("streamsync", StreamSyncPayload { timer: room.playback.timer.status() }) {
                    room.broadcast(envelope);
                }
            }
        });
    }

    pub fn add_client(&self, client: Client) -> Result<()> {
        self.authorizer.bind("user", &[client.id])?;
        self.clients.lock().insert(client.id, client);
        Ok(())
    }

    /// Remove a client. If it was the room's last admin connection, marks
    /// the admin-departure clock the admin picker reads for its grace
    /// window.
    pub fn remove_client(&self, id: &ConnectionId) -> Option<Client> {
        let removed = self.clients.lock().remove(id);
        if removed.is_some() && self.authorizer.has_role(id, "admin") && !self.has_admin_connection() {
            self.playback.mark_admin_departed();
        }
        removed
    }

    #[must_use]
    pub fn has_admin_connection(&self) -> bool {
        self.clients
            .lock()
            .keys()
            .any(|id| self.authorizer.has_role(id, "admin"))
    }

    #[must_use]
    pub fn client(&self, id: &ConnectionId) -> Option<Client> {
        self.clients.lock().get(id).cloned()
    }

    pub fn rename_client(&self, id: &ConnectionId, new_name: &str) -> Result<()> {
        let mut clients = self.clients.lock();
        let client = clients.get_mut(id).ok_or(Error::NotInRoom)?;
        client.rename(new_name)
    }

    #[must_use]
    pub fn clients(&self) -> Vec<Client> {
        self.clients.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Deliver `envelope` to every client in the room. The client list is
    /// snapshotted under the lock so individual sends happen outside it —
    /// a slow or gone peer never blocks the rest of the room.
    pub fn broadcast(&self, envelope: Envelope) {
        let clients = self.clients.lock().values().cloned().collect::<Vec<_>>();
        for client in clients {
            client.send(envelope.clone());
        }
    }

    /// [`Self::broadcast`], skipping one connection (e.g. the command's
    /// own invoker, for commands whose reply is otherwise public).
    pub fn broadcast_from(&self, except: &ConnectionId, envelope: Envelope) {
        let clients = self.clients.lock().values().cloned().collect::<Vec<_>>();
        for client in clients {
            if &client.id != except {
                client.send(envelope.clone());
            }
        }
    }

    /// Deliver `envelope` to exactly one client, if still present.
    pub fn send_to(&self, id: &ConnectionId, envelope: Envelope) {
        if let Some(client) = self.clients.lock().get(id) {
            client.send(envelope);
        }
    }

    /// The connection with the most-recent `created_at` among those not
    /// currently bound to `admin` — the admin picker's election candidate.
    #[must_use]
    pub fn most_recent_non_admin(&self) -> Option<ConnectionId> {
        self.clients
            .lock()
            .values()
            .filter(|c| !self.authorizer.has_role(&c.id, "admin"))
            .max_by_key(|c| c.created_at)
            .map(|c| c.id)
    }
}

/// The room registry: every live room, keyed by name.
///
/// Guarded by a single mutex, matching the rest of the design's
/// synchronous, lock-based concurrency model — rooms are created and
/// reaped relatively rarely compared to the in-room traffic each `Room`
/// handles behind its own locks.
pub struct Namespace {
    rooms: Mutex<HashMap<RoomName, Arc<Room>>>,
    tick_period: Duration,
    queue_capacity: usize,
}

impl Namespace {
    #[must_use]
    pub fn new(tick_period: Duration, queue_capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            tick_period,
            queue_capacity,
        }
    }

    /// Fetch a room, creating it (with default roles already bound) if
    /// this is its first use.
    pub fn get_or_create(&self, name: &RoomName) -> Arc<Room> {
        let mut rooms = self.rooms.lock();
        Arc::clone(rooms.entry(name.clone()).or_insert_with(|| {
            Arc::new(Room::new(name.clone(), self.tick_period, self.queue_capacity))
        }))
    }

    #[must_use]
    pub fn get(&self, name: &RoomName) -> Option<Arc<Room>> {
        self.rooms.lock().get(name).cloned()
    }

    #[must_use]
    pub fn room_names(&self) -> Vec<RoomName> {
        self.rooms.lock().keys().cloned().collect()
    }

    /// A room is reapable once it has zero connections; the caller
    /// additionally checks `playback.idle_for()` against the configured
    /// age threshold before actually reaping.
    #[must_use]
    pub fn is_reapable(&self, name: &RoomName) -> bool {
        self.rooms.lock().get(name).is_some_and(Room::is_empty)
    }

    /// Tear down a room's playback and remove it from the registry.
    pub fn reap(&self, name: &RoomName) {
        let room = self.rooms.lock().remove(name);
        if let Some(room) = room {
            room.playback.cleanup();
        }
    }
}
