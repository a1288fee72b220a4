use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::models::events::{CookieRefreshPayload, Envelope};
use crate::models::namespace::Namespace;
use crate::models::rbac::Role;
use crate::models::ids::RoomName;

/// Per-room admin election, run once per `interval` across every room in
/// the namespace.
///
/// A room with at least one connection, no bound admin, and whose grace
/// window (since the last admin departed, if ever) has elapsed gets its
/// most-recently-connected non-admin bound to `admin`. The candidate is
/// told to refresh its auth cookie and shown a system message; the whole
/// room is told the user list changed.
pub struct AdminPicker {
    namespace: Arc<Namespace>,
    interval: Duration,
    grace: Duration,
}

impl AdminPicker {
    #[must_use]
    pub fn new(namespace: Arc<Namespace>, interval: Duration, grace: Duration) -> Self {
        Self {
            namespace,
            interval,
            grace,
        }
    }

    /// Run one election pass over every room, returning the rooms that got
    /// a new admin bound.
    pub fn tick_once(&self) -> Vec<RoomName> {
        let mut elected = Vec::new();
        for name in self.namespace.room_names() {
            let Some(room) = self.namespace.get(&name) else {
                continue;
            };
            if room.is_empty() || room.has_admin_connection() {
                continue;
            }
            if !room.playback.admin_grace_elapsed(self.grace) {
                continue;
            }
            let Some(candidate) = room.most_recent_non_admin() else {
                continue;
            };

            room.authorizer.add_role(Role::new("admin", Vec::new()));
            if room.authorizer.bind("admin", &[candidate]).is_err() {
                continue;
            }

            if let Ok(cookie_refresh) = Envelope::new("cookie", CookieRefreshPayload::default()) {
                room.send_to(&candidate, cookie_refresh);
            }
            if let Ok(system_msg) = Envelope::new(
                "chatmessage",
                serde_json::json!({"message": "You have been selected as the new admin for this room."}),
            ) {
                room.send_to(&candidate, system_msg);
            }
            if let Ok(user_list_event) = Envelope::new("info_userlistupdated", user_list_payload(&room)) {
                room.broadcast(user_list_event);
            }

            info!(room = %name, candidate = %candidate, "elected new admin");
            elected.push(name);
        }
        elected
    }

    /// Spawn the periodic loop. Returns a handle whose `stop` tears it down
    /// cleanly at the next tick boundary.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> crate::registry::ReaperHandle {
        let (tx, mut rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => { self.tick_once(); }
                    _ = rx.recv() => return,
                }
            }
        });
        crate::registry::ReaperHandle::from_stop_tx(tx)
    }
}

fn user_list_payload(room: &crate::models::namespace::Room) -> serde_json::Value {
    let users: Vec<_> = room
        .clients()
        .into_iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "name": c.name(),
                "roles": room.authorizer.roles_of(&c.id),
            })
        })
        .collect();
    serde_json::json!({ "users": users })
}
