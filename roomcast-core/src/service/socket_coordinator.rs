use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::models::client::Client;
use crate::models::events::{ClientPresencePayload, Envelope, StreamLoadPayload, StreamSummary};
use crate::models::ids::{ConnectionId, RoomName};
use crate::models::namespace::{Namespace, Room};
use crate::service::dispatcher::Dispatcher;

/// Bridges an accepted transport connection to the engine: join/leave
/// lifecycle, initial state sync, and handing chat lines to the
/// [`Dispatcher`]. Transport framing itself (the actual socket read/write
/// loop) is the binary crate's concern; this only needs a per-connection
/// outbound sender and a referer string.
pub struct SocketCoordinator {
    namespace: Arc<Namespace>,
    dispatcher: Arc<Dispatcher>,
    default_room: String,
    username_history_len: usize,
    stream_sync_broadcast_secs: u64,
}

impl SocketCoordinator {
    #[must_use]
    pub fn new(
        namespace: Arc<Namespace>,
        dispatcher: Arc<Dispatcher>,
        default_room: String,
        username_history_len: usize,
        stream_sync_broadcast_secs: u64,
    ) -> Self {
        Self {
            namespace,
            dispatcher,
            default_room,
            username_history_len,
            stream_sync_broadcast_secs,
        }
    }

    /// Accept a new connection: resolve its room from the referer path,
    /// join the namespace, bind default roles, and announce it. Returns
    /// the room and the connection's freshly minted id.
    pub fn connect(&self, referer_path: &str, outbox: UnboundedSender<Envelope>) -> (Arc<Room>, ConnectionId) {
        let room_name = RoomName::from_referer_path(referer_path, &self.default_room);
        let room = self.namespace.get_or_create(&room_name);
        room.ensure_stream_sync_ticker(self.stream_sync_broadcast_secs);

        let id = ConnectionId::new();
        let initial_name = format!("guest-{}", &id.to_string()[..8]);
        let client = Client::new(id, self.username_history_len, initial_name).with_outbox(outbox);
        room.add_client(client).expect("fresh connection id cannot already be bound");

        if let Ok(envelope) = Envelope::new("info_clientjoined", ClientPresencePayload { id, name: room.client(&id).map(|c| c.name().to_string()).unwrap_or_default() }) {
            room.broadcast(envelope);
        }

        if let Some(current) = room.playback.current() {
            let status = room.playback.status();
            let summary = StreamSummary::from(&*current.lock());
            if let Ok(envelope) = Envelope::new(
                "streamload",
                StreamLoadPayload { stream: summary, started_by: status.started_by, timer: status.timer },
            ) {
                room.send_to(&id, envelope);
            }
        }

        info!(room = %room_name, connection = %id, "connection joined");
        (room, id)
    }

    /// Tear down a connection: if it was the room's last admin, mark the
    /// grace-window clock, then remove it and announce its departure.
    pub fn disconnect(&self, room_name: &RoomName, id: ConnectionId) {
        let Some(room) = self.namespace.get(room_name) else {
            return;
        };
        let departed = room.remove_client(&id);
        if let Some(client) = departed {
            if let Ok(envelope) = Envelope::new("info_clientleft", ClientPresencePayload { id, name: client.name().to_string() }) {
                room.broadcast(envelope);
            }
            info!(room = %room_name, connection = %id, "connection left");
        }
    }

    /// Route one inbound chat line from `id` in `room_name` to the
    /// dispatcher.
    pub async fn handle_chat_line(&self, room_name: &RoomName, id: ConnectionId, line: &str) {
        if let Some(room) = self.namespace.get(room_name) {
            self.dispatcher.handle_line(&room, id, line).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamRegistry;
    use crate::service::capabilities::{AlwaysPresentFileChecker, NullMetadataFetcher};
    use std::time::Duration;

    fn coordinator() -> SocketCoordinator {
        let namespace = Arc::new(Namespace::new(Duration::from_secs(1), 20));
        let streams = Arc::new(StreamRegistry::new(Arc::new(NullMetadataFetcher), Arc::new(AlwaysPresentFileChecker)));
        let dispatcher = Arc::new(Dispatcher::new(streams));
        SocketCoordinator::new(namespace, dispatcher, "lobby".to_string(), 2, 30)
    }

    #[test]
    fn connect_resolves_room_from_referer_and_binds_user_role() {
        let coordinator = coordinator();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (room, id) = coordinator.connect("https://host/v/movienight/chat", tx);
        assert_eq!(room.name, RoomName::from("movienight"));
        assert!(room.authorizer.has_role(&id, "user"));
    }

    #[test]
    fn connect_without_a_room_segment_uses_the_default_room() {
        let coordinator = coordinator();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (room, _id) = coordinator.connect("https://host/about", tx);
        assert_eq!(room.name, RoomName::from("lobby"));
    }

    #[test]
    fn disconnect_announces_departure_to_the_rest_of_the_room() {
        let coordinator = coordinator();
        let (tx_a, _rx_a) = tokio::sync::mpsc::unbounded_channel();
        let (room, a) = coordinator.connect("https://host/v/lobby", tx_a);
        let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
        let (_room2, _b) = coordinator.connect("https://host/v/lobby", tx_b);
        let _ = rx_b.try_recv();

        coordinator.disconnect(&room.name, a);
        let envelope = rx_b.try_recv().unwrap();
        assert_eq!(envelope.event, "info_clientleft");
    }
}
