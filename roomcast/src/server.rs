//! Server lifecycle management
//!
//! Wires the coordination engine behind an HTTP/WebSocket transport and
//! drives its background activities (reaper, admin picker) for the
//! process lifetime.

use std::sync::Arc;

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{stream::StreamExt, SinkExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use roomcast_core::config::Config;
use roomcast_core::models::events::Envelope;
use roomcast_core::registry::{RoomReaper, StreamRegistry};
use roomcast_core::service::{AdminPicker, SocketCoordinator};
use roomcast_core::models::{Namespace, RoomName};

/// Everything the HTTP layer needs to serve a connection.
#[derive(Clone)]
pub struct Services {
    pub namespace: Arc<Namespace>,
    pub streams: Arc<StreamRegistry>,
    pub coordinator: Arc<SocketCoordinator>,
}

/// The roomcast server: the axum HTTP/WS listener plus the two background
/// loops (`RoomReaper`, `AdminPicker`) that keep the namespace healthy.
pub struct RoomcastServer {
    config: Config,
    services: Services,
    reaper: Arc<RoomReaper>,
    admin_picker: Arc<AdminPicker>,
}

impl RoomcastServer {
    #[must_use]
    pub fn new(config: Config, services: Services, reaper: Arc<RoomReaper>, admin_picker: Arc<AdminPicker>) -> Self {
        Self {
            config,
            services,
            reaper,
            admin_picker,
        }
    }

    /// Start the background loops and the HTTP listener, and block until a
    /// shutdown signal arrives.
    pub async fn start(self) -> anyhow::Result<()> {
        let reaper_handle = Arc::clone(&self.reaper).spawn();
        let admin_handle = Arc::clone(&self.admin_picker).spawn();
        info!("reaper and admin-picker loops started");

        let router = build_router(self.services.clone());
        let addr = self.config.server.address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("roomcast listening on {addr}");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("shutdown signal received, stopping background loops");
        reaper_handle.stop().await;
        admin_handle.stop().await;

        Ok(())
    }
}

fn build_router(services: Services) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(services))
}

/// Trivial liveness probe: reachable means the listener is up.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// Upgrade a connection and hand it to [`handle_socket`], resolving its
/// room from the `Referer` header per the wire contract (§6).
async fn ws_handler(State(services): State<Arc<Services>>, headers: HeaderMap, ws: WebSocketUpgrade) -> impl IntoResponse {
    let referer = headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, services, referer))
}

/// Drive one connection: join the room, fan outbound envelopes from the
/// coordinator's outbox to the socket, and feed inbound frames back to the
/// coordinator until the socket closes.
async fn handle_socket(socket: WebSocket, services: Arc<Services>, referer: String) {
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Envelope>();
    let (room, id) = services.coordinator.connect(&referer, outbox_tx);
    let room_name = room.name.clone();

    let (mut sender, mut receiver) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbox_rx.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                handle_inbound_frame(&services, &room_name, id, &text).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Err(e) => {
                warn!(connection = %id, "websocket read error: {e}");
                break;
            }
            Ok(WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_)) => {}
        }
    }

    writer.abort();
    services.coordinator.disconnect(&room_name, id);
}

/// Client → server frames are the same `{event, data}` envelope as the
/// server's own wire frame (§6): `request_chatmessage` carries a plain
/// chat line (which the dispatcher may also interpret as a slash-command),
/// `request_updateusername` is translated to the equivalent `/user name`
/// command, and `request_streamsync` is acknowledged implicitly by the
/// timer's own periodic broadcast.
async fn handle_inbound_frame(services: &Services, room_name: &RoomName, id: roomcast_core::models::ConnectionId, text: &str) {
    let Ok(envelope) = serde_json::from_str::<Envelope>(text) else {
        warn!(connection = %id, "dropping malformed inbound frame");
        return;
    };

    match envelope.event.as_str() {
        "request_chatmessage" => {
            let line = envelope.data.get("message").and_then(|v| v.as_str()).unwrap_or("");
            services.coordinator.handle_chat_line(room_name, id, line).await;
        }
        "request_updateusername" => {
            if let Some(username) = envelope.data.get("username").and_then(|v| v.as_str()) {
                let line = format!("/user name {username}");
                services.coordinator.handle_chat_line(room_name, id, &line).await;
            }
        }
        "request_streamsync" => {}
        other => {
            warn!(connection = %id, event = other, "unrecognised inbound event");
        }
    }
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C"),
            Err(e) => error!("failed to install Ctrl+C handler: {e}"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("received SIGTERM");
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
