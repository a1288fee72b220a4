use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ids::ConnectionId;
use crate::models::playback::PlaybackStatus;
use crate::models::stream::{Stream, StreamKind};
use crate::models::timer::TimerStatus;

/// The wire frame: every message, in either direction, is `{event, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_value(data)?,
        })
    }
}

/// A stream as rendered to clients, decoupled from the internal
/// parent-ref/labelled-ref bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub url: String,
    pub kind: StreamKind,
    pub display_name: String,
    pub thumbnail: String,
    pub duration_secs: Option<f64>,
}

impl From<&Stream> for StreamSummary {
    fn from(stream: &Stream) -> Self {
        Self {
            url: stream.url.clone(),
            kind: stream.kind.clone(),
            display_name: stream.display_name.clone(),
            thumbnail: stream.thumbnail.clone(),
            duration_secs: stream.duration_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessagePayload {
    pub from: ConnectionId,
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMethodActionPayload {
    pub extra: MethodActionExtra,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodActionExtra {
    pub methodname: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateUsernamePayload {
    pub id: ConnectionId,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientPresencePayload {
    pub id: ConnectionId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserListEntry {
    pub id: ConnectionId,
    pub name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserListUpdatedPayload {
    pub users: Vec<UserListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtitlesPayload {
    /// `None` clears subtitles for the room.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamLoadPayload {
    pub stream: StreamSummary,
    pub started_by: Option<ConnectionId>,
    pub timer: TimerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamSyncPayload {
    pub timer: TimerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueEntrySummary {
    pub owner: ConnectionId,
    pub head: StreamSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSyncPayload {
    pub items: Vec<QueueEntrySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackSyncPayload {
    pub items: Vec<StreamSummary>,
}

/// The server asking a client to discard and re-fetch its auth cookie,
/// emitted whenever that connection's role bindings change.
#[derive(Debug, Clone, Serialize)]
pub struct CookieRefreshPayload {
    pub request: &'static str,
}

impl Default for CookieRefreshPayload {
    fn default() -> Self {
        Self { request: "cookie" }
    }
}

#[must_use]
pub fn playback_status_event(status: &PlaybackStatus) -> serde_json::Result<Envelope> {
    Envelope::new("streaminfo", status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wraps_event_name_and_json_data() {
        let envelope = Envelope::new(
            "chatmessage",
            ChatMessagePayload {
                from: ConnectionId::new(),
                username: "alice".to_string(),
                message: "hi".to_string(),
            },
        )
        .unwrap();
        assert_eq!(envelope.event, "chatmessage");
        assert_eq!(envelope.data["message"], "hi");
    }
}
