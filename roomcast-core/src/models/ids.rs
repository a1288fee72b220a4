use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable 128-bit identifier for a `Connection`.
///
/// Also the RBAC subject identifier and the `AggregatableQueue` owner key:
/// the system is pseudonymous, so a connection's UUID is the only durable
/// handle a room has on "who" is acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A room name, the `Namespace` key and the `Playback` id.
///
/// Resolved from the referer's `/v/<room>` path segment, defaulting to the
/// configured default room when absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomName(pub String);

impl RoomName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve a room name from a referer path, defaulting when absent.
    ///
    /// Looks for the first path segment immediately following `/v/`.
    #[must_use]
    pub fn from_referer_path(path: &str, default_room: &str) -> Self {
        const MARKER: &str = "/v/";
        match path.find(MARKER) {
            Some(pos) => {
                let rest = &path[pos + MARKER.len()..];
                let room = rest.split('/').next().unwrap_or("").trim();
                if room.is_empty() {
                    Self(default_room.to_string())
                } else {
                    Self(room.to_string())
                }
            }
            None => Self(default_room.to_string()),
        }
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn room_from_referer_extracts_segment() {
        let room = RoomName::from_referer_path("https://host/v/movienight/chat", "lobby");
        assert_eq!(room.as_str(), "movienight");
    }

    #[test]
    fn room_from_referer_defaults_when_absent() {
        let room = RoomName::from_referer_path("https://host/about", "lobby");
        assert_eq!(room.as_str(), "lobby");
    }

    #[test]
    fn room_from_referer_defaults_when_segment_empty() {
        let room = RoomName::from_referer_path("https://host/v/", "lobby");
        assert_eq!(room.as_str(), "lobby");
    }
}
