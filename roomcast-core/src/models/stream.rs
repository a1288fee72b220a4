use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::{ConnectionId, RoomName};

/// The kind of source a `Stream` points at, used to pick a `MetadataFetcher`
/// strategy and to render an appropriate player on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Youtube,
    Twitch,
    Local,
    Unknown(String),
}

impl StreamKind {
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.contains("youtube.com") || url.contains("youtu.be") {
            StreamKind::Youtube
        } else if url.contains("twitch.tv") {
            StreamKind::Twitch
        } else if url.starts_with("http://") || url.starts_with("https://") {
            StreamKind::Unknown(
                url::Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string()),
            )
        } else {
            StreamKind::Local
        }
    }
}

/// A media item, identified by its source URL.
///
/// A stream may be referenced by multiple playbacks (`parent_refs`, the
/// rooms currently loading or queueing it) and by at most one connection
/// per playback as the submitter (`labelled_refs`). Both directions store
/// ids rather than owning handles back to the referrer, since `Playback`
/// and `Queue` own the forward `Arc` to the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub url: String,
    pub kind: StreamKind,
    pub display_name: String,
    pub thumbnail: String,
    pub duration_secs: Option<f64>,
    pub metadata: serde_json::Value,
    pub last_updated: DateTime<Utc>,
    /// The connection that first caused this stream entry to be created,
    /// distinct from whoever happens to have labelled it for a given room.
    pub creation_source: Option<ConnectionId>,

    #[serde(skip)]
    parent_refs: HashSet<RoomName>,
    #[serde(skip)]
    labelled_refs: HashMap<RoomName, ConnectionId>,
}

impl Stream {
    #[must_use]
    pub fn new(url: String, creation_source: Option<ConnectionId>) -> Self {
        let kind = StreamKind::from_url(&url);
        Self {
            display_name: url.clone(),
            url,
            kind,
            thumbnail: String::new(),
            duration_secs: None,
            metadata: serde_json::Value::Null,
            last_updated: Utc::now(),
            creation_source,
            parent_refs: HashSet::new(),
            labelled_refs: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.url
    }

    /// Apply fetched metadata (title, thumbnail, duration) on top of what's
    /// already known, touching `last_updated`.
    pub fn apply_metadata(
        &mut self,
        display_name: Option<String>,
        thumbnail: Option<String>,
        duration_secs: Option<f64>,
        raw: serde_json::Value,
    ) {
        if let Some(name) = display_name {
            self.display_name = name;
        }
        if let Some(thumb) = thumbnail {
            self.thumbnail = thumb;
        }
        if duration_secs.is_some() {
            self.duration_secs = duration_secs;
        }
        self.metadata = raw;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn add_parent_ref(&mut self, room: RoomName) {
        self.parent_refs.insert(room);
    }

    pub fn remove_parent_ref(&mut self, room: &RoomName) {
        self.parent_refs.remove(room);
    }

    #[must_use]
    pub fn has_parent_refs(&self) -> bool {
        !self.parent_refs.is_empty()
    }

    pub fn set_labelled_ref(&mut self, room: RoomName, submitter: ConnectionId) {
        self.labelled_refs.insert(room, submitter);
    }

    pub fn remove_labelled_ref(&mut self, room: &RoomName) {
        self.labelled_refs.remove(room);
    }

    #[must_use]
    pub fn labelled_ref(&self, room: &RoomName) -> Option<ConnectionId> {
        self.labelled_refs.get(room).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_kinds() {
        assert_eq!(
            StreamKind::from_url("https://www.youtube.com/watch?v=abc"),
            StreamKind::Youtube
        );
        assert_eq!(
            StreamKind::from_url("https://twitch.tv/someone"),
            StreamKind::Twitch
        );
        assert_eq!(
            StreamKind::from_url("/srv/media/movie.mp4"),
            StreamKind::Local
        );
        assert_eq!(
            StreamKind::from_url("https://example.com/clip.mp4"),
            StreamKind::Unknown("example.com".to_string())
        );
    }

    #[test]
    fn non_http_urls_are_treated_as_local() {
        assert_eq!(StreamKind::from_url("subdir/movie.mp4"), StreamKind::Local);
        assert_eq!(StreamKind::from_url(r"C:\movie.mp4"), StreamKind::Local);
        assert_eq!(StreamKind::from_url("file:///srv/media/movie.mp4"), StreamKind::Local);
    }

    #[test]
    fn parent_refs_track_reference_count() {
        let mut stream = Stream::new("https://example.com/a.mp4".to_string(), None);
        let room = RoomName::from("lobby");
        assert!(!stream.has_parent_refs());
        stream.add_parent_ref(room.clone());
        assert!(stream.has_parent_refs());
        stream.remove_parent_ref(&room);
        assert!(!stream.has_parent_refs());
    }

    #[test]
    fn labelled_ref_is_scoped_per_room() {
        let mut stream = Stream::new("https://example.com/a.mp4".to_string(), None);
        let room_a = RoomName::from("lobby");
        let room_b = RoomName::from("other");
        let submitter = ConnectionId::new();
        stream.set_labelled_ref(room_a.clone(), submitter);
        assert_eq!(stream.labelled_ref(&room_a), Some(submitter));
        assert_eq!(stream.labelled_ref(&room_b), None);
    }
}
