use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::ids::ConnectionId;
use crate::models::queue::StreamRef;
use crate::models::stream::{Stream, StreamKind};
use crate::service::capabilities::{LocalFileChecker, MetadataFetcher};

/// Every known stream, keyed by its source URL, shared across every room
/// that references it.
///
/// A room's `Playback`/`Queue` only ever holds a `StreamRef` (`Arc<Mutex<Stream>>`)
/// obtained from here; the registry is the single place a `Stream` is
/// created, validated against its source kind, and eventually evicted.
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, StreamRef>>,
    metadata_fetcher: Arc<dyn MetadataFetcher>,
    local_file_checker: Arc<dyn LocalFileChecker>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new(metadata_fetcher: Arc<dyn MetadataFetcher>, local_file_checker: Arc<dyn LocalFileChecker>) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            metadata_fetcher,
            local_file_checker,
        }
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<StreamRef> {
        self.streams.lock().get(url).cloned()
    }

    /// Register a brand-new stream for `url`. Errors with
    /// [`Error::DuplicateStream`] if one is already registered; callers
    /// that want reuse-or-create should use [`Self::get_or_create`].
    pub async fn new_stream(&self, url: String, creation_source: Option<ConnectionId>) -> Result<StreamRef> {
        if self.streams.lock().contains_key(&url) {
            return Err(Error::DuplicateStream);
        }

        let kind = StreamKind::from_url(&url);
        if let StreamKind::Local = kind {
            if !self.local_file_checker.exists_as_video(&url).await? {
                return Err(Error::LocalFileMissing(url));
            }
        }
        if matches!(kind, StreamKind::Unknown(_)) {
            return Err(Error::UnsupportedSource);
        }

        let stream = Arc::new(Mutex::new(Stream::new(url.clone(), creation_source)));
        self.streams.lock().insert(url, Arc::clone(&stream));
        Ok(stream)
    }

    /// Reuse the existing entry for `url` if present, otherwise register
    /// and fetch metadata for a new one. Returns the stream along with
    /// whether it was freshly created.
    pub async fn get_or_create(&self, url: &str, creation_source: Option<ConnectionId>) -> Result<(StreamRef, bool)> {
        if let Some(existing) = self.get(url) {
            return Ok((existing, false));
        }
        let stream = self.new_stream(url.to_string(), creation_source).await?;
        self.fetch_metadata(Arc::clone(&stream)).await;
        Ok((stream, true))
    }

    /// Fetch and apply metadata for `stream`, logging (rather than
    /// propagating) failure — a stream with unfetched metadata still plays,
    /// it just renders with its raw URL as a display name.
    pub async fn fetch_metadata(&self, stream: StreamRef) {
        let (kind, url) = {
            let guard = stream.lock();
            (guard.kind.clone(), guard.url.clone())
        };
        match self.metadata_fetcher.fetch(&kind, &url).await {
            Ok(raw) => {
                let display_name = raw.get("title").and_then(|v| v.as_str()).map(str::to_string);
                let thumbnail = raw.get("thumbnail").and_then(|v| v.as_str()).map(str::to_string);
                let duration_secs = raw.get("duration_secs").and_then(serde_json::Value::as_f64);
                stream.lock().apply_metadata(display_name, thumbnail, duration_secs, raw);
                debug!(%url, "fetched stream metadata");
            }
            Err(err) => warn!(%url, %err, "failed to fetch stream metadata"),
        }
    }

    /// Evict every registered stream with no parent refs whose `last_updated`
    /// is older than `reap_age`. Returns the urls removed.
    pub fn reap_idle(&self, reap_age: chrono::Duration) -> Vec<String> {
        let now = chrono::Utc::now();
        let mut streams = self.streams.lock();
        let stale: Vec<String> = streams
            .iter()
            .filter_map(|(url, stream)| {
                let guard = stream.lock();
                let idle = now - guard.last_updated;
                (!guard.has_parent_refs() && idle >= reap_age).then(|| url.clone())
            })
            .collect();
        for url in &stale {
            streams.remove(url);
        }
        stale
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::capabilities::{AlwaysPresentFileChecker, NullMetadataFetcher};
    use std::time::Duration as StdDuration;

    fn registry() -> StreamRegistry {
        StreamRegistry::new(Arc::new(NullMetadataFetcher), Arc::new(AlwaysPresentFileChecker))
    }

    #[tokio::test]
    async fn new_stream_rejects_duplicates() {
        let reg = registry();
        reg.new_stream("https://youtu.be/abc".to_string(), None).await.unwrap();
        let err = reg.new_stream("https://youtu.be/abc".to_string(), None).await.unwrap_err();
        assert_eq!(err, Error::DuplicateStream);
    }

    #[tokio::test]
    async fn new_stream_rejects_unsupported_sources() {
        let reg = registry();
        let err = reg
            .new_stream("https://example.com/whatever".to_string(), None)
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnsupportedSource);
    }

    #[tokio::test]
    async fn get_or_create_reuses_existing_entry() {
        let reg = registry();
        let (first, created) = reg.get_or_create("https://youtu.be/abc", None).await.unwrap();
        assert!(created);
        let (second, created) = reg.get_or_create("https://youtu.be/abc", None).await.unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn reap_idle_evicts_only_unreferenced_stale_streams() {
        let reg = registry();
        let (kept, _) = reg.get_or_create("https://youtu.be/kept", None).await.unwrap();
        kept.lock().add_parent_ref(crate::models::ids::RoomName::from("lobby"));
        let (stale, _) = reg.get_or_create("https://youtu.be/stale", None).await.unwrap();
        stale.lock().last_updated = chrono::Utc::now() - chrono::Duration::from_std(StdDuration::from_secs(600)).unwrap();

        let evicted = reg.reap_idle(chrono::Duration::from_std(StdDuration::from_secs(300)).unwrap());
        assert_eq!(evicted, vec!["https://youtu.be/stale".to_string()]);
        assert!(reg.get("https://youtu.be/kept").is_some());
        assert!(reg.get("https://youtu.be/stale").is_none());
    }
}
