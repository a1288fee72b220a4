use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::models::events::Envelope;
use crate::models::ids::ConnectionId;

static VALID_USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

const RESERVED_USERNAMES: &[&str] = &["system"];

/// A connected viewer.
///
/// A client remembers its last `username_history_len` names; only the most
/// recent (the tail) is the active display name. Older ones are kept so a
/// room can recognize "previously known as" without a persistent account.
/// `outbox` is the connection's serialized writer: an unbounded channel
/// preserves send order without requiring callers to hold a lock across an
/// actual network write.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ConnectionId,
    pub created_at: DateTime<Utc>,
    history_len: usize,
    names: VecDeque<String>,
    outbox: Option<mpsc::UnboundedSender<Envelope>>,
}

impl Client {
    #[must_use]
    pub fn new(id: ConnectionId, history_len: usize, initial_name: String) -> Self {
        let mut names = VecDeque::with_capacity(history_len.max(1));
        names.push_back(initial_name);
        Self {
            id,
            created_at: Utc::now(),
            history_len: history_len.max(1),
            names,
            outbox: None,
        }
    }

    /// Attach the transport's outbound sender, used by [`Self::send`].
    /// Clients constructed without one (tests, headless use) silently drop
    /// anything sent to them.
    #[must_use]
    pub fn with_outbox(mut self, outbox: mpsc::UnboundedSender<Envelope>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Queue an envelope for delivery to this client. Never blocks; a
    /// failure (peer gone) is silently ignored, matching the propagation
    /// policy that a single connection's demise never disrupts the caller.
    pub fn send(&self, envelope: Envelope) {
        if let Some(outbox) = &self.outbox {
            let _ = outbox.send(envelope);
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.names.back().expect("client always has a name")
    }

    #[must_use]
    pub fn name_history(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    /// Validate and adopt a new display name, evicting the oldest history
    /// entry once the history is at capacity.
    pub fn rename(&mut self, new_name: &str) -> Result<()> {
        validate_username(new_name)?;
        if self.names.len() >= self.history_len {
            self.names.pop_front();
        }
        self.names.push_back(new_name.to_string());
        Ok(())
    }
}

/// Validate a proposed username: non-empty, `[A-Za-z0-9_]+`, and not a
/// reserved system name such as `system`.
pub fn validate_username(name: &str) -> Result<()> {
    if name.is_empty() || !VALID_USERNAME.is_match(name) {
        return Err(Error::InvalidUsername(name.to_string()));
    }
    if RESERVED_USERNAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(Error::InvalidUsername(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_and_malformed_names() {
        assert!(validate_username("system").is_err());
        assert!(validate_username("SYSTEM").is_err());
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("has-dash").is_err());
        assert!(validate_username("ok_Name123").is_ok());
    }

    #[test]
    fn history_keeps_only_the_configured_length() {
        let mut client = Client::new(ConnectionId::new(), 2, "alice".to_string());
        client.rename("bob").unwrap();
        client.rename("carol").unwrap();
        assert_eq!(client.name(), "carol");
        assert_eq!(client.name_history(), vec!["bob", "carol"]);
    }

    #[test]
    fn rename_rejects_invalid_without_mutating_history() {
        let mut client = Client::new(ConnectionId::new(), 2, "alice".to_string());
        assert!(client.rename("system").is_err());
        assert_eq!(client.name(), "alice");
    }

    #[test]
    fn send_delivers_through_the_attached_outbox() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = Client::new(ConnectionId::new(), 2, "alice".to_string()).with_outbox(tx);
        client.send(Envelope::new("chatmessage", serde_json::json!({"message": "hi"})).unwrap());
        let received = rx.try_recv().unwrap();
        assert_eq!(received.event, "chatmessage");
    }

    #[test]
    fn send_without_an_outbox_is_a_silent_no_op() {
        let client = Client::new(ConnectionId::new(), 2, "alice".to_string());
        client.send(Envelope::new("chatmessage", serde_json::json!({})).unwrap());
    }
}
