use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::ids::ConnectionId;

/// The state a reconnecting client presents to resume its prior identity.
///
/// Carried as the value of a session cookie so a refreshed page keeps its
/// `ConnectionId` (and thus its RBAC bindings and submission history)
/// instead of being treated as a brand-new, unbound connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthCookie {
    pub connection_id: ConnectionId,
    pub roles: Vec<String>,
}

impl AuthCookie {
    #[must_use]
    pub fn new(connection_id: ConnectionId, roles: Vec<String>) -> Self {
        Self {
            connection_id,
            roles,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_encode_decode() {
        let cookie = AuthCookie::new(ConnectionId::new(), vec!["user".to_string()]);
        let encoded = cookie.encode().unwrap();
        let decoded = AuthCookie::decode(&encoded).unwrap();
        assert_eq!(cookie, decoded);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(AuthCookie::decode("not json").is_err());
    }
}
