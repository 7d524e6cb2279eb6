//! Live VPN sessions observed on the gateway

use crate::principal::PrincipalName;
use serde::{Deserialize, Serialize};

/// An active VPN session as reported by the session controller.
///
/// `index` is opaque to everything but the controller that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnSession {
    pub index: String,
    pub username: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub from_ip: Option<String>,
}

impl VpnSession {
    pub fn new(index: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            username: username.into(),
            group: None,
            from_ip: None,
        }
    }

    /// The reported username without any domain suffix, lowercased.
    pub fn session_key(&self) -> String {
        self.username
            .split('@')
            .next()
            .unwrap_or(&self.username)
            .to_lowercase()
    }

    /// Whether this session is for bare username `key`, ignoring case.
    ///
    /// The gateway may report either the bare username or a full
    /// `user@domain` form; both match their bare key.
    pub fn matches_key(&self, key: &str) -> bool {
        self.session_key() == key.to_lowercase()
    }

    pub fn belongs_to(&self, principal: &PrincipalName) -> bool {
        self.matches_key(&principal.session_key())
    }
}

/// Sessions in `sessions` that belong to `principal`.
pub fn sessions_for<'a>(sessions: &'a [VpnSession], principal: &PrincipalName) -> Vec<&'a VpnSession> {
    sessions.iter().filter(|s| s.belongs_to(principal)).collect()
}
