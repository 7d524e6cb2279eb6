//! Audit log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action names written to the audit log.
pub mod actions {
    pub const AUTO_TERMINATE_VPN: &str = "auto_terminate_vpn";
    pub const TERMINATE_VPN_SESSION: &str = "terminate_vpn_session";
    pub const GRANT_VPN_ACCESS: &str = "grant_vpn_access";
    pub const REVOKE_VPN_ACCESS: &str = "revoke_vpn_access";
    pub const UPDATE_VPN_ACCESS: &str = "update_vpn_access";
    pub const NO_CHANGE_VPN_ACCESS: &str = "no_change_vpn_access";
    pub const CREATE_RADIUS_SERVER: &str = "create_radius_server";
    pub const DELETE_RADIUS_SERVER: &str = "delete_radius_server";
    pub const REVOKE_PORTAL_ACCESS: &str = "revoke_portal_access";
}

/// Who performed an audited action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum AuditActor {
    /// Automatic actions taken by the sync job.
    System,
    /// An administrator, identified by login name.
    Admin(String),
}

impl AuditActor {
    /// Stored identifier. The system actor keeps the legacy id `1`.
    pub fn as_stored(&self) -> String {
        match self {
            AuditActor::System => "1".to_string(),
            AuditActor::Admin(name) => name.clone(),
        }
    }

    pub fn from_stored(value: &str) -> Self {
        if value == "1" {
            AuditActor::System
        } else {
            AuditActor::Admin(value.to_string())
        }
    }
}

impl fmt::Display for AuditActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditActor::System => f.write_str("system"),
            AuditActor::Admin(name) => f.write_str(name),
        }
    }
}

/// An entry about to be appended to the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: AuditActor,
    pub action: String,
    pub details: String,
}

impl AuditEntry {
    pub fn new(actor: AuditActor, action: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            actor,
            action: action.into(),
            details: details.into(),
        }
    }

    pub fn system(action: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(AuditActor::System, action, details)
    }
}

/// A persisted audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: AuditEntry,
}
