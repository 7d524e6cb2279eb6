//! RADIUS server records and access grants

use crate::principal::PrincipalName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a RADIUS server record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RadiusServerId(pub i64);

impl fmt::Display for RadiusServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RadiusServerId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A RADIUS-backed VPN server that principals can be granted access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadiusServer {
    pub id: RadiusServerId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Authorization for a principal to use one RADIUS server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub principal_name: PrincipalName,
    pub radius_server_id: RadiusServerId,
}

/// A mirrored principal together with the servers it may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalAccess {
    pub principal_name: PrincipalName,
    pub display_name: String,
    pub servers: Vec<RadiusServer>,
}

impl PrincipalAccess {
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name.as_str()).collect()
    }
}
