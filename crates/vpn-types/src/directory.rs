//! Directory users and their persisted mirror counterparts

use crate::principal::PrincipalName;
use serde::{Deserialize, Serialize};

/// A user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub external_id: String,
    pub display_name: String,
    pub principal_name: PrincipalName,
}

impl DirectoryUser {
    pub fn new(
        external_id: impl Into<String>,
        display_name: impl Into<String>,
        principal_name: PrincipalName,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            display_name: display_name.into(),
            principal_name,
        }
    }
}

/// A directory user as stored in the local mirror, keyed by principal name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorRecord {
    pub external_id: String,
    pub display_name: String,
    pub principal_name: PrincipalName,
}

impl MirrorRecord {
    /// Whether the directory copy of this principal carries a different
    /// external id or display name. Other attributes are not compared.
    pub fn differs_from(&self, user: &DirectoryUser) -> bool {
        self.external_id != user.external_id || self.display_name != user.display_name
    }
}

impl From<DirectoryUser> for MirrorRecord {
    fn from(user: DirectoryUser) -> Self {
        Self {
            external_id: user.external_id,
            display_name: user.display_name,
            principal_name: user.principal_name,
        }
    }
}

impl From<&DirectoryUser> for MirrorRecord {
    fn from(user: &DirectoryUser) -> Self {
        user.clone().into()
    }
}
