//! Sync pass counters and persisted sync events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-pass change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    #[serde(rename = "usersAdded")]
    pub added: usize,
    #[serde(rename = "usersUpdated")]
    pub updated: usize,
    #[serde(rename = "usersDeleted")]
    pub deleted: usize,
    pub total_users: usize,
}

impl SyncCounts {
    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.deleted > 0
    }
}

/// A recorded pass that changed the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: SyncCounts,
}
