use crate::terminator::TerminationSummary;
use thiserror::Error;
use vpn_identity::DirectoryError;
use vpn_types::SyncCounts;
use vpn_users::StoreError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Directory fetch failed: {0}")]
    UpstreamFetch(#[from] DirectoryError),

    #[error("Reading the mirror failed: {0}")]
    MirrorRead(#[source] StoreError),

    #[error("Access lookup for removed users failed: {0}")]
    AccessLookup(#[source] StoreError),

    /// The mirror is unchanged. Sessions already terminated in this pass stay
    /// terminated; `terminations` says how many.
    #[error("Storage mutation failed: {source}")]
    StorageMutation {
        source: StoreError,
        pending: SyncCounts,
        terminations: TerminationSummary,
    },

    #[error("Taking the sync lock failed: {0}")]
    SyncLock(#[source] StoreError),

    #[error("A reconciliation pass is already running")]
    AlreadyRunning,

    #[error("Sync scheduler is already started")]
    SchedulerStarted,
}

pub type Result<T> = std::result::Result<T, SyncError>;
