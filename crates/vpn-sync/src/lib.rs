//! Directory reconciliation for VPN access
//!
//! A [`Reconciler`] pass pulls the directory snapshot and the local mirror,
//! diffs them, terminates live VPN sessions of removed users who still hold
//! access, and then replaces the mirror, revokes their grants and records a
//! sync event in one transaction. Session termination is best effort and is
//! never rolled back. [`SyncScheduler`] runs passes periodically and on
//! demand, one at a time.

pub mod diff;
pub mod error;
pub mod reconciler;
pub mod scheduler;
pub mod terminator;

#[cfg(test)]
pub mod proptest;

pub use diff::{dedup_snapshot, DirectoryDiff};
pub use error::{Result, SyncError};
pub use reconciler::{Reconciler, SyncReport};
pub use scheduler::{SyncScheduler, DEFAULT_SYNC_INTERVAL};
pub use terminator::{SessionTerminator, TerminationOutcome, TerminationSummary, TerminatorConfig};
