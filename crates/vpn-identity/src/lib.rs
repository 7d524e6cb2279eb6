//! Directory sources for the VPN access sync
//!
//! A [`DirectorySource`] yields the identity provider's current user list,
//! already restricted to the allowed domains. [`GraphDirectory`] talks to
//! Microsoft Graph; [`StaticDirectory`] and [`FileDirectory`] serve offline
//! snapshots.

pub mod error;
pub mod graph;
pub mod source;

pub use error::{DirectoryError, Result};
pub use graph::{GraphConfig, GraphDirectory};
pub use source::{apply_domain_filter, DirectorySource, FileDirectory, StaticDirectory};
