//! Narrow interfaces to the VPN gateway

use crate::error::Result;
use async_trait::async_trait;
use vpn_types::VpnSession;

/// Lists and terminates live VPN sessions.
///
/// Usernames are bare (no domain) and compared case-insensitively.
/// Terminating a username without active sessions succeeds.
#[async_trait]
pub trait VpnSessionController: Send + Sync {
    async fn list_active_sessions(&self) -> Result<Vec<VpnSession>>;

    async fn terminate_sessions_for_username(&self, username: &str) -> Result<()>;

    /// Terminate one session by its controller-specific index.
    async fn terminate_session(&self, index: &str) -> Result<()>;
}

/// Membership of the gateway's VPN portal user groups.
#[async_trait]
pub trait PortalGroups: Send + Sync {
    async fn group_members(&self, group: &str) -> Result<Vec<String>>;

    /// Remove `member` from `group`, returning the remaining members.
    async fn remove_member(&self, group: &str, member: &str) -> Result<Vec<String>>;
}
