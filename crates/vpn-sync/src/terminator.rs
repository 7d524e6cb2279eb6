//! Best-effort termination of VPN sessions for removed principals

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vpn_sessions::{ControllerError, VpnSessionController};
use vpn_types::{actions, sessions_for, AuditEntry, PrincipalName, VpnSession};
use vpn_users::AuditSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatorConfig {
    /// Principals handled concurrently; groups run one after another.
    pub group_size: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Upper bound on each controller call.
    pub call_timeout: Duration,
    /// Re-list sessions after a group to confirm nothing is left.
    pub verify: bool,
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            group_size: 5,
            max_attempts: 3,
            retry_delay: Duration::from_secs(3),
            call_timeout: Duration::from_secs(30),
            verify: true,
        }
    }
}

/// What happened to one principal's sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    NoActiveSessions,
    /// `remaining` is the number of matching sessions still listed by the
    /// verification pass, or `None` when verification did not run.
    Terminated {
        attempt: u32,
        remaining: Option<usize>,
    },
    Failed {
        attempts: u32,
        error: String,
    },
}

/// Aggregate outcome of one [`SessionTerminator::terminate_sessions`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationSummary {
    pub requested: usize,
    pub terminated: usize,
    pub partial: usize,
    pub no_sessions: usize,
    pub failed: usize,
}

impl TerminationSummary {
    fn record(&mut self, outcome: &TerminationOutcome) {
        match outcome {
            TerminationOutcome::NoActiveSessions => self.no_sessions += 1,
            TerminationOutcome::Terminated { remaining, .. } => {
                self.terminated += 1;
                if remaining.is_some_and(|n| n > 0) {
                    self.partial += 1;
                }
            }
            TerminationOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Terminates the live sessions of a set of principals through a
/// [`VpnSessionController`], auditing each success.
///
/// Failures never propagate: every principal ends with a
/// [`TerminationOutcome`], and the caller carries on regardless.
#[derive(Clone)]
pub struct SessionTerminator {
    controller: Arc<dyn VpnSessionController>,
    audit: Arc<dyn AuditSink>,
    config: TerminatorConfig,
}

impl SessionTerminator {
    pub fn new(
        controller: Arc<dyn VpnSessionController>,
        audit: Arc<dyn AuditSink>,
        config: TerminatorConfig,
    ) -> Self {
        Self {
            controller,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &TerminatorConfig {
        &self.config
    }

    pub async fn terminate_sessions(&self, principals: &BTreeSet<PrincipalName>) -> TerminationSummary {
        self.terminate_all(principals)
            .await
            .values()
            .fold(
                TerminationSummary {
                    requested: principals.len(),
                    ..Default::default()
                },
                |mut summary, outcome| {
                    summary.record(outcome);
                    summary
                },
            )
    }

    /// Per-principal outcomes, for callers that need more than the summary.
    pub async fn terminate_all(
        &self,
        principals: &BTreeSet<PrincipalName>,
    ) -> BTreeMap<PrincipalName, TerminationOutcome> {
        let mut outcomes = BTreeMap::new();
        if principals.is_empty() {
            return outcomes;
        }

        let all: Vec<&PrincipalName> = principals.iter().collect();
        let group_size = self.config.group_size.max(1);
        info!(
            principals = all.len(),
            groups = all.len().div_ceil(group_size),
            "Terminating VPN sessions for removed users"
        );

        for (group_index, group) in all.chunks(group_size).enumerate() {
            debug!(group = group_index + 1, size = group.len(), "Processing termination group");
            outcomes.extend(self.terminate_group(group).await);
        }
        outcomes
    }

    async fn terminate_group(
        &self,
        group: &[&PrincipalName],
    ) -> BTreeMap<PrincipalName, TerminationOutcome> {
        let sessions = self.list_sessions().await.unwrap_or_else(|e| {
            warn!("Listing VPN sessions failed, treating group as having none: {}", e);
            Vec::new()
        });

        let mut outcomes = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for &principal in group {
            if sessions_for(&sessions, principal).is_empty() {
                debug!(principal = %principal, "No active VPN sessions");
                outcomes.insert(principal.clone(), TerminationOutcome::NoActiveSessions);
                continue;
            }

            let terminator = self.clone();
            let principal = principal.clone();
            tasks.spawn(async move {
                let outcome = terminator.terminate_principal(&principal).await;
                (principal, outcome)
            });
        }

        while let Some(task_result) = tasks.join_next().await {
            match task_result {
                Ok((principal, outcome)) => {
                    outcomes.insert(principal, outcome);
                }
                Err(join_error) => error!("Termination task failed: {}", join_error),
            }
        }

        if self.config.verify {
            self.verify_group(&mut outcomes).await;
        }
        outcomes
    }

    async fn terminate_principal(&self, principal: &PrincipalName) -> TerminationOutcome {
        let key = principal.session_key();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.call(self.controller.terminate_sessions_for_username(&key)).await {
                Ok(()) => {
                    info!(principal = %principal, attempt, "Terminated VPN sessions");
                    self.audit_termination(principal, attempt, max_attempts).await;
                    return TerminationOutcome::Terminated {
                        attempt,
                        remaining: None,
                    };
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        principal = %principal,
                        attempt,
                        "Terminating VPN sessions failed, retrying in {:?}: {}",
                        self.config.retry_delay,
                        e
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        principal = %principal,
                        attempts = attempt,
                        "Giving up on terminating VPN sessions: {}",
                        e
                    );
                    return TerminationOutcome::Failed {
                        attempts: attempt,
                        error: e.to_string(),
                    };
                }
            }
        }
    }

    async fn audit_termination(&self, principal: &PrincipalName, attempt: u32, max_attempts: u32) {
        let entry = AuditEntry::system(
            actions::AUTO_TERMINATE_VPN,
            format!(
                "VPN sessions automatically terminated for removed user {} (attempt {}/{})",
                principal, attempt, max_attempts
            ),
        );
        if let Err(e) = self.audit.audit(entry).await {
            warn!(principal = %principal, "Failed to write termination audit entry: {}", e);
        }
    }

    async fn verify_group(&self, outcomes: &mut BTreeMap<PrincipalName, TerminationOutcome>) {
        let terminated = outcomes
            .values()
            .any(|o| matches!(o, TerminationOutcome::Terminated { .. }));
        if !terminated {
            return;
        }

        let sessions = match self.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Could not verify VPN session termination: {}", e);
                return;
            }
        };

        for (principal, outcome) in outcomes.iter_mut() {
            if let TerminationOutcome::Terminated { remaining, .. } = outcome {
                let left = sessions_for(&sessions, principal).len();
                if left > 0 {
                    warn!(principal = %principal, remaining = left, "VPN sessions still active after termination");
                }
                *remaining = Some(left);
            }
        }
    }

    async fn list_sessions(&self) -> vpn_sessions::Result<Vec<VpnSession>> {
        self.call(self.controller.list_active_sessions()).await
    }

    async fn call<T>(
        &self,
        request: impl std::future::Future<Output = vpn_sessions::Result<T>>,
    ) -> vpn_sessions::Result<T> {
        tokio::time::timeout(self.config.call_timeout, request)
            .await
            .unwrap_or(Err(ControllerError::Timeout(self.config.call_timeout)))
    }
}
