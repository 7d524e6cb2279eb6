//! FortiOS CLI over SSH

use crate::controller::{PortalGroups, VpnSessionController};
use crate::error::{ControllerError, Result};
use crate::fortios;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use vpn_types::{CliArgumentValidator, VpnSession};

/// Exit status `ssh` uses for its own connection errors.
const SSH_CONNECTION_ERROR: i32 = 255;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

impl SshConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            ssh_binary: default_ssh_binary(),
        }
    }

    /// Arguments passed to the `ssh` binary, destination last.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", self.username, self.host));
        args
    }
}

/// Runs a CLI script on the gateway and returns its standard output.
#[async_trait]
pub trait CliTransport: Send + Sync {
    async fn run(&self, script: &str) -> Result<String>;
}

#[async_trait]
impl<T: CliTransport + ?Sized> CliTransport for Arc<T> {
    async fn run(&self, script: &str) -> Result<String> {
        (**self).run(script).await
    }
}

/// Transport driving the system `ssh` client, with the script on stdin.
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Result<Self> {
        CliArgumentValidator::validate("gateway host", &config.host)?;
        CliArgumentValidator::validate("gateway user", &config.username)?;
        Ok(Self { config })
    }
}

#[async_trait]
impl CliTransport for SshTransport {
    async fn run(&self, script: &str) -> Result<String> {
        let mut child = Command::new(&self.config.ssh_binary)
            .args(self.config.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ControllerError::Unavailable(format!(
                    "cannot start {}: {}",
                    self.config.ssh_binary, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(SSH_CONNECTION_ERROR) | None => Err(ControllerError::Unavailable(format!(
                "ssh to {}:{} failed: {}",
                self.config.host, self.config.port, stderr
            ))),
            Some(status) => Err(ControllerError::CommandFailed { status, stderr }),
        }
    }
}

/// Session controller and portal-group manager speaking FortiOS CLI.
pub struct SshCliController<T = SshTransport> {
    transport: T,
}

impl SshCliController<SshTransport> {
    pub fn connect(config: SshConfig) -> Result<Self> {
        Ok(Self::with_transport(SshTransport::new(config)?))
    }
}

impl<T: CliTransport> SshCliController<T> {
    pub fn with_transport(transport: T) -> Self {
        Self { transport }
    }

    async fn run_checked(&self, script: &str) -> Result<String> {
        let output = self.transport.run(script).await?;
        fortios::check_cli_output(&output)?;
        Ok(output)
    }
}

#[async_trait]
impl<T: CliTransport> VpnSessionController for SshCliController<T> {
    async fn list_active_sessions(&self) -> Result<Vec<VpnSession>> {
        let output = self.run_checked(fortios::LIST_SESSIONS).await?;
        Ok(fortios::parse_sslvpn_list(&output))
    }

    async fn terminate_sessions_for_username(&self, username: &str) -> Result<()> {
        let sessions = self.list_active_sessions().await?;
        let matching: Vec<_> = sessions.iter().filter(|s| s.matches_key(username)).collect();
        if matching.is_empty() {
            tracing::debug!(username, "No active sessions to terminate");
            return Ok(());
        }

        let script = matching
            .iter()
            .map(|s| fortios::del_tunnel_command(&s.index))
            .collect::<Result<Vec<_>>>()?
            .join("\n");
        self.run_checked(&script).await?;
        tracing::info!(username, sessions = matching.len(), "Terminated VPN sessions");
        Ok(())
    }

    async fn terminate_session(&self, index: &str) -> Result<()> {
        self.run_checked(&fortios::del_tunnel_command(index)?).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: CliTransport> PortalGroups for SshCliController<T> {
    async fn group_members(&self, group: &str) -> Result<Vec<String>> {
        let output = self.run_checked(&fortios::show_group_script(group)?).await?;
        Ok(fortios::parse_group_members(&output))
    }

    async fn remove_member(&self, group: &str, member: &str) -> Result<Vec<String>> {
        let members = self.group_members(group).await?;
        if !members.iter().any(|m| m == member) {
            return Err(ControllerError::NotAMember {
                group: group.to_string(),
                member: member.to_string(),
            });
        }

        let remaining: Vec<String> = members.into_iter().filter(|m| m != member).collect();
        self.run_checked(&fortios::set_members_script(group, &remaining)?)
            .await?;
        tracing::info!(group, member, remaining = remaining.len(), "Removed portal group member");
        Ok(remaining)
    }
}
