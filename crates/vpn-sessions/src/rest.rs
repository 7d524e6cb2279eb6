//! FortiGate REST API session controller

use crate::controller::VpnSessionController;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use vpn_types::VpnSession;

const SESSIONS_PATH: &str = "/api/v2/monitor/vpn/ssl";
const DELETE_PATH: &str = "/api/v2/monitor/vpn/ssl/delete";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    pub base_url: String,
    pub api_token: String,
    #[serde(default)]
    pub vdom: Option<String>,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_verify_tls() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            vdom: None,
            verify_tls: default_verify_tls(),
            timeout_secs: default_timeout(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    #[serde(default)]
    results: Vec<SslSession>,
}

#[derive(Debug, Deserialize)]
struct SslSession {
    index: u64,
    user_name: String,
    #[serde(default)]
    remote_host: Option<String>,
    #[serde(default)]
    user_group: Option<String>,
}

impl From<SslSession> for VpnSession {
    fn from(s: SslSession) -> Self {
        let mut session = VpnSession::new(s.index.to_string(), s.user_name);
        session.group = s.user_group;
        session.from_ip = s.remote_host;
        session
    }
}

pub struct FortiGateRestController {
    config: RestConfig,
    client: reqwest::Client,
}

impl FortiGateRestController {
    pub fn new(config: RestConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() || config.api_token.trim().is_empty() {
            return Err(ControllerError::Unavailable(
                "FortiGate REST base URL or API token is not set".to_string(),
            ));
        }
        if !config.verify_tls {
            tracing::warn!("TLS certificate verification is disabled for the FortiGate API");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;
        Ok(Self { config, client })
    }

    fn with_vdom(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.vdom {
            Some(vdom) => request.query(&[("vdom", vdom)]),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self
            .with_vdom(request)
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(ControllerError::Unavailable(format!("FortiGate returned {}: {}", status, body)))
        } else {
            Err(ControllerError::Protocol(format!("FortiGate returned {}: {}", status, body)))
        }
    }

    async fn delete_session(&self, index: u64) -> Result<()> {
        let request = self
            .client
            .post(self.config.url(DELETE_PATH))
            .json(&json!({ "type": "websession", "index": index }));
        self.send(request).await?;
        tracing::debug!(index, "Deleted SSL-VPN session");
        Ok(())
    }
}

#[async_trait]
impl VpnSessionController for FortiGateRestController {
    async fn list_active_sessions(&self) -> Result<Vec<VpnSession>> {
        let response = self
            .send(self.client.get(self.config.url(SESSIONS_PATH)))
            .await?;
        let body: SessionsResponse = response
            .json()
            .await
            .map_err(|e| ControllerError::Protocol(format!("invalid session list: {}", e)))?;
        Ok(body.results.into_iter().map(VpnSession::from).collect())
    }

    async fn terminate_sessions_for_username(&self, username: &str) -> Result<()> {
        let sessions = self.list_active_sessions().await?;
        let mut terminated = 0usize;
        for session in sessions.iter().filter(|s| s.matches_key(username)) {
            self.terminate_session(&session.index).await?;
            terminated += 1;
        }
        if terminated > 0 {
            tracing::info!(username, sessions = terminated, "Terminated VPN sessions");
        }
        Ok(())
    }

    async fn terminate_session(&self, index: &str) -> Result<()> {
        let index: u64 = index.parse().map_err(|_| {
            ControllerError::Protocol(format!("session index '{}' is not numeric", index))
        })?;
        self.delete_session(index).await
    }
}
