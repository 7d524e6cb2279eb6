//! Microsoft Graph directory source using the client-credentials flow

use crate::error::{DirectoryError, Result};
use crate::source::{apply_domain_filter, DirectorySource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use vpn_types::{DirectoryUser, DomainFilter, PrincipalName};

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const USERS_QUERY: &str = "users?$select=id,displayName,userPrincipalName&$top=999";

/// Tokens are refreshed this long before they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_authority")]
    pub authority_url: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_graph_url() -> String {
    DEFAULT_GRAPH_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl GraphConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_url: default_authority(),
            graph_url: default_graph_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(DirectoryError::ConfigError(format!(
                    "Graph {} is not set",
                    field
                )));
            }
        }
        Ok(())
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    fn users_url(&self) -> String {
        format!("{}/{}", self.graph_url.trim_end_matches('/'), USERS_QUERY)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphUser {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    user_principal_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    value: Vec<GraphUser>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Directory source backed by the Microsoft Graph `users` collection.
pub struct GraphDirectory {
    config: GraphConfig,
    filter: DomainFilter,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl GraphDirectory {
    pub fn new(config: GraphConfig, filter: DomainFilter) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            config,
            filter,
            client,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
        ];
        let response = self
            .client
            .post(self.config.token_url())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Authentication(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = lifetime.as_secs(), "Acquired Graph access token");

        Ok(token.access_token)
    }

    async fn fetch_page(&self, url: &str, token: &str) -> Result<UsersPage> {
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl DirectorySource for GraphDirectory {
    async fn fetch_users(&self) -> Result<Vec<DirectoryUser>> {
        let token = self.access_token().await?;
        let mut users = Vec::new();
        let mut next = Some(self.config.users_url());
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            let page = self.fetch_page(&url, &token).await?;
            pages += 1;

            for raw in page.value {
                let Some(upn) = raw.user_principal_name else {
                    tracing::debug!(id = %raw.id, "Skipping directory user without principal name");
                    continue;
                };
                match PrincipalName::parse(upn.as_str()) {
                    Ok(principal) => users.push(DirectoryUser::new(
                        raw.id,
                        raw.display_name.unwrap_or_default(),
                        principal,
                    )),
                    Err(e) => {
                        tracing::warn!(upn = %upn, error = %e, "Skipping directory user with invalid principal name");
                    }
                }
            }

            if let Some(link) = page.next_link {
                if link == url {
                    return Err(DirectoryError::InvalidResponse(
                        "nextLink points at the page just read".to_string(),
                    ));
                }
                next = Some(link);
            }
        }

        tracing::info!(pages, fetched = users.len(), "Fetched users from Graph");
        Ok(apply_domain_filter(users, &self.filter))
    }
}
