use crate::error::{CliError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vpn_identity::GraphConfig;
use vpn_sessions::{RestConfig, SshConfig};
use vpn_sync::TerminatorConfig;
use vpn_types::{DomainFilter, DEFAULT_ALLOWED_DOMAINS};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/vpn-access/config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub directory: DirectoryConfig,
    pub gateway: GatewayConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryProvider {
    Graph,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub provider: DirectoryProvider,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub allowed_domains: String,
    pub file_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAdapter {
    Ssh,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub adapter: GatewayAdapter,
    pub host: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub identity_file: Option<PathBuf>,
    pub api_token: String,
    pub vdom: Option<String>,
    pub verify_tls: bool,
    /// Portal user group managed by `portal` commands.
    pub portal_group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: u64,
    pub batch_size: usize,
    pub group_size: usize,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub call_timeout_secs: u64,
    pub verify_after_terminate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Postgres,
            url: "postgres://vpn_access@localhost/vpn_access".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            provider: DirectoryProvider::Graph,
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            allowed_domains: DEFAULT_ALLOWED_DOMAINS.to_string(),
            file_path: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            adapter: GatewayAdapter::Ssh,
            host: String::new(),
            ssh_port: 22,
            ssh_username: "admin".to_string(),
            identity_file: None,
            api_token: String::new(),
            vdom: None,
            verify_tls: true,
            portal_group: "SSL-VPN-Users".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let terminator = TerminatorConfig::default();
        Self {
            interval_secs: vpn_sync::DEFAULT_SYNC_INTERVAL.as_secs(),
            batch_size: vpn_users::MIRROR_BATCH_SIZE,
            group_size: terminator.group_size,
            max_attempts: terminator.max_attempts,
            retry_delay_secs: terminator.retry_delay.as_secs(),
            call_timeout_secs: terminator.call_timeout.as_secs(),
            verify_after_terminate: terminator.verify,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl DirectoryConfig {
    pub fn domain_filter(&self) -> Result<DomainFilter> {
        Ok(DomainFilter::parse(&self.allowed_domains)?)
    }

    pub fn graph_config(&self) -> GraphConfig {
        let mut config = GraphConfig::new(&self.tenant_id, &self.client_id, &self.client_secret);
        config.request_timeout_secs = self.request_timeout_secs;
        config
    }
}

impl GatewayConfig {
    pub fn ssh_config(&self) -> SshConfig {
        let mut config = SshConfig::new(&self.host, &self.ssh_username);
        config.port = self.ssh_port;
        config.identity_file = self.identity_file.clone();
        config
    }

    pub fn rest_config(&self) -> RestConfig {
        let base_url = if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.clone()
        } else {
            format!("https://{}", self.host)
        };
        let mut config = RestConfig::new(base_url, &self.api_token);
        config.vdom = self.vdom.clone();
        config.verify_tls = self.verify_tls;
        config
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn terminator_config(&self) -> TerminatorConfig {
        TerminatorConfig {
            group_size: self.group_size,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            verify: self.verify_after_terminate,
        }
    }
}

pub struct ConfigManager {
    config: AppConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load the config file, writing defaults when it does not exist, then
    /// apply `.env` and environment overrides.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);

        let mut config = if config_path.exists() {
            Self::load_config(&config_path)?
        } else {
            let default_config = AppConfig::default();
            Self::save_config(&default_config, &config_path)?;
            default_config
        };

        // A missing .env file is normal.
        let _ = dotenvy::dotenv();
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write the default configuration to `path`, refusing to clobber an
    /// existing file unless `force` is set.
    pub fn init(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(CliError::ConfigError(format!(
                "{} already exists, use --force to overwrite",
                path.display()
            )));
        }
        Self::save_config(&AppConfig::default(), path)
    }

    pub fn validate_config(&self) -> Result<Vec<String>> {
        let config = &self.config;
        let mut warnings = Vec::new();

        if config.database.backend == DatabaseBackend::Postgres && config.database.url.is_empty() {
            warnings.push("Database URL is empty".to_string());
        }
        if config.database.backend == DatabaseBackend::Memory {
            warnings.push("Memory database backend keeps no state between runs".to_string());
        }
        if config.database.max_connections == 0 {
            warnings.push("Database max connections must be at least 1".to_string());
        }

        if let Err(e) = config.directory.domain_filter() {
            warnings.push(format!("Allowed domains: {}", e));
        }
        match config.directory.provider {
            DirectoryProvider::Graph => {
                if let Err(e) = config.directory.graph_config().validate() {
                    warnings.push(e.to_string());
                }
            }
            DirectoryProvider::File => {
                if config.directory.file_path.is_none() {
                    warnings.push("File directory provider needs directory.file_path".to_string());
                }
            }
        }

        if config.gateway.host.is_empty() {
            warnings.push("Gateway host is not set".to_string());
        }
        if config.gateway.adapter == GatewayAdapter::Rest {
            if config.gateway.api_token.is_empty() {
                warnings.push("Gateway API token is not set".to_string());
            }
            if !config.gateway.verify_tls {
                warnings.push("Gateway TLS verification is disabled".to_string());
            }
        }

        let sync = &config.sync;
        if sync.interval_secs < 60 {
            warnings.push("Sync interval should be at least 60 seconds".to_string());
        }
        if sync.batch_size == 0 {
            warnings.push("Sync batch size must be at least 1".to_string());
        }
        if sync.group_size == 0 {
            warnings.push("Termination group size must be at least 1".to_string());
        }
        if sync.max_attempts == 0 {
            warnings.push("Termination max attempts must be at least 1".to_string());
        }
        if sync.call_timeout_secs == 0 {
            warnings.push("Gateway call timeout must be at least 1 second".to_string());
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&config.logging.level.as_str()) {
            warnings.push(format!("Unknown log level '{}'", config.logging.level));
        }

        Ok(warnings)
    }

    fn default_config_path() -> PathBuf {
        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return system;
        }
        match dirs::config_dir() {
            Some(config_dir) => config_dir.join("vpn-access").join("config.toml"),
            None => system,
        }
    }

    fn load_config(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::ConfigError(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| CliError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CliError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| CliError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| CliError::ConfigError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

/// Environment variables that override file settings.
pub fn apply_env_overrides(config: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(tenant) = var("AZURE_TENANT_ID") {
        config.directory.tenant_id = tenant;
    }
    if let Some(client) = var("AZURE_CLIENT_ID") {
        config.directory.client_id = client;
    }
    if let Some(secret) = var("AZURE_CLIENT_SECRET") {
        config.directory.client_secret = secret;
    }
    if let Some(domains) = var("ALLOWED_DOMAINS") {
        config.directory.allowed_domains = domains;
    }
    if let Some(host) = var("FORTIGATE_IP") {
        config.gateway.host = host;
    }
    if let Some(port) = var("FORTIGATE_SSH_PORT") {
        match port.parse() {
            Ok(port) => config.gateway.ssh_port = port,
            Err(_) => tracing::warn!(value = %port, "Ignoring invalid FORTIGATE_SSH_PORT"),
        }
    }
    if let Some(user) = var("FORTIGATE_SSH_USERNAME") {
        config.gateway.ssh_username = user;
    }
    if let Some(token) = var("FORTIGATE_API_TOKEN") {
        config.gateway.api_token = token;
    }
}
