use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "vpn-access",
    about = "VPN access administration: directory sync, RADIUS grants and FortiGate sessions",
    version = env!("CARGO_PKG_VERSION"),
    author = "VPN Project Team"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format (json, table, plain)
    #[arg(long, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Administrator recorded in the audit log (defaults to $USER)
    #[arg(long, global = true)]
    pub actor: Option<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run one directory reconciliation pass
    Sync,

    /// Run reconciliation periodically until interrupted
    Daemon {
        /// Override the configured interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Live VPN sessions on the gateway
    #[command(subcommand)]
    Sessions(SessionCommands),

    /// VPN access grants
    #[command(subcommand)]
    Access(AccessCommands),

    /// RADIUS server records
    #[command(subcommand)]
    Radius(RadiusCommands),

    /// VPN portal group membership
    #[command(subcommand)]
    Portal(PortalCommands),

    /// Show recent audit log entries
    Audit {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show recent sync events
    Events {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Apply the database schema
    Migrate,
}

#[derive(Subcommand, Clone, Debug)]
pub enum SessionCommands {
    /// List active sessions
    List {
        /// Only sessions of this user (bare name or principal)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Terminate every session of a principal
    Terminate {
        principal: String,
    },

    /// Terminate one session by gateway index
    Kill {
        index: String,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum AccessCommands {
    /// Show the servers a principal may use
    Show {
        principal: String,
    },

    /// Grant a principal access to a server
    Grant {
        principal: String,
        server_id: i64,
    },

    /// Revoke a principal's access to a server
    Revoke {
        principal: String,
        server_id: i64,
    },

    /// Replace a principal's servers; no ids revokes everything
    Set {
        principal: String,
        server_ids: Vec<i64>,
    },

    /// List principals holding access
    Users,

    /// Search mirrored users by name or principal
    Search {
        term: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum RadiusCommands {
    /// List RADIUS servers
    List,

    /// Add a RADIUS server
    Add {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Remove a RADIUS server and its grants
    Remove {
        id: i64,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum PortalCommands {
    /// List members of a portal group
    Members {
        /// Group name (defaults to gateway.portal_group)
        group: Option<String>,
    },

    /// Remove a user from a portal group
    Revoke {
        user: String,
        /// Group name (defaults to gateway.portal_group)
        #[arg(short, long)]
        group: Option<String>,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Check the configuration for problems
    Validate,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
    Plain,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Table => "table",
            OutputFormat::Plain => "plain",
        }
    }
}
