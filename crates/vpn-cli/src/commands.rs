use crate::cli::*;
use crate::config::{ConfigManager, DatabaseBackend};
use crate::context::AppContext;
use crate::utils::{display, format_utils};
use crate::{CliError, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio::sync::OnceCell;
use vpn_sessions::VpnSession;
use vpn_sync::{SyncReport, SyncScheduler};
use vpn_types::{
    actions, AuditActor, AuditEntry, AuditRecord, PrincipalAccess, PrincipalName, RadiusServer,
    RadiusServerId, SyncEvent,
};
use vpn_users::AccessManager;

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Index")]
    index: String,
    #[tabled(rename = "User")]
    username: String,
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "From")]
    from_ip: String,
}

#[derive(Tabled)]
struct ServerRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Created")]
    created: String,
}

#[derive(Tabled)]
struct AccessRow {
    #[tabled(rename = "Principal")]
    principal: String,
    #[tabled(rename = "Name")]
    display_name: String,
    #[tabled(rename = "Servers")]
    servers: String,
}

#[derive(Tabled)]
struct AuditRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Actor")]
    actor: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Details")]
    details: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Added")]
    added: usize,
    #[tabled(rename = "Updated")]
    updated: usize,
    #[tabled(rename = "Deleted")]
    deleted: usize,
    #[tabled(rename = "Total")]
    total: usize,
}

fn session_row(session: &VpnSession) -> SessionRow {
    SessionRow {
        index: session.index.clone(),
        username: session.username.clone(),
        group: format_utils::format_optional(session.group.as_deref()),
        from_ip: format_utils::format_optional(session.from_ip.as_deref()),
    }
}

fn server_row(server: &RadiusServer) -> ServerRow {
    ServerRow {
        id: server.id.0,
        name: server.name.clone(),
        description: format_utils::format_optional(server.description.as_deref()),
        created: format_utils::format_timestamp(server.created_at),
    }
}

fn access_row(access: &PrincipalAccess) -> AccessRow {
    AccessRow {
        principal: access.principal_name.to_string(),
        display_name: access.display_name.clone(),
        servers: format_utils::format_list(&access.server_names()),
    }
}

fn audit_row(record: &AuditRecord) -> AuditRow {
    AuditRow {
        time: format_utils::format_timestamp(record.timestamp),
        actor: record.entry.actor.to_string(),
        action: record.entry.action.clone(),
        details: format_utils::truncate_string(&record.entry.details, 80),
    }
}

fn event_row(event: &SyncEvent) -> EventRow {
    EventRow {
        time: format_utils::format_timestamp(event.timestamp),
        added: event.counts.added,
        updated: event.counts.updated,
        deleted: event.counts.deleted,
        total: event.counts.total_users,
    }
}

fn parse_principal(raw: &str) -> Result<PrincipalName> {
    Ok(PrincipalName::parse(raw.trim())?)
}

/// Bare gateway username for a user given either bare or as a principal.
fn session_key(user: &str) -> Result<String> {
    if user.contains('@') {
        Ok(parse_principal(user)?.session_key())
    } else if user.trim().is_empty() {
        Err(CliError::InvalidInput("user name is empty".to_string()))
    } else {
        Ok(user.trim().to_lowercase())
    }
}

fn default_actor() -> AuditActor {
    let name = std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "admin".to_string());
    AuditActor::Admin(name)
}

pub struct CommandHandler {
    config_manager: ConfigManager,
    context: OnceCell<AppContext>,
    output_format: OutputFormat,
    actor: AuditActor,
}

impl CommandHandler {
    pub fn new(config_manager: ConfigManager) -> Self {
        Self {
            config_manager,
            context: OnceCell::new(),
            output_format: OutputFormat::Table,
            actor: default_actor(),
        }
    }

    /// Use an already wired context instead of connecting from config.
    pub fn with_context(mut self, context: AppContext) -> Self {
        self.context = OnceCell::new_with(Some(context));
        self
    }

    pub fn set_output_format(&mut self, format: OutputFormat) {
        self.output_format = format;
    }

    pub fn set_actor(&mut self, actor: Option<String>) {
        if let Some(name) = actor.filter(|n| !n.trim().is_empty()) {
            self.actor = AuditActor::Admin(name.trim().to_string());
        }
    }

    pub async fn execute(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Sync => self.run_sync().await.map(|_| ()),
            Commands::Daemon { interval } => self.run_daemon(interval).await,
            Commands::Sessions(cmd) => self.handle_session_command(cmd).await,
            Commands::Access(cmd) => self.handle_access_command(cmd).await,
            Commands::Radius(cmd) => self.handle_radius_command(cmd).await,
            Commands::Portal(cmd) => self.handle_portal_command(cmd).await,
            Commands::Audit { limit } => self.show_audit(limit).await,
            Commands::Events { limit } => self.show_events(limit).await,
            Commands::Config(cmd) => self.handle_config_command(cmd).await,
            Commands::Migrate => self.migrate().await,
        }
    }

    async fn context(&self) -> Result<&AppContext> {
        self.context
            .get_or_try_init(|| AppContext::connect(self.config_manager.get_config().clone()))
            .await
    }

    async fn access_manager(&self) -> Result<AccessManager> {
        let context = self.context().await?;
        Ok(AccessManager::new(context.stores().storage.clone(), self.actor.clone()))
    }

    async fn audit(&self, action: &str, details: String) -> Result<()> {
        let context = self.context().await?;
        context
            .stores()
            .audit
            .audit(AuditEntry::new(self.actor.clone(), action, details))
            .await?;
        Ok(())
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn print_table<R: Tabled>(&self, rows: Vec<R>, empty: &str) {
        if rows.is_empty() {
            display::info(empty);
        } else {
            println!("{}", Table::new(rows));
        }
    }

    // Sync

    pub async fn run_sync(&self) -> Result<SyncReport> {
        let reconciler = self.context().await?.reconciler()?;
        let report = reconciler.run().await?;

        match self.output_format {
            OutputFormat::Json => self.print_json(&report)?,
            _ => {
                if report.has_changes {
                    display::success("Directory sync completed with changes");
                } else {
                    display::success("Directory sync completed, no changes");
                }
                display::key_value("Added", report.added);
                display::key_value("Updated", report.updated);
                display::key_value("Removed", report.removed);
                display::key_value("Total users", report.total_users);
                display::key_value("Has changes", report.has_changes);
                if report.terminations.requested > 0 {
                    display::key_value(
                        "Sessions",
                        format!(
                            "{} terminated, {} failed, {} without sessions",
                            report.terminations.terminated,
                            report.terminations.failed,
                            report.terminations.no_sessions
                        ),
                    );
                }
            }
        }
        Ok(report)
    }

    async fn run_daemon(&self, interval: Option<u64>) -> Result<()> {
        let context = self.context().await?;
        let interval = interval
            .map(Duration::from_secs)
            .unwrap_or_else(|| context.config().sync.interval());
        let scheduler = SyncScheduler::new(context.reconciler()?, interval);

        scheduler.start().await?;
        display::info(&format!(
            "Sync scheduler running every {}s, press Ctrl-C to stop",
            scheduler.interval().as_secs()
        ));

        tokio::signal::ctrl_c().await?;
        display::info("Stopping sync scheduler");
        scheduler.stop().await;
        Ok(())
    }

    // Sessions

    async fn handle_session_command(&self, command: SessionCommands) -> Result<()> {
        let sessions = self.context().await?.sessions()?;

        match command {
            SessionCommands::List { user } => {
                let mut active = sessions.list_active_sessions().await?;
                if let Some(user) = user {
                    let key = session_key(&user)?;
                    active.retain(|s| s.matches_key(&key));
                }

                match self.output_format {
                    OutputFormat::Json => self.print_json(&active)?,
                    OutputFormat::Table => {
                        self.print_table(active.iter().map(session_row).collect(), "No active VPN sessions")
                    }
                    OutputFormat::Plain => {
                        for s in &active {
                            println!("{}\t{}", s.index, s.username);
                        }
                    }
                }
            }
            SessionCommands::Terminate { principal } => {
                let principal = parse_principal(&principal)?;
                sessions
                    .terminate_sessions_for_username(&principal.session_key())
                    .await?;
                self.audit(
                    actions::TERMINATE_VPN_SESSION,
                    format!("Terminated VPN sessions of {}", principal),
                )
                .await?;
                display::success(&format!("Terminated VPN sessions of {}", principal));
            }
            SessionCommands::Kill { index } => {
                sessions.terminate_session(&index).await?;
                self.audit(
                    actions::TERMINATE_VPN_SESSION,
                    format!("Terminated VPN session {}", index),
                )
                .await?;
                display::success(&format!("Terminated VPN session {}", index));
            }
        }
        Ok(())
    }

    // Access

    async fn handle_access_command(&self, command: AccessCommands) -> Result<()> {
        let manager = self.access_manager().await?;

        match command {
            AccessCommands::Show { principal } => {
                let principal = parse_principal(&principal)?;
                let servers = manager.access_for(&principal).await?;
                match self.output_format {
                    OutputFormat::Json => self.print_json(&servers)?,
                    _ => self.print_table(
                        servers.iter().map(server_row).collect(),
                        &format!("{} has no VPN access", principal),
                    ),
                }
            }
            AccessCommands::Grant {
                principal,
                server_id,
            } => {
                let principal = parse_principal(&principal)?;
                if manager.grant(&principal, RadiusServerId(server_id)).await? {
                    display::success(&format!("Granted server {} to {}", server_id, principal));
                } else {
                    display::info(&format!("{} already has server {}", principal, server_id));
                }
            }
            AccessCommands::Revoke {
                principal,
                server_id,
            } => {
                let principal = parse_principal(&principal)?;
                if manager.revoke(&principal, RadiusServerId(server_id)).await? {
                    display::success(&format!("Revoked server {} from {}", server_id, principal));
                } else {
                    display::info(&format!("{} did not have server {}", principal, server_id));
                }
            }
            AccessCommands::Set {
                principal,
                server_ids,
            } => {
                let principal = parse_principal(&principal)?;
                let servers: BTreeSet<RadiusServerId> =
                    server_ids.into_iter().map(RadiusServerId).collect();
                let change = manager.set_access(&principal, &servers).await?;

                match self.output_format {
                    OutputFormat::Json => self.print_json(&serde_json::json!({
                        "principal": principal,
                        "action": change.action(),
                        "granted": change.granted,
                        "revoked": change.revoked,
                    }))?,
                    _ if change.is_empty() => {
                        display::info(&format!("No access changes for {}", principal))
                    }
                    _ => {
                        display::success(&format!("Updated access for {}", principal));
                        let granted: Vec<&str> = change.granted.iter().map(|s| s.name.as_str()).collect();
                        let revoked: Vec<&str> = change.revoked.iter().map(|s| s.name.as_str()).collect();
                        display::key_value("Granted", format_utils::format_list(&granted));
                        display::key_value("Revoked", format_utils::format_list(&revoked));
                    }
                }
            }
            AccessCommands::Users => {
                let users = manager.users_with_access().await?;
                match self.output_format {
                    OutputFormat::Json => self.print_json(&users)?,
                    OutputFormat::Table => self.print_table(
                        users.iter().map(access_row).collect(),
                        "No users hold VPN access",
                    ),
                    OutputFormat::Plain => {
                        for user in &users {
                            println!("{}\t{}", user.principal_name, user.server_names().join(","));
                        }
                    }
                }
            }
            AccessCommands::Search { term, limit } => {
                let users = manager.search_users(&term, limit).await?;
                match self.output_format {
                    OutputFormat::Json => self.print_json(&users)?,
                    _ => {
                        if users.is_empty() {
                            display::info(&format!("No users match '{}'", term));
                        }
                        for user in &users {
                            println!("{}\t{}", user.principal_name, user.display_name);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // RADIUS servers

    async fn handle_radius_command(&self, command: RadiusCommands) -> Result<()> {
        let manager = self.access_manager().await?;

        match command {
            RadiusCommands::List => {
                let servers = manager.list_servers().await?;
                match self.output_format {
                    OutputFormat::Json => self.print_json(&servers)?,
                    OutputFormat::Table => self.print_table(
                        servers.iter().map(server_row).collect(),
                        "No RADIUS servers configured",
                    ),
                    OutputFormat::Plain => {
                        for server in &servers {
                            println!("{}\t{}", server.id, server.name);
                        }
                    }
                }
            }
            RadiusCommands::Add { name, description } => {
                let server = manager.create_server(&name, description.as_deref()).await?;
                match self.output_format {
                    OutputFormat::Json => self.print_json(&server)?,
                    _ => display::success(&format!(
                        "Created RADIUS server {} (id {})",
                        server.name, server.id
                    )),
                }
            }
            RadiusCommands::Remove { id } => {
                let server = manager.delete_server(RadiusServerId(id)).await?;
                display::success(&format!("Removed RADIUS server {} (id {})", server.name, id));
            }
        }
        Ok(())
    }

    // Portal groups

    async fn handle_portal_command(&self, command: PortalCommands) -> Result<()> {
        let context = self.context().await?;
        let portal = context.portal_groups()?;
        let default_group = context.config().gateway.portal_group.clone();

        match command {
            PortalCommands::Members { group } => {
                let group = group.unwrap_or(default_group);
                let members = portal.group_members(&group).await?;
                match self.output_format {
                    OutputFormat::Json => self.print_json(&serde_json::json!({
                        "group": group,
                        "members": members,
                    }))?,
                    _ => {
                        display::header(&format!("Members of {}", group));
                        for member in &members {
                            println!("  {}", member);
                        }
                        display::key_value("Total", members.len());
                    }
                }
            }
            PortalCommands::Revoke { user, group } => {
                let group = group.unwrap_or(default_group);
                let remaining = portal.remove_member(&group, &user).await?;
                self.audit(
                    actions::REVOKE_PORTAL_ACCESS,
                    format!("Removed {} from portal group {}", user, group),
                )
                .await?;
                display::success(&format!(
                    "Removed {} from {} ({} members left)",
                    user,
                    group,
                    remaining.len()
                ));
            }
        }
        Ok(())
    }

    // Logs

    async fn show_audit(&self, limit: usize) -> Result<()> {
        let records = self.access_manager().await?.recent_audit(limit).await?;
        match self.output_format {
            OutputFormat::Json => self.print_json(&records)?,
            OutputFormat::Table => {
                self.print_table(records.iter().map(audit_row).collect(), "Audit log is empty")
            }
            OutputFormat::Plain => {
                for record in &records {
                    println!(
                        "{}\t{}\t{}\t{}",
                        record.timestamp.to_rfc3339(),
                        record.entry.actor,
                        record.entry.action,
                        record.entry.details
                    );
                }
            }
        }
        Ok(())
    }

    async fn show_events(&self, limit: usize) -> Result<()> {
        let events = self.access_manager().await?.recent_sync_events(limit).await?;
        match self.output_format {
            OutputFormat::Json => self.print_json(&events)?,
            _ => self.print_table(events.iter().map(event_row).collect(), "No sync events recorded"),
        }
        Ok(())
    }

    // Configuration

    async fn handle_config_command(&self, command: ConfigCommands) -> Result<()> {
        match command {
            ConfigCommands::Show => {
                let mut config = self.config_manager.get_config().clone();
                for secret in [
                    &mut config.directory.client_secret,
                    &mut config.gateway.api_token,
                ] {
                    if !secret.is_empty() {
                        *secret = "********".to_string();
                    }
                }

                match self.output_format {
                    OutputFormat::Json => self.print_json(&config)?,
                    _ => {
                        display::info(&format!(
                            "Configuration file: {}",
                            self.config_manager.config_path().display()
                        ));
                        let content = toml::to_string_pretty(&config).map_err(|e| {
                            CliError::ConfigError(format!("Failed to serialize config: {}", e))
                        })?;
                        println!("{}", content);
                    }
                }
            }
            ConfigCommands::Validate => {
                let warnings = self.config_manager.validate_config()?;
                if warnings.is_empty() {
                    display::success("Configuration is valid");
                } else {
                    for warning in &warnings {
                        display::warning(warning);
                    }
                }
            }
            ConfigCommands::Init { force } => {
                let path = self.config_manager.config_path();
                ConfigManager::init(path, force)?;
                display::success(&format!("Wrote default configuration to {}", path.display()));
            }
        }
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        if self.config_manager.get_config().database.backend == DatabaseBackend::Memory {
            display::info("The memory backend has no schema to migrate");
            return Ok(());
        }

        let store = self.context().await?.postgres().ok_or_else(|| {
            CliError::Unsupported("migrations need the postgres backend".to_string())
        })?;
        store.migrate().await?;
        display::success("Database schema is up to date");
        Ok(())
    }
}
