use async_trait::async_trait;
use clap::Parser;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use vpn_cli::{
    AccessCommands, AppContext, Cli, CliError, CommandHandler, Commands, ConfigManager,
    OutputFormat, PortalCommands, RadiusCommands, SessionCommands, StorageHandles,
};
use vpn_identity::StaticDirectory;
use vpn_sessions::{ControllerError, VpnSessionController};
use vpn_types::{actions, AuditActor, DirectoryUser, PrincipalName, VpnSession};
use vpn_users::{AccessStore, AuditLog, InMemoryStore, MirrorStore, RadiusServerStore};

#[derive(Default)]
struct RecordingGateway {
    sessions: Mutex<Vec<VpnSession>>,
    terminated: Mutex<Vec<String>>,
}

#[async_trait]
impl VpnSessionController for RecordingGateway {
    async fn list_active_sessions(&self) -> Result<Vec<VpnSession>, ControllerError> {
        Ok(self.sessions.lock().unwrap().clone())
    }

    async fn terminate_sessions_for_username(&self, username: &str) -> Result<(), ControllerError> {
        self.terminated.lock().unwrap().push(username.to_string());
        Ok(())
    }

    async fn terminate_session(&self, index: &str) -> Result<(), ControllerError> {
        self.terminated.lock().unwrap().push(format!("#{}", index));
        Ok(())
    }
}

fn principal(raw: &str) -> PrincipalName {
    PrincipalName::parse(raw).unwrap()
}

fn user(id: &str, name: &str, upn: &str) -> DirectoryUser {
    DirectoryUser::new(id, name, principal(upn))
}

struct Harness {
    _dir: TempDir,
    store: Arc<InMemoryStore>,
    gateway: Arc<RecordingGateway>,
    handler: CommandHandler,
}

fn harness(users: Vec<DirectoryUser>) -> Harness {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[database]\nbackend = \"memory\"\n").unwrap();
    let config_manager = ConfigManager::new(Some(path)).unwrap();

    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(RecordingGateway::default());
    let context = AppContext::with_stores(
        config_manager.get_config().clone(),
        StorageHandles::from_store(store.clone()),
        None,
    )
    .with_directory(Arc::new(StaticDirectory::new(users)))
    .with_gateway(gateway.clone(), None);

    let mut handler = CommandHandler::new(config_manager).with_context(context);
    handler.set_output_format(OutputFormat::Plain);
    handler.set_actor(Some("helpdesk".to_string()));

    Harness {
        _dir: dir,
        store,
        gateway,
        handler,
    }
}

#[test]
fn test_parse_access_set_with_global_flags() {
    let cli = Cli::try_parse_from([
        "vpn-access", "access", "set", "alice@example.com", "1", "3", "--format", "json",
        "--actor", "ops",
    ])
    .unwrap();

    assert_eq!(cli.format, OutputFormat::Json);
    assert_eq!(cli.actor.as_deref(), Some("ops"));
    match cli.command {
        Commands::Access(AccessCommands::Set {
            principal,
            server_ids,
        }) => {
            assert_eq!(principal, "alice@example.com");
            assert_eq!(server_ids, vec![1, 3]);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn test_parse_defaults() {
    let cli = Cli::try_parse_from(["vpn-access", "audit"]).unwrap();
    assert_eq!(cli.format, OutputFormat::Table);
    assert!(matches!(cli.command, Commands::Audit { limit: 50 }));

    let cli = Cli::try_parse_from(["vpn-access", "daemon", "--interval", "600"]).unwrap();
    assert!(matches!(cli.command, Commands::Daemon { interval: Some(600) }));

    assert!(Cli::try_parse_from(["vpn-access", "sessions", "terminate"]).is_err());
    assert!(Cli::try_parse_from(["vpn-access", "access", "grant", "a@b.com", "x"]).is_err());
}

#[tokio::test]
async fn test_sync_mirrors_directory() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness(vec![
        user("1", "Alice", "alice@example.com"),
        user("2", "Bob", "bob@example.com"),
    ]);

    let report = h.handler.run_sync().await?;
    assert_eq!(report.added, 2);
    assert_eq!(report.total_users, 2);
    assert!(report.has_changes);
    assert_eq!(h.store.read_mirror().await?.len(), 2);

    let again = h.handler.run_sync().await?;
    assert!(!again.has_changes);
    Ok(())
}

#[tokio::test]
async fn test_radius_and_access_commands_record_grants() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness(vec![user("1", "Alice", "alice@example.com")]);
    h.handler.execute(Commands::Sync).await?;

    h.handler
        .execute(Commands::Radius(RadiusCommands::Add {
            name: "radius-eu".to_string(),
            description: Some("EU gateway".to_string()),
        }))
        .await?;
    let server_id = h.store.list_servers().await?[0].id.0;

    h.handler
        .execute(Commands::Access(AccessCommands::Grant {
            principal: "alice@example.com".to_string(),
            server_id,
        }))
        .await?;

    let grants = h.store.grants_for(&principal("alice@example.com")).await?;
    assert_eq!(grants.len(), 1);

    let audit = h.store.list_audit(10).await?;
    assert!(audit.iter().any(|r| r.entry.action == actions::CREATE_RADIUS_SERVER));
    assert!(audit.iter().any(|r| {
        r.entry.action == actions::GRANT_VPN_ACCESS
            && r.entry.actor == AuditActor::Admin("helpdesk".to_string())
    }));

    h.handler
        .execute(Commands::Access(AccessCommands::Set {
            principal: "alice@example.com".to_string(),
            server_ids: Vec::new(),
        }))
        .await?;
    assert_eq!(
        h.store.grants_for(&principal("alice@example.com")).await?,
        BTreeSet::new()
    );
    Ok(())
}

#[tokio::test]
async fn test_grant_requires_mirrored_user() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness(Vec::new());
    h.handler
        .execute(Commands::Radius(RadiusCommands::Add {
            name: "radius-eu".to_string(),
            description: None,
        }))
        .await?;
    let server_id = h.store.list_servers().await?[0].id.0;

    let result = h
        .handler
        .execute(Commands::Access(AccessCommands::Grant {
            principal: "ghost@example.com".to_string(),
            server_id,
        }))
        .await;
    assert!(matches!(result, Err(CliError::StoreError(_))));
    assert!(h.store.list_grants().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_grant_rejects_malformed_principal() {
    let h = harness(Vec::new());
    let result = h
        .handler
        .execute(Commands::Access(AccessCommands::Grant {
            principal: "not-a-principal".to_string(),
            server_id: 1,
        }))
        .await;
    assert!(matches!(result, Err(CliError::ValidationError(_))));
}

#[tokio::test]
async fn test_session_terminate_uses_bare_key_and_audits() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness(Vec::new());
    h.gateway
        .sessions
        .lock()
        .unwrap()
        .push(VpnSession::new("4", "carol"));

    h.handler
        .execute(Commands::Sessions(SessionCommands::List { user: Some("carol@example.com".to_string()) }))
        .await?;
    h.handler
        .execute(Commands::Sessions(SessionCommands::Terminate {
            principal: "Carol@Example.com".to_string(),
        }))
        .await?;
    h.handler
        .execute(Commands::Sessions(SessionCommands::Kill {
            index: "4".to_string(),
        }))
        .await?;

    assert_eq!(
        *h.gateway.terminated.lock().unwrap(),
        vec!["carol".to_string(), "#4".to_string()]
    );
    let audit = h.store.list_audit(10).await?;
    let manual = audit
        .iter()
        .filter(|r| r.entry.action == actions::TERMINATE_VPN_SESSION)
        .count();
    assert_eq!(manual, 2);
    Ok(())
}

#[tokio::test]
async fn test_portal_commands_need_portal_support() {
    let h = harness(Vec::new());
    let result = h
        .handler
        .execute(Commands::Portal(PortalCommands::Members { group: None }))
        .await;
    assert!(matches!(result, Err(CliError::Unsupported(_))));
}

#[tokio::test]
async fn test_migrate_is_a_no_op_for_memory_backend() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness(Vec::new());
    h.handler.execute(Commands::Migrate).await?;
    Ok(())
}
