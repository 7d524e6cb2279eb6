//! Integration tests for reconciliation passes and session termination

use async_trait::async_trait;
use mockall::mock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use vpn_identity::{DirectoryError, DirectorySource, StaticDirectory};
use vpn_sessions::{ControllerError, VpnSessionController};
use vpn_sync::{
    Reconciler, SessionTerminator, SyncError, SyncScheduler, TerminationOutcome, TerminatorConfig,
};
use vpn_types::{actions, AccessGrant, DirectoryUser, MirrorRecord, PrincipalName, VpnSession};
use vpn_users::{
    AccessStore, AuditLog, AuditSink, InMemoryStore, MirrorStore, RadiusServerStore, SyncBackend,
    SyncEventLog,
};

mock! {
    pub Controller {}

    #[async_trait]
    impl VpnSessionController for Controller {
        async fn list_active_sessions(&self) -> vpn_sessions::Result<Vec<VpnSession>>;
        async fn terminate_sessions_for_username(&self, username: &str) -> vpn_sessions::Result<()>;
        async fn terminate_session(&self, index: &str) -> vpn_sessions::Result<()>;
    }
}

fn principal(name: &str) -> PrincipalName {
    PrincipalName::parse(name).unwrap()
}

fn user(name: &str, display: &str) -> DirectoryUser {
    DirectoryUser::new(format!("id-{}", name), display, principal(name))
}

fn session(index: &str, username: &str) -> VpnSession {
    VpnSession::new(index, username)
}

fn reconciler(
    directory: Arc<dyn DirectorySource>,
    store: &Arc<InMemoryStore>,
    controller: Arc<dyn VpnSessionController>,
) -> Reconciler {
    let backend: Arc<dyn SyncBackend> = store.clone();
    let audit: Arc<dyn AuditSink> = store.clone();
    let terminator = SessionTerminator::new(controller, audit, TerminatorConfig::default());
    Reconciler::new(directory, backend, terminator)
}

async fn grant(store: &InMemoryStore, name: &str) {
    let server = match store.list_servers().await.unwrap().into_iter().next() {
        Some(server) => server,
        None => store.create_server("radius-1", None).await.unwrap(),
    };
    store
        .grant_access(&AccessGrant {
            principal_name: principal(name),
            radius_server_id: server.id,
        })
        .await
        .unwrap();
}

async fn mirror_names(store: &InMemoryStore) -> BTreeSet<String> {
    store
        .read_mirror()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.principal_name.to_string())
        .collect()
}

async fn termination_audits(store: &InMemoryStore) -> Vec<String> {
    store
        .list_audit(100)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.entry.action == actions::AUTO_TERMINATE_VPN)
        .map(|r| r.entry.details)
        .collect()
}

#[tokio::test]
async fn test_added_and_removed_users() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store
        .seed_mirror([user("b@x.com", "B").into(), user("c@x.com", "C").into()])
        .await;
    let directory = Arc::new(StaticDirectory::new(vec![user("a@x.com", "A"), user("b@x.com", "B")]));
    let reconciler = reconciler(directory, &store, Arc::new(MockController::new()));

    let report = reconciler.run().await?;

    assert_eq!((report.added, report.updated, report.removed), (1, 0, 1));
    assert_eq!(report.total_users, 2);
    assert!(report.has_changes);
    assert_eq!(
        mirror_names(&store).await,
        BTreeSet::from(["a@x.com".to_string(), "b@x.com".to_string()])
    );

    let events = store.list_sync_events(10).await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].counts.added, 1);
    assert_eq!(events[0].counts.deleted, 1);
    assert_eq!(events[0].counts.updated, 0);
    assert_eq!(events[0].counts.total_users, 2);
    Ok(())
}

#[tokio::test]
async fn test_changed_display_name_updates_mirror() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store.seed_mirror([user("a@x.com", "Alicia").into()]).await;
    let directory = Arc::new(StaticDirectory::new(vec![user("a@x.com", "Alice")]));
    let reconciler = reconciler(directory, &store, Arc::new(MockController::new()));

    let report = reconciler.run().await?;

    assert_eq!(report.updated, 1);
    let record = store.find_user(&principal("a@x.com")).await?.unwrap();
    assert_eq!(record.display_name, "Alice");
    Ok(())
}

#[tokio::test]
async fn test_second_pass_without_changes() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let directory = Arc::new(StaticDirectory::new(vec![user("a@x.com", "A"), user("b@x.com", "B")]));
    let reconciler = reconciler(directory, &store, Arc::new(MockController::new()));

    assert!(reconciler.run().await?.has_changes);
    let second = reconciler.run().await?;

    assert!(!second.has_changes);
    assert_eq!(second.total_users, 2);
    assert_eq!(store.list_sync_events(10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_removed_without_access_skips_terminator() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store.seed_mirror([user("c@x.com", "C").into()]).await;
    // No expectations: any controller call fails the test.
    let controller = MockController::new();
    let reconciler = reconciler(Arc::new(StaticDirectory::default()), &store, Arc::new(controller));

    let report = reconciler.run().await?;

    assert_eq!(report.removed, 1);
    assert_eq!(report.terminations.requested, 0);
    assert!(mirror_names(&store).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_removed_user_sessions_terminated_once() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store
        .seed_mirror([user("bob@x.com", "Bob").into(), user("al@x.com", "Al").into()])
        .await;
    grant(&store, "bob@x.com").await;
    grant(&store, "al@x.com").await;

    let mut controller = MockController::new();
    let mut listings = vec![
        vec![],
        vec![session("1", "bob"), session("2", "BOB"), session("3", "al")],
    ];
    controller
        .expect_list_active_sessions()
        .times(2)
        .returning(move || Ok(listings.pop().unwrap_or_default()));
    controller
        .expect_terminate_sessions_for_username()
        .withf(|username| username == "bob")
        .times(1)
        .returning(|_| Ok(()));

    let directory = Arc::new(StaticDirectory::new(vec![user("al@x.com", "Al")]));
    let reconciler = reconciler(directory, &store, Arc::new(controller));

    let report = reconciler.run().await?;

    assert_eq!(report.removed, 1);
    assert_eq!(report.terminations.terminated, 1);
    assert_eq!(report.terminations.partial, 0);
    let audits = termination_audits(&store).await;
    assert_eq!(audits.len(), 1);
    assert!(audits[0].contains("bob@x.com"));
    assert!(audits[0].contains("attempt 1/3"));
    assert!(store
        .find_access_grants(&BTreeSet::from([principal("bob@x.com")]))
        .await?
        .is_empty());
    assert_eq!(store.grants_for(&principal("al@x.com")).await?.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failing_controller_retries_three_times() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store.seed_mirror([user("bob@x.com", "Bob").into()]).await;
    grant(&store, "bob@x.com").await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();
    let mut controller = MockController::new();
    controller
        .expect_list_active_sessions()
        .times(1)
        .returning(|| Ok(vec![session("7", "bob")]));
    controller
        .expect_terminate_sessions_for_username()
        .times(3)
        .returning(move |_| {
            recorded.lock().unwrap().push(Instant::now());
            Err(ControllerError::Unavailable("ssh: connect refused".to_string()))
        });

    let reconciler = reconciler(Arc::new(StaticDirectory::default()), &store, Arc::new(controller));
    let report = reconciler.run().await?;

    assert_eq!(report.terminations.failed, 1);
    assert!(termination_audits(&store).await.is_empty());
    assert!(mirror_names(&store).await.is_empty());

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(3));
    }
    Ok(())
}

#[tokio::test]
async fn test_non_transient_error_is_not_retried() {
    let store = Arc::new(InMemoryStore::new());
    let mut controller = MockController::new();
    controller
        .expect_list_active_sessions()
        .returning(|| Ok(vec![session("7", "bob")]));
    controller
        .expect_terminate_sessions_for_username()
        .times(1)
        .returning(|_| Err(ControllerError::Validation(vpn_types::CommonError::Validation("bad".into()))));

    let audit: Arc<dyn AuditSink> = store.clone();
    let terminator = SessionTerminator::new(Arc::new(controller), audit, TerminatorConfig::default());
    let outcomes = terminator
        .terminate_all(&BTreeSet::from([principal("bob@x.com")]))
        .await;

    assert!(matches!(
        outcomes.get(&principal("bob@x.com")),
        Some(TerminationOutcome::Failed { attempts: 1, .. })
    ));
}

/// Controller whose terminate call never returns.
struct HangingController {
    attempts: AtomicUsize,
}

#[async_trait]
impl VpnSessionController for HangingController {
    async fn list_active_sessions(&self) -> vpn_sessions::Result<Vec<VpnSession>> {
        Ok(vec![session("1", "bob")])
    }

    async fn terminate_sessions_for_username(&self, _username: &str) -> vpn_sessions::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn terminate_session(&self, _index: &str) -> vpn_sessions::Result<()> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_hanging_calls_time_out() {
    let store = Arc::new(InMemoryStore::new());
    let controller = Arc::new(HangingController {
        attempts: AtomicUsize::new(0),
    });
    let audit: Arc<dyn AuditSink> = store.clone();
    let terminator = SessionTerminator::new(controller.clone(), audit, TerminatorConfig::default());

    let start = Instant::now();
    let summary = terminator
        .terminate_sessions(&BTreeSet::from([principal("bob@x.com")]))
        .await;
    let elapsed = start.elapsed();

    assert_eq!(summary.failed, 1);
    assert_eq!(controller.attempts.load(Ordering::SeqCst), 3);
    // Three 30s timeouts separated by two 3s delays.
    assert!(elapsed >= Duration::from_secs(96) && elapsed < Duration::from_secs(97));
}

#[tokio::test]
async fn test_storage_failure_keeps_mirror_and_termination_audit() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_mirror([user("bob@x.com", "Bob").into()]).await;
    grant(&store, "bob@x.com").await;
    store.set_read_only(true);

    let mut controller = MockController::new();
    let mut listings = vec![vec![], vec![session("4", "bob")]];
    controller
        .expect_list_active_sessions()
        .returning(move || Ok(listings.pop().unwrap_or_default()));
    controller
        .expect_terminate_sessions_for_username()
        .times(1)
        .returning(|_| Ok(()));

    let reconciler = reconciler(Arc::new(StaticDirectory::default()), &store, Arc::new(controller));
    let err = reconciler.run().await.unwrap_err();

    match err {
        SyncError::StorageMutation {
            pending,
            terminations,
            ..
        } => {
            assert_eq!(pending.deleted, 1);
            assert_eq!(terminations.terminated, 1);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(
        mirror_names(&store).await,
        BTreeSet::from(["bob@x.com".to_string()])
    );
    assert_eq!(store.grants_for(&principal("bob@x.com")).await.unwrap().len(), 1);
    assert_eq!(termination_audits(&store).await.len(), 1);
    assert!(store.list_sync_events(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_directory_outage_aborts_without_mutation() {
    let store = Arc::new(InMemoryStore::new());
    store.seed_mirror([user("bob@x.com", "Bob").into()]).await;
    grant(&store, "bob@x.com").await;
    let directory = Arc::new(StaticDirectory::default());
    directory.fail_with("graph unreachable").await;

    let reconciler = reconciler(directory, &store, Arc::new(MockController::new()));
    let err = reconciler.run().await.unwrap_err();

    assert!(matches!(err, SyncError::UpstreamFetch(DirectoryError::Unavailable(_))));
    assert_eq!(mirror_names(&store).await.len(), 1);
    assert!(store.list_sync_events(10).await.unwrap().is_empty());
    assert!(!reconciler.is_running());
}

#[tokio::test]
async fn test_session_list_failure_fails_open() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store.seed_mirror([user("bob@x.com", "Bob").into()]).await;
    grant(&store, "bob@x.com").await;

    let mut controller = MockController::new();
    controller
        .expect_list_active_sessions()
        .times(1)
        .returning(|| Err(ControllerError::Unavailable("gateway down".to_string())));
    controller.expect_terminate_sessions_for_username().never();

    let reconciler = reconciler(Arc::new(StaticDirectory::default()), &store, Arc::new(controller));
    let report = reconciler.run().await?;

    assert_eq!(report.removed, 1);
    assert_eq!(report.terminations.no_sessions, 1);
    assert!(store.grants_for(&principal("bob@x.com")).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_principals_processed_in_groups_of_five() {
    let store = Arc::new(InMemoryStore::new());
    let names: Vec<String> = (0..7).map(|i| format!("user{}@x.com", i)).collect();
    let live: Vec<VpnSession> = (0..7).map(|i| session(&i.to_string(), &format!("user{}", i))).collect();

    let lists = Arc::new(AtomicUsize::new(0));
    let counter = lists.clone();
    let mut controller = MockController::new();
    controller.expect_list_active_sessions().returning(move || {
        // Even calls are the per-group listing, odd ones the verification.
        if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            Ok(live.clone())
        } else {
            Ok(Vec::new())
        }
    });
    controller
        .expect_terminate_sessions_for_username()
        .times(7)
        .returning(|_| Ok(()));

    let audit: Arc<dyn AuditSink> = store.clone();
    let terminator = SessionTerminator::new(Arc::new(controller), audit, TerminatorConfig::default());
    let principals: BTreeSet<PrincipalName> = names.iter().map(|n| principal(n)).collect();
    let summary = terminator.terminate_sessions(&principals).await;

    assert_eq!(summary.requested, 7);
    assert_eq!(summary.terminated, 7);
    assert_eq!(lists.load(Ordering::SeqCst), 4);
    assert_eq!(termination_audits(&store).await.len(), 7);
}

#[tokio::test]
async fn test_sessions_left_after_termination_are_partial() {
    let store = Arc::new(InMemoryStore::new());
    let mut controller = MockController::new();
    controller
        .expect_list_active_sessions()
        .returning(|| Ok(vec![session("1", "bob")]));
    controller
        .expect_terminate_sessions_for_username()
        .returning(|_| Ok(()));

    let audit: Arc<dyn AuditSink> = store.clone();
    let terminator = SessionTerminator::new(Arc::new(controller), audit, TerminatorConfig::default());
    let outcomes = terminator
        .terminate_all(&BTreeSet::from([principal("bob@x.com")]))
        .await;

    assert_eq!(
        outcomes.get(&principal("bob@x.com")),
        Some(&TerminationOutcome::Terminated {
            attempt: 1,
            remaining: Some(1)
        })
    );
}

/// Directory that blocks inside `fetch_users` until released.
#[derive(Default)]
struct GatedDirectory {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl DirectorySource for GatedDirectory {
    async fn fetch_users(&self) -> vpn_identity::Result<Vec<DirectoryUser>> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_overlapping_pass_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let directory = Arc::new(GatedDirectory::default());
    let reconciler = Arc::new(reconciler(directory.clone(), &store, Arc::new(MockController::new())));

    let first = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.run().await }
    });
    directory.entered.notified().await;

    assert!(reconciler.is_running());
    assert!(matches!(reconciler.run().await, Err(SyncError::AlreadyRunning)));

    directory.release.notify_one();
    first.await??;
    assert!(!reconciler.is_running());
    Ok(())
}

#[tokio::test]
async fn test_reconcilers_sharing_a_store_never_overlap() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    store.seed_mirror([user("c@x.com", "C").into()]).await;
    grant(&store, "c@x.com").await;

    let mut daemon_gateway = MockController::new();
    let mut listings = vec![Vec::new(), vec![session("3", "c")]];
    daemon_gateway
        .expect_list_active_sessions()
        .times(2)
        .returning(move || Ok(listings.pop().unwrap_or_default()));
    daemon_gateway
        .expect_terminate_sessions_for_username()
        .withf(|username| username == "c")
        .times(1)
        .returning(|_| Ok(()));

    // The second reconciler stands in for a separate `sync` invocation and
    // must never reach the gateway while the first pass holds the lock.
    let mut manual_gateway = MockController::new();
    manual_gateway.expect_list_active_sessions().never();
    manual_gateway.expect_terminate_sessions_for_username().never();

    let directory = Arc::new(GatedDirectory::default());
    let daemon = Arc::new(reconciler(directory.clone(), &store, Arc::new(daemon_gateway)));
    let manual = reconciler(
        Arc::new(StaticDirectory::new(Vec::new())),
        &store,
        Arc::new(manual_gateway),
    );

    let first = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });
    directory.entered.notified().await;

    assert!(!manual.is_running());
    assert!(matches!(manual.run().await, Err(SyncError::AlreadyRunning)));

    directory.release.notify_one();
    let report = first.await??;
    assert_eq!(report.removed, 1);
    assert_eq!(report.terminations.terminated, 1);

    // Once the lock is free the other reconciler runs, and finds nothing to do.
    let later = manual.run().await?;
    assert!(!later.has_changes);
    assert_eq!(store.list_sync_events(10).await?.len(), 1);
    assert_eq!(termination_audits(&store).await.len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_now_and_on_interval() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let directory = Arc::new(StaticDirectory::new(vec![user("a@x.com", "A")]));
    let reconciler = Arc::new(reconciler(directory.clone(), &store, Arc::new(MockController::new())));
    let scheduler = SyncScheduler::new(reconciler, Duration::from_secs(60));

    scheduler.start().await?;
    assert!(matches!(scheduler.start().await, Err(SyncError::SchedulerStarted)));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.list_sync_events(10).await?.len(), 1);

    directory
        .set_users(vec![user("a@x.com", "A"), user("b@x.com", "B")])
        .await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(store.list_sync_events(10).await?.len(), 2);

    scheduler.stop().await;
    assert!(!scheduler.is_started().await);

    let report = scheduler.trigger().await?;
    assert!(!report.has_changes);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_directory_principals_last_wins() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryStore::new());
    let directory = Arc::new(StaticDirectory::new(vec![
        user("a@x.com", "Old"),
        user("a@x.com", "New"),
    ]));
    let reconciler = reconciler(directory, &store, Arc::new(MockController::new()));

    let report = reconciler.run().await?;

    assert_eq!(report.added, 1);
    assert_eq!(report.total_users, 1);
    let mirror: Vec<MirrorRecord> = store.read_mirror().await?;
    assert_eq!(mirror.len(), 1);
    assert_eq!(mirror[0].display_name, "New");
    Ok(())
}
