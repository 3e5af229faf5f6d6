//! End-to-end session flows against an in-memory engine: start, reconnect,
//! failure rollback, stop policies and orphan reconciliation.

mod common;

use common::{harness, spawn_stand_in_server, FakeGateway};
use comradarr_dev::config::SessionMode;
use comradarr_dev::orchestrator::{SessionStatus, StartRequest, StopOptions, StopOutcome};
use comradarr_dev::output::{CollectingOutput, OutputLevel};
use comradarr_dev::probe::is_process_alive;
use comradarr_dev::prompt::AutoConfirm;
use comradarr_dev::state::{CredentialEntry, SessionRecord};
use comradarr_dev::Error;
use regex::Regex;
use std::time::{Duration, Instant};

fn env_value<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
    env.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn persist(name: &str) -> StartRequest {
    StartRequest {
        persist: true,
        db_name: Some(name.to_string()),
        ..Default::default()
    }
}

fn wait_until_dead(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while is_process_alive(pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(25));
    }
}

// =============================================================================
// Start
// =============================================================================

#[tokio::test]
async fn ephemeral_session_gets_a_generated_database() {
    let h = harness(FakeGateway::running());
    let out = CollectingOutput::new();

    let prepared = h
        .orchestrator
        .prepare(StartRequest::default(), &AutoConfirm::yes(), &out)
        .await
        .expect("prepare");

    let pattern = Regex::new(r"^comradarr_dev_[0-9a-f]{8}$").expect("regex");
    assert!(pattern.is_match(prepared.db_name()), "{}", prepared.db_name());
    assert_eq!(prepared.mode(), SessionMode::Ephemeral);
    assert!(h.gateway.has_database(prepared.db_name()));

    // Ephemeral sessions never write credentials.
    assert!(h.store.list_all_credentials().is_empty());

    let record = h.store.load_session().expect("session record");
    assert_eq!(record.pid, std::process::id());
    assert_eq!(record.db_name, prepared.db_name());
    assert_eq!(record.mode, SessionMode::Ephemeral);
    assert_eq!(record.port, h.orchestrator.project().config.default_port);

    // Migrations then seed, both pointed at the new database.
    let programs: Vec<String> = h.runner.calls().into_iter().map(|c| c.program).collect();
    assert_eq!(programs, vec!["migrate", "seed"]);
    let migrate = &h.runner.calls_to("migrate")[0];
    let url = env_value(&migrate.env, "DATABASE_URL").expect("DATABASE_URL");
    assert!(url.starts_with(&format!("postgres://{}:", prepared.db_name())));
    assert!(url.ends_with(&format!(":5432/{}", prepared.db_name())));
    assert_eq!(migrate.cwd.as_deref(), Some(h.dir.path()));

    let port = record.port.to_string();
    assert_eq!(
        &prepared.command[prepared.command.len() - 2..],
        &["--port".to_string(), port]
    );
    assert_eq!(
        env_value(&prepared.env, "SECRET_KEY"),
        Some(prepared.config.secret_key.as_str())
    );
    assert!(env_value(&prepared.env, "AUTH_MODE").is_none());

    h.orchestrator.cleanup_after_exit(&prepared.record, &out).await;
    assert!(!h.gateway.has_database(prepared.db_name()));
    assert!(h.store.load_session().is_none());
}

#[tokio::test]
async fn skip_auth_and_admin_password_reach_the_server() {
    let h = harness(FakeGateway::running());
    let out = CollectingOutput::new();
    let request = StartRequest {
        skip_auth: true,
        admin_password: Some("hunter22".to_string()),
        ..persist("mydb")
    };

    let prepared = h
        .orchestrator
        .prepare(request, &AutoConfirm::yes(), &out)
        .await
        .expect("prepare");

    assert_eq!(env_value(&prepared.env, "AUTH_MODE"), Some("local_bypass"));
    let seed = &h.runner.calls_to("seed")[0];
    assert_eq!(env_value(&seed.env, "ADMIN_PASSWORD"), Some("hunter22"));
    let saved = h.store.peek_credential("mydb").expect("credentials");
    assert_eq!(saved.admin_password, "hunter22");
    assert!(out.contains("BYPASSED"));
}

#[tokio::test]
async fn persistent_session_can_be_resumed() {
    let h = harness(FakeGateway::running());
    let out = CollectingOutput::new();

    let first = h
        .orchestrator
        .prepare(persist("mydb"), &AutoConfirm::yes(), &out)
        .await
        .expect("first prepare");
    assert_eq!(first.mode(), SessionMode::Persistent);
    let saved = h.store.peek_credential("mydb").expect("credentials saved");
    assert_eq!(saved.password, first.config.db_password);
    assert_eq!(saved.secret_key, first.config.secret_key);
    assert!(saved.last_used.is_none());

    h.orchestrator.cleanup_after_exit(&first.record, &out).await;
    assert!(h.gateway.has_database("mydb"));
    assert!(out.contains("Database 'mydb' preserved"));

    let second = h
        .orchestrator
        .prepare(
            StartRequest {
                reconnect: Some("mydb".to_string()),
                ..Default::default()
            },
            &AutoConfirm::yes(),
            &out,
        )
        .await
        .expect("reconnect");

    assert_eq!(second.mode(), SessionMode::Reconnect);
    assert_eq!(second.config.secret_key, first.config.secret_key);
    assert_eq!(second.config.db_password, first.config.db_password);
    assert_eq!(second.config.admin_password, first.config.admin_password);

    // Provisioning and migrations happen once.
    assert_eq!(h.gateway.provision_calls(), 1);
    assert_eq!(h.runner.calls_to("migrate").len(), 1);

    let refreshed = h.store.peek_credential("mydb").expect("credentials kept");
    assert_eq!(refreshed.saved_at, saved.saved_at);
    assert!(refreshed.last_used.is_some());
}

#[tokio::test]
async fn naming_a_saved_database_offers_to_reconnect() {
    let h = harness(FakeGateway::running());
    let out = CollectingOutput::new();
    let first = h
        .orchestrator
        .prepare(persist("mydb"), &AutoConfirm::yes(), &out)
        .await
        .expect("prepare");
    h.orchestrator.cleanup_after_exit(&first.record, &out).await;

    let declined = h
        .orchestrator
        .prepare(persist("mydb"), &AutoConfirm::no(), &out)
        .await;
    assert!(matches!(declined, Err(Error::Aborted)));
    assert!(h.store.load_session().is_none());

    let accepted = h
        .orchestrator
        .prepare(
            StartRequest {
                db_name: Some("mydb".to_string()),
                ..Default::default()
            },
            &AutoConfirm::yes(),
            &out,
        )
        .await
        .expect("reconnect");
    assert_eq!(accepted.mode(), SessionMode::Reconnect);
    assert_eq!(accepted.config.secret_key, first.config.secret_key);
    assert_eq!(h.gateway.provision_calls(), 1);
}

#[tokio::test]
async fn reconnect_requires_valid_saved_name() {
    let h = harness(FakeGateway::running());
    let out = CollectingOutput::new();

    let missing = h
        .orchestrator
        .prepare(
            StartRequest {
                reconnect: Some("nosuchdb".to_string()),
                ..Default::default()
            },
            &AutoConfirm::yes(),
            &out,
        )
        .await;
    assert!(matches!(missing, Err(Error::MissingCredentials(name)) if name == "nosuchdb"));

    let invalid = h
        .orchestrator
        .prepare(persist("bad-name; DROP"), &AutoConfirm::yes(), &out)
        .await;
    assert!(matches!(invalid, Err(Error::InvalidDatabaseName(_))));

    let both = h
        .orchestrator
        .prepare(
            StartRequest {
                reconnect: Some("a".to_string()),
                db_name: Some("b".to_string()),
                ..Default::default()
            },
            &AutoConfirm::yes(),
            &out,
        )
        .await;
    assert!(matches!(both, Err(Error::Config(_))));

    assert_eq!(h.gateway.provision_calls(), 0);
    assert!(h.store.load_session().is_none());
}

#[tokio::test]
async fn failed_migrations_roll_back_a_new_database() {
    let h = harness(FakeGateway::running());
    h.runner.fail("migrate", 1, "relation \"users\" already exists");
    let out = CollectingOutput::new();

    let result = h
        .orchestrator
        .prepare(StartRequest::default(), &AutoConfirm::yes(), &out)
        .await;

    assert!(matches!(result, Err(Error::MigrationFailed(_))));
    assert!(h.gateway.databases().is_empty());
    assert!(h.store.load_session().is_none());
    assert!(h.store.list_all_credentials().is_empty());
    assert!(h.runner.calls_to("seed").is_empty());
    assert!(out.contains("relation \"users\" already exists"));
    assert!(out
        .messages(OutputLevel::Error)
        .contains(&"Failed to run migrations".to_string()));
}

#[tokio::test]
async fn failed_migrations_keep_a_persistent_database() {
    let h = harness(FakeGateway::running());
    h.runner.fail("migrate", 2, "syntax error");
    let out = CollectingOutput::new();

    let result = h
        .orchestrator
        .prepare(persist("keepme"), &AutoConfirm::yes(), &out)
        .await;

    assert!(matches!(result, Err(Error::MigrationFailed(_))));
    assert!(h.gateway.has_database("keepme"));
    assert!(h.store.peek_credential("keepme").is_none());
    assert!(h.store.load_session().is_none());
}

#[tokio::test]
async fn existing_database_is_not_rolled_back() {
    let h = harness(FakeGateway::running().with_databases(&["shared"]));
    h.runner.fail("migrate", 1, "boom");
    let out = CollectingOutput::new();

    let result = h
        .orchestrator
        .prepare(
            StartRequest {
                db_name: Some("shared".to_string()),
                ..Default::default()
            },
            &AutoConfirm::yes(),
            &out,
        )
        .await;

    assert!(result.is_err());
    assert!(h.gateway.has_database("shared"));
}

#[tokio::test]
async fn seed_failure_is_only_a_warning() {
    let h = harness(FakeGateway::running());
    h.runner.fail("seed", 1, "admin exists");
    let out = CollectingOutput::new();

    h.orchestrator
        .prepare(StartRequest::default(), &AutoConfirm::yes(), &out)
        .await
        .expect("prepare");
    assert!(out
        .messages(OutputLevel::Warning)
        .contains(&"Admin user may already exist".to_string()));
}

#[tokio::test]
async fn occupied_port_stops_before_provisioning() {
    let h = harness(FakeGateway::running());
    let port = h.orchestrator.project().config.default_port;
    let _listener = std::net::TcpListener::bind(("127.0.0.1", port)).expect("bind");
    let out = CollectingOutput::new();

    let result = h
        .orchestrator
        .prepare(StartRequest::default(), &AutoConfirm::yes(), &out)
        .await;

    match result {
        Err(Error::PortInUse { port: reported, .. }) => assert_eq!(reported, port),
        other => panic!("expected PortInUse, got {:?}", other.map(|p| p.record)),
    }
    assert_eq!(h.gateway.provision_calls(), 0);
    assert!(h.store.load_session().is_none());
}

#[tokio::test]
async fn stopped_engine_is_started_first() {
    let h = harness(FakeGateway::stopped());
    let out = CollectingOutput::new();

    h.orchestrator
        .prepare(StartRequest::default(), &AutoConfirm::yes(), &out)
        .await
        .expect("prepare");
    assert!(h.gateway.is_running());
    assert!(out.contains("Starting PostgreSQL"));
}

#[tokio::test]
async fn engine_that_will_not_start_is_unavailable() {
    let h = harness(FakeGateway::stopped().fail_start());
    let out = CollectingOutput::new();

    let result = h
        .orchestrator
        .prepare(StartRequest::default(), &AutoConfirm::yes(), &out)
        .await;
    assert!(matches!(result, Err(Error::EngineUnavailable(_))));
    assert_eq!(h.gateway.provision_calls(), 0);
}

// =============================================================================
// Status and stop
// =============================================================================

#[tokio::test]
async fn nothing_running_reports_not_running() {
    let h = harness(FakeGateway::running());
    let out = CollectingOutput::new();

    assert_eq!(h.orchestrator.status().await, SessionStatus::NotRunning);
    let report = h
        .orchestrator
        .stop(StopOptions::default(), &AutoConfirm::no(), &out)
        .await
        .expect("stop");
    assert_eq!(report.outcome, StopOutcome::NotRunning);
    assert!(out.contains("Dev server is not running"));
}

#[tokio::test]
async fn stale_record_is_cleaned_up_without_signalling() {
    let h = harness(FakeGateway::running().with_databases(&["comradarr_dev_deadbeef"]));
    let record = SessionRecord {
        pid: u32::MAX,
        db_name: "comradarr_dev_deadbeef".to_string(),
        mode: SessionMode::Ephemeral,
        ..SessionRecord::default()
    };
    h.store.save_session(&record).expect("save");
    let out = CollectingOutput::new();

    assert_eq!(h.orchestrator.status().await, SessionStatus::Stale(record.clone()));

    let report = h
        .orchestrator
        .stop(StopOptions::default(), &AutoConfirm::no(), &out)
        .await
        .expect("stop");
    assert_eq!(report.outcome, StopOutcome::Stale(record));
    assert!(report.database_dropped);
    assert!(!h.gateway.has_database("comradarr_dev_deadbeef"));
    assert!(h.store.load_session().is_none());
}

#[tokio::test]
async fn stop_keeps_persistent_database_unless_forced() {
    let h = harness(FakeGateway::running().with_databases(&["mydb"]));
    h.store
        .save_credential("mydb", CredentialEntry::new("pw".into(), "key".into(), "admin".into()))
        .expect("save credentials");
    let pid = spawn_stand_in_server();
    let record = SessionRecord {
        pid,
        db_name: "mydb".to_string(),
        mode: SessionMode::Persistent,
        ..SessionRecord::default()
    };
    h.store.save_session(&record).expect("save");
    let out = CollectingOutput::new();

    assert!(matches!(h.orchestrator.status().await, SessionStatus::Running(_)));

    let report = h
        .orchestrator
        .stop(StopOptions::default(), &AutoConfirm::yes(), &out)
        .await
        .expect("stop");

    assert_eq!(report.outcome, StopOutcome::Stopped(record));
    assert!(!report.database_dropped);
    wait_until_dead(pid);
    assert!(!is_process_alive(pid));
    assert!(h.gateway.has_database("mydb"));
    assert!(h.store.peek_credential("mydb").is_some());
    assert!(h.store.load_session().is_none());
}

#[tokio::test]
async fn forced_stop_asks_before_removing_a_live_persistent_database() {
    for (answer, removed) in [(false, false), (true, true)] {
        let h = harness(FakeGateway::running().with_databases(&["mydb"]));
        h.store
            .save_credential("mydb", CredentialEntry::new("pw".into(), "key".into(), "admin".into()))
            .expect("save credentials");
        let record = SessionRecord {
            pid: spawn_stand_in_server(),
            db_name: "mydb".to_string(),
            mode: SessionMode::Reconnect,
            ..SessionRecord::default()
        };
        h.store.save_session(&record).expect("save");
        let out = CollectingOutput::new();

        let report = h
            .orchestrator
            .stop(
                StopOptions {
                    force_cleanup: true,
                    timeout: Some(Duration::from_secs(5)),
                },
                &AutoConfirm(answer),
                &out,
            )
            .await
            .expect("stop");

        assert_eq!(report.database_dropped, removed);
        assert_eq!(report.credentials_removed, removed);
        assert_eq!(h.gateway.has_database("mydb"), !removed);
        assert_eq!(h.store.peek_credential("mydb").is_some(), !removed);
    }
}

#[tokio::test]
async fn forced_stop_of_a_stale_session_removes_without_asking() {
    let h = harness(FakeGateway::running().with_databases(&["mydb"]));
    h.store
        .save_credential("mydb", CredentialEntry::new("pw".into(), "key".into(), "admin".into()))
        .expect("save credentials");
    let record = SessionRecord {
        pid: u32::MAX,
        db_name: "mydb".to_string(),
        mode: SessionMode::Persistent,
        ..SessionRecord::default()
    };
    h.store.save_session(&record).expect("save");
    let out = CollectingOutput::new();

    let report = h
        .orchestrator
        .stop(
            StopOptions {
                force_cleanup: true,
                timeout: None,
            },
            &AutoConfirm::no(),
            &out,
        )
        .await
        .expect("stop");

    assert!(report.database_dropped);
    assert!(report.credentials_removed);
    assert!(!h.gateway.has_database("mydb"));
}

// =============================================================================
// Orphans and saved databases
// =============================================================================

#[tokio::test]
async fn orphan_sweep_skips_saved_and_live_databases() {
    let h = harness(FakeGateway::running().with_databases(&[
        "comradarr_dev_aaaaaaaa",
        "comradarr_dev_bbbbbbbb",
        "comradarr_dev_cccccccc",
        "unrelated_db",
    ]));
    h.store
        .save_credential(
            "comradarr_dev_bbbbbbbb",
            CredentialEntry::new("pw".into(), "key".into(), "admin".into()),
        )
        .expect("save credentials");
    h.store
        .save_session(&SessionRecord {
            pid: std::process::id(),
            db_name: "comradarr_dev_cccccccc".to_string(),
            ..SessionRecord::default()
        })
        .expect("save");
    let out = CollectingOutput::new();

    assert_eq!(
        h.orchestrator.find_orphan_databases().await.expect("find"),
        vec!["comradarr_dev_aaaaaaaa"]
    );
    let swept = h
        .orchestrator
        .sweep_orphan_databases(&out)
        .await
        .expect("sweep");
    assert_eq!(swept, vec!["comradarr_dev_aaaaaaaa"]);
    assert_eq!(
        h.gateway.databases(),
        vec![
            "comradarr_dev_bbbbbbbb",
            "comradarr_dev_cccccccc",
            "unrelated_db"
        ]
    );
}

#[tokio::test]
async fn forced_stop_with_nothing_running_sweeps_orphans() {
    let h = harness(FakeGateway::running().with_databases(&["comradarr_dev_12345678"]));
    let out = CollectingOutput::new();

    let report = h
        .orchestrator
        .stop(
            StopOptions {
                force_cleanup: true,
                timeout: None,
            },
            &AutoConfirm::no(),
            &out,
        )
        .await
        .expect("stop");

    assert_eq!(report.outcome, StopOutcome::NotRunning);
    assert_eq!(report.swept, vec!["comradarr_dev_12345678"]);
    assert!(h.gateway.databases().is_empty());
}

#[tokio::test]
async fn saved_database_in_use_cannot_be_forgotten() {
    let h = harness(FakeGateway::running().with_databases(&["mydb", "idle"]));
    for name in ["mydb", "idle"] {
        h.store
            .save_credential(name, CredentialEntry::new("pw".into(), "key".into(), "admin".into()))
            .expect("save credentials");
    }
    h.store
        .save_session(&SessionRecord {
            pid: std::process::id(),
            db_name: "mydb".to_string(),
            mode: SessionMode::Reconnect,
            ..SessionRecord::default()
        })
        .expect("save");
    let out = CollectingOutput::new();

    let saved = h.orchestrator.saved_databases();
    let names: Vec<&str> = saved.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["idle", "mydb"]);
    assert_eq!(saved[0].in_use_by, None);
    assert_eq!(saved[1].in_use_by, Some(std::process::id()));

    let refused = h.orchestrator.forget_saved("mydb", true, &out).await;
    assert!(matches!(refused, Err(Error::DatabaseInUse { .. })));
    assert!(h.store.peek_credential("mydb").is_some());
    assert!(h.gateway.has_database("mydb"));

    h.orchestrator
        .forget_saved("idle", false, &out)
        .await
        .expect("forget");
    assert!(h.store.peek_credential("idle").is_none());
    assert!(h.gateway.has_database("idle"));
    assert!(out.contains("Removed saved credentials for 'idle'"));
}

#[tokio::test]
async fn forgetting_with_drop_removes_the_database() {
    let h = harness(FakeGateway::running().with_databases(&["olddb"]));
    h.store
        .save_credential("olddb", CredentialEntry::new("pw".into(), "key".into(), "admin".into()))
        .expect("save credentials");
    let out = CollectingOutput::new();

    h.orchestrator
        .forget_saved("olddb", true, &out)
        .await
        .expect("forget");
    assert!(!h.gateway.has_database("olddb"));
    assert!(h.orchestrator.saved_databases().is_empty());

    let again = h.orchestrator.forget_saved("olddb", false, &out).await;
    assert!(matches!(again, Err(Error::MissingCredentials(_))));
}
