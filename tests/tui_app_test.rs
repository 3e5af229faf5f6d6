//! Dashboard state driven without a terminal: key handling, task lanes and
//! the supervised dev server.

mod common;

use common::{harness, FakeGateway, Harness};
use comradarr_dev::config::{SessionMode, TestDbConfig};
use comradarr_dev::service::SupervisorState;
use comradarr_dev::tui::app::{Action, App, TaskGroup, MENU};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::time::{Duration, Instant};

fn app_for(h: &Harness) -> App {
    App::new(h.orchestrator.clone(), TestDbConfig::from_lookup(|_| None))
}

fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

/// Tick until the lane is free again.
async fn settle(app: &mut App, group: TaskGroup) {
    let deadline = Instant::now() + Duration::from_secs(15);
    while app.busy(group).is_some() {
        assert!(Instant::now() < deadline, "{} lane never finished", group.name());
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.on_tick().await.expect("tick");
    }
    app.on_tick().await.expect("tick");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keys_move_the_selection_and_toggle_help() {
    let h = harness(FakeGateway::running());
    let mut app = app_for(&h);

    assert_eq!(app.selected_action(), MENU[0]);
    assert!(app.handle_key(key(KeyCode::Down)).await.expect("key"));
    assert!(app.handle_key(key(KeyCode::Char('j'))).await.expect("key"));
    assert_eq!(app.selected, 2);
    assert!(app.handle_key(key(KeyCode::Up)).await.expect("key"));
    assert_eq!(app.selected, 1);

    assert!(app.handle_key(key(KeyCode::Char('8'))).await.expect("key"));
    assert_eq!(app.selected_action(), Action::DevStartEphemeral);

    assert!(app.handle_key(key(KeyCode::Char('?'))).await.expect("key"));
    assert!(app.show_help);
    // 'q' is swallowed while help is open.
    assert!(app.handle_key(key(KeyCode::Char('q'))).await.expect("key"));
    assert!(app.handle_key(key(KeyCode::Esc)).await.expect("key"));
    assert!(!app.show_help);

    assert!(!app.handle_key(key(KeyCode::Char('q'))).await.expect("key"));
    let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
    assert!(!app.handle_key(ctrl_c).await.expect("key"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_start_runs_in_the_command_lane() {
    let h = harness(FakeGateway::stopped());
    let mut app = app_for(&h);

    assert!(app.run_action(Action::EngineStart).await);
    assert_eq!(app.busy(TaskGroup::Command), Some("Start PostgreSQL"));
    assert_eq!(app.busy(TaskGroup::DevServer), None);

    settle(&mut app, TaskGroup::Command).await;
    assert!(h.gateway.is_running());
    assert!(app.logs.contains("PostgreSQL is now running"));
    assert!(app.logs.contains("▶ Start PostgreSQL"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_busy_lane_rejects_new_work() {
    let h = harness(FakeGateway::running());
    h.runner.slow("unit-tests", Duration::from_millis(500));
    let mut app = app_for(&h);

    assert!(app.run_action(Action::TestsUnit).await);
    assert!(!app.run_action(Action::EngineStatus).await);
    let status = app.status_message.clone().expect("status message");
    assert!(status.text.contains("'Unit tests' is still running"));

    settle(&mut app, TaskGroup::Command).await;
    assert!(app.logs.contains("Tests passed"));
    assert!(app.run_action(Action::EngineStatus).await);
    settle(&mut app, TaskGroup::Command).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_task_is_reported_in_the_log() {
    let h = harness(FakeGateway::running());
    h.runner.fail("unit-tests", 1, "");
    let mut app = app_for(&h);

    assert!(app.run_action(Action::TestsUnit).await);
    settle(&mut app, TaskGroup::Command).await;
    assert!(app.logs.contains("Unit tests failed: Tests failed (exit code 1)"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saved_actions_need_a_selection() {
    let h = harness(FakeGateway::running());
    let mut app = app_for(&h);

    assert!(app.saved.is_empty());
    assert!(!app.run_action(Action::DevReconnect).await);
    assert!(!app.run_action(Action::SavedDelete).await);
    assert!(!app.run_action(Action::DevStop).await);
    assert_eq!(app.busy(TaskGroup::Command), None);
    assert_eq!(app.busy(TaskGroup::DevServer), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dev_server_lifecycle_cleans_up_its_database() {
    let h = harness(FakeGateway::running());
    let mut app = app_for(&h);

    assert!(app.run_action(Action::DevStartEphemeral).await);
    settle(&mut app, TaskGroup::DevServer).await;

    assert_eq!(app.dev_state(), SupervisorState::Running);
    let session = app.dev_session().expect("dashboard session");
    assert_eq!(session.mode, SessionMode::Ephemeral);
    assert!(h.gateway.has_database(&session.db_name));
    let record = h.store.load_session().expect("session record");
    assert_eq!(Some(record.pid), app.dev_pid());

    // A second start is refused while the server runs.
    assert!(!app.run_action(Action::DevStartPersistent).await);

    assert!(app.run_action(Action::DevStop).await);
    settle(&mut app, TaskGroup::DevServer).await;

    assert_eq!(app.dev_state(), SupervisorState::Idle);
    assert!(app.dev_session().is_none());
    assert!(!h.gateway.has_database(&session.db_name));
    assert!(h.store.load_session().is_none());
    assert!(app.logs.contains("Dev server stopped"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn persistent_session_shows_up_as_saved() {
    let h = harness(FakeGateway::running());
    let mut app = app_for(&h);

    assert!(app.run_action(Action::DevStartPersistent).await);
    settle(&mut app, TaskGroup::DevServer).await;
    let name = app.dev_session().expect("session").db_name;

    assert_eq!(app.saved.len(), 1);
    assert_eq!(app.selected_saved_name(), Some(name.as_str()));
    assert!(app.saved[0].in_use_by.is_some());

    // In use: the delete task fails and keeps the credentials.
    assert!(app.run_action(Action::SavedDelete).await);
    settle(&mut app, TaskGroup::Command).await;
    assert!(h.store.peek_credential(&name).is_some());

    assert!(app.run_action(Action::DevStop).await);
    settle(&mut app, TaskGroup::DevServer).await;
    assert!(h.gateway.has_database(&name));
    assert!(app.saved[0].in_use_by.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_the_dev_server() {
    let h = harness(FakeGateway::running());
    let mut app = app_for(&h);

    assert!(app.run_action(Action::DevStartEphemeral).await);
    settle(&mut app, TaskGroup::DevServer).await;
    let name = app.dev_session().expect("session").db_name;
    let pid = app.dev_pid().expect("pid");

    app.shutdown().await;

    assert_eq!(app.dev_state(), SupervisorState::Idle);
    assert!(!comradarr_dev::probe::is_process_alive(pid));
    assert!(!h.gateway.has_database(&name));
    assert!(h.store.load_session().is_none());
}
