//! Shared fakes for integration tests: an in-memory database engine and a
//! scripted command runner.

#![allow(dead_code)]

use async_trait::async_trait;
use comradarr_dev::config::{Project, ProjectConfig, TestDbConfig};
use comradarr_dev::orchestrator::SessionOrchestrator;
use comradarr_dev::platform::{CommandOutput, CommandRunner, CommandSpec, DatabaseGateway, Provisioned};
use comradarr_dev::state::StateStore;
use comradarr_dev::Result;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// In-memory engine
// =============================================================================

#[derive(Debug, Default)]
pub struct FakeDb {
    pub running: bool,
    pub start_fails: bool,
    pub databases: BTreeSet<String>,
    pub roles: BTreeMap<String, String>,
    pub provision_calls: usize,
    pub start_calls: usize,
    pub install_calls: usize,
}

#[derive(Debug, Default)]
pub struct FakeGateway {
    db: Mutex<FakeDb>,
}

impl FakeGateway {
    pub fn running() -> Self {
        let gateway = Self::default();
        gateway.db.lock().running = true;
        gateway
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn with_databases(self, names: &[&str]) -> Self {
        self.db
            .lock()
            .databases
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn fail_start(self) -> Self {
        self.db.lock().start_fails = true;
        self
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.db.lock().databases.contains(name)
    }

    pub fn databases(&self) -> Vec<String> {
        self.db.lock().databases.iter().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.db.lock().running
    }

    pub fn provision_calls(&self) -> usize {
        self.db.lock().provision_calls
    }

    pub fn install_calls(&self) -> usize {
        self.db.lock().install_calls
    }
}

#[async_trait]
impl DatabaseGateway for FakeGateway {
    async fn is_engine_running(&self) -> bool {
        self.db.lock().running
    }

    async fn start_engine(&self) -> Result<()> {
        let mut db = self.db.lock();
        db.start_calls += 1;
        if db.start_fails {
            return Err(comradarr_dev::Error::ExternalTool {
                tool: "service".to_string(),
                code: Some(1),
                stderr: "unit postgresql.service not found".to_string(),
            });
        }
        db.running = true;
        Ok(())
    }

    async fn stop_engine(&self) -> Result<()> {
        self.db.lock().running = false;
        Ok(())
    }

    async fn install_engine(&self) -> Result<()> {
        let mut db = self.db.lock();
        db.install_calls += 1;
        db.start_fails = false;
        Ok(())
    }

    async fn wait_until_ready(&self, _timeout: Duration) -> bool {
        self.db.lock().running
    }

    async fn ensure_user_and_database(
        &self,
        database: &str,
        role: &str,
        password: &str,
    ) -> Result<Provisioned> {
        let mut db = self.db.lock();
        db.provision_calls += 1;
        db.roles.insert(role.to_string(), password.to_string());
        let database_created = db.databases.insert(database.to_string());
        Ok(Provisioned { database_created })
    }

    async fn drop_database_and_user(&self, database: &str, role: &str) -> Result<()> {
        let mut db = self.db.lock();
        db.databases.remove(database);
        db.roles.remove(role);
        Ok(())
    }

    async fn terminate_connections(&self, _database: &str) -> Result<()> {
        Ok(())
    }

    async fn database_exists(&self, database: &str) -> Result<bool> {
        Ok(self.db.lock().databases.contains(database))
    }

    async fn list_databases(&self, prefix: &str) -> Result<Vec<String>> {
        let wanted = format!("{}_", prefix);
        Ok(self
            .db
            .lock()
            .databases
            .iter()
            .filter(|name| name.starts_with(&wanted))
            .cloned()
            .collect())
    }

    async fn check_connection(&self, test_db: &TestDbConfig) -> bool {
        let db = self.db.lock();
        db.running && db.databases.contains(&test_db.name)
    }
}

// =============================================================================
// Scripted runner
// =============================================================================

#[derive(Debug, Clone)]
struct Scripted {
    code: i32,
    stderr: String,
    delay: Option<Duration>,
}

/// Succeeds for every program unless told otherwise; records every call.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    scripts: Mutex<HashMap<String, Scripted>>,
    missing: Mutex<BTreeSet<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `program` exit with `code`, writing `stderr`.
    pub fn fail(&self, program: &str, code: i32, stderr: &str) {
        self.scripts.lock().insert(
            program.to_string(),
            Scripted {
                code,
                stderr: stderr.to_string(),
                delay: None,
            },
        );
    }

    /// Make `program` succeed only after `delay`.
    pub fn slow(&self, program: &str, delay: Duration) {
        self.scripts.lock().insert(
            program.to_string(),
            Scripted {
                code: 0,
                stderr: String::new(),
                delay: Some(delay),
            },
        );
    }

    /// Pretend `program` is not on `PATH`.
    pub fn hide(&self, program: &str) {
        self.missing.lock().insert(program.to_string());
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| spec.program == program)
            .collect()
    }

    async fn execute(&self, spec: &CommandSpec) -> (i32, String) {
        self.calls.lock().push(spec.clone());
        let script = self.scripts.lock().get(&spec.program).cloned();
        match script {
            Some(script) => {
                if let Some(delay) = script.delay {
                    tokio::time::sleep(delay).await;
                }
                (script.code, script.stderr)
            }
            None => (0, String::new()),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let (code, stderr) = self.execute(spec).await;
        Ok(CommandOutput {
            status: Some(code),
            stdout: String::new(),
            stderr,
        })
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        on_line: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<Option<i32>> {
        let (code, stderr) = self.execute(spec).await;
        on_line(&format!("{} finished", spec.program));
        for line in stderr.lines() {
            on_line(line);
        }
        Ok(Some(code))
    }

    fn exists(&self, program: &str) -> bool {
        !self.missing.lock().contains(program)
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub orchestrator: SessionOrchestrator,
    pub gateway: Arc<FakeGateway>,
    pub runner: Arc<ScriptedRunner>,
    pub store: StateStore,
    pub dir: TempDir,
}

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .expect("Failed to find a free port")
}

/// Project config whose commands are bare program names the runner can
/// script, with state kept in `dir`.
pub fn test_project(dir: &TempDir) -> Project {
    let config = ProjectConfig {
        // `--port N` lands in the positional parameters, not on `sleep`.
        dev_command: ["sh", "-c", "sleep 30", "cr-dev"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        migrate_command: vec!["migrate".to_string()],
        seed_command: vec!["seed".to_string()],
        unit_test_command: vec!["unit-tests".to_string()],
        integration_test_command: vec!["integration-tests".to_string()],
        default_port: free_port(),
        stop_timeout_secs: 5,
        state_file: Some(dir.path().join("cr-dev-state.json")),
        ..ProjectConfig::default()
    };
    Project {
        root: dir.path().to_path_buf(),
        config,
        config_path: None,
    }
}

pub fn harness(gateway: FakeGateway) -> Harness {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    harness_with_project(gateway, test_project(&dir), dir)
}

pub fn harness_with_project(gateway: FakeGateway, project: Project, dir: TempDir) -> Harness {
    let gateway = Arc::new(gateway);
    let runner = Arc::new(ScriptedRunner::new());
    let store = StateStore::for_project(&project);
    let orchestrator = SessionOrchestrator::new(
        gateway.clone(),
        runner.clone(),
        store.clone(),
        project,
    );
    Harness {
        orchestrator,
        gateway,
        runner,
        store,
        dir,
    }
}

/// A long-running child standing in for the dev server. A thread reaps it
/// so a kill is observed promptly.
pub fn spawn_stand_in_server() -> u32 {
    let child: Child = Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("Failed to spawn sleep");
    let pid = child.id();
    std::thread::spawn(move || {
        let mut child = child;
        let _ = child.wait();
    });
    pid
}
