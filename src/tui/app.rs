use super::sink::{ChannelOutput, LogLevel, LogLine};
use crate::config::TestDbConfig;
use crate::orchestrator::{SavedDatabase, SessionOrchestrator, StartRequest, SuiteOptions};
use crate::prompt::AutoConfirm;
use crate::service::{CleanupFn, Supervisor, SupervisorState};
use crate::state::SessionRecord;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const LOG_BUFFER_SIZE: usize = 1000;

/// Window for typing a two-digit menu number.
const NUMBER_INPUT_WINDOW: Duration = Duration::from_millis(800);

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub text: String,
    pub level: StatusLevel,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Mutually exclusive lanes for background work. At most one task runs in
/// each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskGroup {
    DevServer,
    Command,
}

impl TaskGroup {
    pub fn name(&self) -> &'static str {
        match self {
            TaskGroup::DevServer => "dev",
            TaskGroup::Command => "cmd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuGroup {
    Database,
    TestDb,
    DevServer,
    Tests,
    SavedDbs,
}

impl MenuGroup {
    pub fn title(&self) -> &'static str {
        match self {
            MenuGroup::Database => "Database",
            MenuGroup::TestDb => "Test DB",
            MenuGroup::DevServer => "Dev Server",
            MenuGroup::Tests => "Tests",
            MenuGroup::SavedDbs => "Saved DBs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EngineStart,
    EngineStop,
    EngineStatus,
    EngineInstall,
    TestDbSetup,
    TestDbTeardown,
    TestDbReset,
    DevStartEphemeral,
    DevStartPersistent,
    DevReconnect,
    DevStop,
    TestsUnit,
    TestsIntegration,
    TestsAll,
    SavedDelete,
}

/// Menu entries in display order; entry `n` is shown as `n + 1`.
pub const MENU: [Action; 15] = [
    Action::EngineStart,
    Action::EngineStop,
    Action::EngineStatus,
    Action::EngineInstall,
    Action::TestDbSetup,
    Action::TestDbTeardown,
    Action::TestDbReset,
    Action::DevStartEphemeral,
    Action::DevStartPersistent,
    Action::DevReconnect,
    Action::DevStop,
    Action::TestsUnit,
    Action::TestsIntegration,
    Action::TestsAll,
    Action::SavedDelete,
];

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::EngineStart => "Start PostgreSQL",
            Action::EngineStop => "Stop PostgreSQL",
            Action::EngineStatus => "PostgreSQL status",
            Action::EngineInstall => "Install PostgreSQL",
            Action::TestDbSetup => "Set up test DB",
            Action::TestDbTeardown => "Tear down test DB",
            Action::TestDbReset => "Reset test DB",
            Action::DevStartEphemeral => "Start (ephemeral)",
            Action::DevStartPersistent => "Start (persistent)",
            Action::DevReconnect => "Reconnect to saved DB",
            Action::DevStop => "Stop dev server",
            Action::TestsUnit => "Unit tests",
            Action::TestsIntegration => "Integration tests",
            Action::TestsAll => "All tests",
            Action::SavedDelete => "Delete saved credentials",
        }
    }

    pub fn menu_group(&self) -> MenuGroup {
        match self {
            Action::EngineStart
            | Action::EngineStop
            | Action::EngineStatus
            | Action::EngineInstall => MenuGroup::Database,
            Action::TestDbSetup | Action::TestDbTeardown | Action::TestDbReset => MenuGroup::TestDb,
            Action::DevStartEphemeral
            | Action::DevStartPersistent
            | Action::DevReconnect
            | Action::DevStop => MenuGroup::DevServer,
            Action::TestsUnit | Action::TestsIntegration | Action::TestsAll => MenuGroup::Tests,
            Action::SavedDelete => MenuGroup::SavedDbs,
        }
    }

    pub fn task_group(&self) -> TaskGroup {
        match self.menu_group() {
            MenuGroup::DevServer => TaskGroup::DevServer,
            _ => TaskGroup::Command,
        }
    }
}

/// Outcome of a background task: a success line or an error line.
pub type TaskResult = std::result::Result<String, String>;

struct RunningTask {
    label: &'static str,
    handle: JoinHandle<TaskResult>,
}

/// One slot per [`TaskGroup`].
#[derive(Default)]
struct TaskSlots {
    running: HashMap<TaskGroup, RunningTask>,
}

impl TaskSlots {
    /// Label of the unfinished task in `group`, if any.
    fn busy(&self, group: TaskGroup) -> Option<&'static str> {
        self.running
            .get(&group)
            .filter(|task| !task.handle.is_finished())
            .map(|task| task.label)
    }

    /// Caller must have checked [`busy`](Self::busy) and reaped the slot.
    fn insert(&mut self, group: TaskGroup, label: &'static str, handle: JoinHandle<TaskResult>) {
        self.running.insert(group, RunningTask { label, handle });
    }

    fn take_finished(&mut self) -> Vec<(TaskGroup, RunningTask)> {
        let done: Vec<TaskGroup> = self
            .running
            .iter()
            .filter(|(_, task)| task.handle.is_finished())
            .map(|(group, _)| *group)
            .collect();
        done.into_iter()
            .filter_map(|group| self.running.remove(&group).map(|task| (group, task)))
            .collect()
    }

    fn take(&mut self, group: TaskGroup) -> Option<RunningTask> {
        self.running.remove(&group)
    }
}

/// Bounded scrollback. `scroll` counts lines up from the bottom; 0 follows.
#[derive(Debug, Default)]
pub struct LogPanel {
    lines: VecDeque<LogLine>,
    scroll: usize,
}

impl LogPanel {
    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() >= LOG_BUFFER_SIZE {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        if self.scroll > 0 {
            // Keep the viewport on the same lines while paused.
            self.scroll = (self.scroll + 1).min(self.lines.len().saturating_sub(1));
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_following(&self) -> bool {
        self.scroll == 0
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.scroll = (self.scroll + n).min(self.lines.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.scroll = self.scroll.saturating_sub(n);
    }

    pub fn follow(&mut self) {
        self.scroll = 0;
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.scroll = 0;
    }

    /// The lines that fit in `height` rows at the current scroll position.
    pub fn visible(&self, height: usize) -> impl Iterator<Item = &LogLine> {
        let end = self.lines.len().saturating_sub(self.scroll);
        let start = end.saturating_sub(height);
        self.lines.range(start..end)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.message.contains(needle))
    }
}

/// Digits typed in quick succession form one menu number.
#[derive(Debug, Default)]
struct NumberInput {
    digits: String,
    last: Option<Instant>,
}

impl NumberInput {
    /// Feed a digit; returns the zero-based menu index it selects.
    fn push(&mut self, digit: char, now: Instant, entries: usize) -> Option<usize> {
        let continuing = self
            .last
            .is_some_and(|last| now.duration_since(last) < NUMBER_INPUT_WINDOW);
        if !continuing {
            self.digits.clear();
        }
        self.digits.push(digit);
        self.last = Some(now);

        match self.digits.parse::<usize>() {
            Ok(n) if (1..=entries).contains(&n) => Some(n - 1),
            _ => {
                // "2" then "7" with 15 entries: start over from the new digit.
                self.digits = digit.to_string();
                digit
                    .to_digit(10)
                    .map(|d| d as usize)
                    .filter(|n| (1..=entries).contains(n))
                    .map(|n| n - 1)
            }
        }
    }
}

/// Shared slot for the cleanup spawned when a supervised server dies.
type PendingCleanup = Arc<Mutex<Option<JoinHandle<()>>>>;

pub struct App {
    orchestrator: SessionOrchestrator,
    test_db: Arc<TestDbConfig>,
    supervisor: Arc<Supervisor>,
    output: Arc<ChannelOutput>,
    output_rx: mpsc::UnboundedReceiver<LogLine>,

    /// Session started from this dashboard; cleared by its cleanup.
    session: Arc<Mutex<Option<SessionRecord>>>,
    pending_cleanup: PendingCleanup,
    tasks: TaskSlots,
    number_input: NumberInput,

    pub logs: LogPanel,
    pub selected: usize,
    pub saved: Vec<SavedDatabase>,
    pub selected_saved: usize,
    pub show_help: bool,
    pub status_message: Option<StatusMessage>,
    pub terminal_height: u16,
}

impl App {
    pub fn new(orchestrator: SessionOrchestrator, test_db: TestDbConfig) -> Self {
        let supervisor = Supervisor::new().with_state_store(orchestrator.store().clone());
        let (output, output_rx) = ChannelOutput::new();
        let saved = orchestrator.saved_databases();

        Self {
            orchestrator,
            test_db: Arc::new(test_db),
            supervisor: Arc::new(supervisor),
            output: Arc::new(output),
            output_rx,
            session: Arc::new(Mutex::new(None)),
            pending_cleanup: Arc::new(Mutex::new(None)),
            tasks: TaskSlots::default(),
            number_input: NumberInput::default(),
            logs: LogPanel::default(),
            selected: 0,
            saved,
            selected_saved: 0,
            show_help: false,
            status_message: None,
            terminal_height: 24,
        }
    }

    pub fn selected_action(&self) -> Action {
        MENU[self.selected.min(MENU.len() - 1)]
    }

    pub fn selected_saved_name(&self) -> Option<&str> {
        self.saved.get(self.selected_saved).map(|db| db.name.as_str())
    }

    /// Label of the task running in `group`, if any.
    pub fn busy(&self, group: TaskGroup) -> Option<&'static str> {
        self.tasks.busy(group)
    }

    pub fn dev_state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    pub fn dev_pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    /// The dashboard's dev session while its server is alive.
    pub fn dev_session(&self) -> Option<SessionRecord> {
        if self.supervisor.state() == SupervisorState::Idle {
            return None;
        }
        self.session.lock().clone()
    }

    /// Handle keyboard input. Returns `false` when the user wants to quit.
    pub async fn handle_key(&mut self, key: KeyEvent) -> anyhow::Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('q') if !self.show_help => return Ok(false),
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
                return Ok(true);
            }
            KeyCode::Esc => {
                self.show_help = false;
                return Ok(true);
            }
            _ => {}
        }

        if self.show_help {
            return Ok(true);
        }

        let page = usize::from(self.terminal_height / 2).max(1);
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.select_previous(),
            KeyCode::Down | KeyCode::Char('j') => self.select_next(),
            KeyCode::Left | KeyCode::Char('h') => self.select_previous_saved(),
            KeyCode::Right | KeyCode::Char('l') => self.select_next_saved(),
            KeyCode::Enter => {
                let action = self.selected_action();
                self.run_action(action).await;
            }
            KeyCode::Char(c) if c.is_ascii_digit() => {
                if let Some(index) = self.number_input.push(c, Instant::now(), MENU.len()) {
                    self.selected = index;
                }
            }
            KeyCode::PageUp => self.logs.scroll_up(page),
            KeyCode::PageDown => self.logs.scroll_down(page),
            KeyCode::End | KeyCode::Char('f') => self.logs.follow(),
            KeyCode::Char('c') => self.logs.clear(),
            _ => {}
        }
        Ok(true)
    }

    pub async fn on_tick(&mut self) -> anyhow::Result<()> {
        while let Ok(line) = self.output_rx.try_recv() {
            self.logs.push(line);
        }
        for line in self.supervisor.drain_output() {
            self.logs.push(LogLine::new(LogLevel::Output, line));
        }

        // Observing the exit here reaps the child and triggers its cleanup.
        if self.supervisor.state() == SupervisorState::Running && !self.supervisor.is_running() {
            self.set_status("Dev server exited", StatusLevel::Warning, 5);
        }

        self.reap_tasks().await;

        if let Some(msg) = &self.status_message {
            if Instant::now() >= msg.expires_at {
                self.status_message = None;
            }
        }
        Ok(())
    }

    pub fn on_resize(&mut self, _width: u16, height: u16) {
        self.terminal_height = height;
    }

    /// Dispatch one menu action. Returns whether a task was started.
    pub async fn run_action(&mut self, action: Action) -> bool {
        self.reap_tasks().await;

        let group = action.task_group();
        if let Some(label) = self.tasks.busy(group) {
            self.set_status(
                &format!("'{}' is still running", label),
                StatusLevel::Warning,
                3,
            );
            return false;
        }

        let orch = self.orchestrator.clone();
        let out = self.output.clone();
        let test_db = self.test_db.clone();
        let label = action.label();

        match action {
            Action::EngineStart => self.spawn(group, label, async move {
                outcome(orch.engine_start(&*out).await, "PostgreSQL is running")
            }),
            Action::EngineStop => self.spawn(group, label, async move {
                outcome(orch.engine_stop(&*out).await, "PostgreSQL is stopped")
            }),
            Action::EngineStatus => self.spawn(group, label, async move {
                orch.report_engine_status(&test_db, &*out).await;
                Ok("Status refreshed".to_string())
            }),
            Action::EngineInstall => self.spawn(group, label, async move {
                outcome(orch.engine_install(true, &*out).await, "PostgreSQL installed")
            }),
            Action::TestDbSetup => self.spawn(group, label, async move {
                outcome(orch.setup_test_db(&test_db, &*out).await, "Test database ready")
            }),
            // No one to ask in the dashboard: refuse while in use.
            Action::TestDbTeardown => self.spawn(group, label, async move {
                outcome(
                    orch.teardown_test_db(&test_db, &AutoConfirm::no(), &*out).await,
                    "Test database removed",
                )
            }),
            Action::TestDbReset => self.spawn(group, label, async move {
                outcome(
                    orch.reset_test_db(&test_db, &AutoConfirm::no(), &*out).await,
                    "Test database reset",
                )
            }),
            Action::DevStartEphemeral => self.start_dev(StartRequest::default(), label),
            Action::DevStartPersistent => self.start_dev(
                StartRequest {
                    persist: true,
                    ..Default::default()
                },
                label,
            ),
            Action::DevReconnect => match self.selected_saved_name() {
                Some(name) => {
                    let request = StartRequest {
                        reconnect: Some(name.to_string()),
                        ..Default::default()
                    };
                    self.start_dev(request, label)
                }
                None => {
                    self.set_status("No saved database selected", StatusLevel::Warning, 3);
                    false
                }
            },
            Action::DevStop => self.stop_dev(),
            Action::TestsUnit | Action::TestsIntegration | Action::TestsAll => {
                let options = SuiteOptions {
                    unit_only: action == Action::TestsUnit,
                    integration_only: action == Action::TestsIntegration,
                    ..Default::default()
                };
                self.spawn(group, label, async move {
                    let result = orch.run_test_suite(options, &test_db, &*out).await;
                    match result.exit_code() {
                        0 => Ok("Tests passed".to_string()),
                        code => Err(format!("Tests failed (exit code {})", code)),
                    }
                })
            }
            Action::SavedDelete => match self.selected_saved_name() {
                Some(name) => {
                    let name = name.to_string();
                    self.spawn(group, label, async move {
                        outcome(
                            orch.forget_saved(&name, false, &*out).await,
                            "Saved credentials removed",
                        )
                    })
                }
                None => {
                    self.set_status("No saved database selected", StatusLevel::Warning, 3);
                    false
                }
            },
        }
    }

    /// Stop the dev server (if any) and wait for its cleanup. Called once
    /// the event loop has exited.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.tasks.take(TaskGroup::Command) {
            task.handle.abort();
        }
        // Let an in-flight start or stop settle so its database is accounted for.
        if let Some(task) = self.tasks.take(TaskGroup::DevServer) {
            let _ = task.handle.await;
        }

        if self.supervisor.state() != SupervisorState::Idle {
            let timeout = self.orchestrator.project().config.stop_timeout();
            if let Err(e) =
                stop_supervised(self.supervisor.clone(), self.pending_cleanup.clone(), timeout)
                    .await
            {
                tracing::error!("Failed to stop dev server on exit: {}", e);
            }
        } else {
            let pending = self.pending_cleanup.lock().take();
            if let Some(cleanup) = pending {
                let _ = cleanup.await;
            }
        }
    }

    pub fn set_status(&mut self, text: &str, level: StatusLevel, duration_secs: u64) {
        self.status_message = Some(StatusMessage {
            text: text.to_string(),
            level,
            expires_at: Instant::now() + Duration::from_secs(duration_secs),
        });
    }

    fn spawn<F>(&mut self, group: TaskGroup, label: &'static str, task: F) -> bool
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        self.logs
            .push(LogLine::new(LogLevel::Info, format!("▶ {}", label)));
        self.tasks.insert(group, label, tokio::spawn(task));
        self.set_status(&format!("{}...", label), StatusLevel::Info, 2);
        true
    }

    fn start_dev(&mut self, request: StartRequest, label: &'static str) -> bool {
        if self.supervisor.state() != SupervisorState::Idle {
            self.set_status("Dev server is already running", StatusLevel::Warning, 3);
            return false;
        }

        let orch = self.orchestrator.clone();
        let out = self.output.clone();
        let supervisor = self.supervisor.clone();
        let session = self.session.clone();
        let pending = self.pending_cleanup.clone();

        self.spawn(TaskGroup::DevServer, label, async move {
            let prepared = orch
                .prepare(request, &AutoConfirm::yes(), &*out)
                .await
                .map_err(|e| e.to_string())?;
            let mut record = prepared.record.clone();

            let cleanup = dev_cleanup(
                orch.clone(),
                out.clone(),
                record.clone(),
                session.clone(),
                pending,
            );
            let sup = supervisor.clone();
            let started = tokio::task::spawn_blocking(move || {
                sup.start(&prepared.command, &prepared.cwd, &prepared.env, Some(cleanup))
            })
            .await
            .map_err(|e| e.to_string())?;

            match started {
                Ok(true) => {}
                Ok(false) => return Err("Dev server is already running".to_string()),
                Err(e) => {
                    orch.cleanup_after_exit(&record, &*out).await;
                    return Err(e.to_string());
                }
            }

            if let Some(pid) = supervisor.pid() {
                record.pid = pid;
                if let Err(e) = orch.store().update_session_pid(pid) {
                    tracing::warn!("Failed to record dev server PID: {}", e);
                }
            }
            let message = format!("Dev server started on http://localhost:{}", record.port);
            *session.lock() = Some(record);
            Ok(message)
        })
    }

    fn stop_dev(&mut self) -> bool {
        if self.supervisor.state() == SupervisorState::Idle {
            self.set_status("Dev server is not running", StatusLevel::Info, 3);
            return false;
        }
        let supervisor = self.supervisor.clone();
        let pending = self.pending_cleanup.clone();
        let timeout = self.orchestrator.project().config.stop_timeout();
        self.spawn(TaskGroup::DevServer, Action::DevStop.label(), async move {
            stop_supervised(supervisor, pending, timeout).await
        })
    }

    async fn reap_tasks(&mut self) {
        let finished = self.tasks.take_finished();
        if finished.is_empty() {
            return;
        }
        // Messages the tasks sent before finishing go first.
        while let Ok(line) = self.output_rx.try_recv() {
            self.logs.push(line);
        }

        for (group, task) in finished {
            match task.handle.await {
                Ok(Ok(message)) => {
                    self.logs.push(LogLine::new(LogLevel::Success, &message));
                    self.set_status(&message, StatusLevel::Success, 3);
                }
                Ok(Err(error)) => {
                    let message = format!("{} failed: {}", task.label, error);
                    self.logs.push(LogLine::new(LogLevel::Error, &message));
                    self.set_status(&message, StatusLevel::Error, 5);
                }
                Err(e) => {
                    tracing::error!("{} task ({}) ended abnormally: {}", task.label, group.name(), e);
                    let message = format!("{} crashed", task.label);
                    self.logs.push(LogLine::new(LogLevel::Error, &message));
                    self.set_status(&message, StatusLevel::Error, 5);
                }
            }
        }
        self.refresh_saved();
    }

    fn refresh_saved(&mut self) {
        self.saved = self.orchestrator.saved_databases();
        if self.selected_saved >= self.saved.len() {
            self.selected_saved = self.saved.len().saturating_sub(1);
        }
    }

    fn select_next(&mut self) {
        if self.selected + 1 < MENU.len() {
            self.selected += 1;
        }
    }

    fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn select_next_saved(&mut self) {
        if self.selected_saved + 1 < self.saved.len() {
            self.selected_saved += 1;
        }
    }

    fn select_previous_saved(&mut self) {
        self.selected_saved = self.selected_saved.saturating_sub(1);
    }
}

fn outcome(result: crate::Result<()>, done: &str) -> TaskResult {
    result.map(|()| done.to_string()).map_err(|e| e.to_string())
}

/// Cleanup for a supervised dev server: runs on whichever thread observes
/// the death, so the async part is handed to the runtime.
fn dev_cleanup(
    orch: SessionOrchestrator,
    out: Arc<ChannelOutput>,
    record: SessionRecord,
    session: Arc<Mutex<Option<SessionRecord>>>,
    pending: PendingCleanup,
) -> CleanupFn {
    let handle = tokio::runtime::Handle::current();
    Box::new(move || {
        session.lock().take();
        let task = handle.spawn(async move {
            orch.cleanup_after_exit(&record, &*out).await;
        });
        *pending.lock() = Some(task);
    })
}

async fn stop_supervised(
    supervisor: Arc<Supervisor>,
    pending: PendingCleanup,
    timeout: Duration,
) -> TaskResult {
    tokio::task::spawn_blocking(move || supervisor.stop(timeout))
        .await
        .map_err(|e| e.to_string())?;
    let cleanup = pending.lock().take();
    if let Some(cleanup) = cleanup {
        cleanup.await.map_err(|e| e.to_string())?;
    }
    Ok("Dev server stopped".to_string())
}
