use super::orphans::OrphanSweeper;
use super::SessionOrchestrator;
use crate::config::SessionMode;
use crate::error::{Error, Result};
use crate::output::UserOutput;
use crate::probe::{find_process_on_port, is_process_alive, kill_process_tree};
use crate::prompt::Confirm;
use crate::state::SessionRecord;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// Also remove persistent/reconnect databases and their credentials,
    /// and sweep orphaned ephemeral databases when nothing is running.
    pub force_cleanup: bool,
    /// Grace period before SIGKILL. Defaults to `stop_timeout_secs`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    NotRunning,
    /// The recorded server was signalled and has exited.
    Stopped(SessionRecord),
    /// The record's PID was already dead.
    Stale(SessionRecord),
    /// No record; the process on the default port was killed.
    OrphanKilled(u32),
    /// No record; the process on the default port was left alone.
    OrphanLeft(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub outcome: StopOutcome,
    pub database_dropped: bool,
    pub credentials_removed: bool,
    /// Orphaned databases dropped by a forced sweep.
    pub swept: Vec<String>,
}

impl StopReport {
    fn new(outcome: StopOutcome) -> Self {
        Self {
            outcome,
            database_dropped: false,
            credentials_removed: false,
            swept: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Running(SessionRecord),
    /// A record exists but its process is gone.
    Stale(SessionRecord),
    /// No record, but something listens on the default port.
    OrphanOnPort { port: u16, pid: u32 },
    NotRunning,
}

impl SessionOrchestrator {
    /// Read-only view of the dev server.
    pub async fn status(&self) -> SessionStatus {
        if let Some(record) = self.store.load_session() {
            return if is_process_alive(record.pid) {
                SessionStatus::Running(record)
            } else {
                SessionStatus::Stale(record)
            };
        }
        let port = self.project.config.default_port;
        match tokio::task::spawn_blocking(move || find_process_on_port(port))
            .await
            .ok()
            .flatten()
        {
            Some(pid) => SessionStatus::OrphanOnPort { port, pid },
            None => SessionStatus::NotRunning,
        }
    }

    /// Stop the recorded server and apply its mode's cleanup policy.
    ///
    /// A dead PID skips signalling but still cleans up. Without a record,
    /// offers to kill whatever holds the default port and, when forced,
    /// sweeps orphaned ephemeral databases.
    pub async fn stop(
        &self,
        options: StopOptions,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
    ) -> Result<StopReport> {
        let Some(record) = self.store.load_session() else {
            return self.stop_without_record(options, confirm, out).await;
        };

        if !is_process_alive(record.pid) {
            out.warning(&format!(
                "Process {} is not running, cleaning up state",
                record.pid
            ));
            self.store.remove_session()?;
            let mut report = StopReport::new(StopOutcome::Stale(record.clone()));
            self.apply_stop_policy(&record, options.force_cleanup, false, confirm, out, &mut report)
                .await;
            return Ok(report);
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.project.config.stop_timeout());
        out.status(&format!("Stopping dev server (PID: {})...", record.pid));
        if !kill_process_tree(record.pid, timeout).await? {
            out.error("Failed to stop dev server");
            return Err(Error::Process(format!(
                "dev server (PID {}) survived SIGKILL",
                record.pid
            )));
        }
        out.success("Dev server stopped");
        self.store.remove_session()?;

        let mut report = StopReport::new(StopOutcome::Stopped(record.clone()));
        self.apply_stop_policy(&record, options.force_cleanup, true, confirm, out, &mut report)
            .await;
        Ok(report)
    }

    /// Ephemeral databases always go. Others stay unless forced; a forced
    /// removal of a live session's database asks first.
    async fn apply_stop_policy(
        &self,
        record: &SessionRecord,
        force_cleanup: bool,
        ask_before_force: bool,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
        report: &mut StopReport,
    ) {
        let name = &record.db_name;
        if name.is_empty() {
            return;
        }

        if record.mode == SessionMode::Ephemeral {
            out.status(&format!("Cleaning up ephemeral database '{}'...", name));
            report.database_dropped = self.drop_session_database(name, out).await;
            return;
        }

        if !force_cleanup {
            out.status(&format!(
                "Database '{}' preserved (use --force-cleanup to remove)",
                name
            ));
            return;
        }

        if ask_before_force
            && !confirm.confirm(&format!("Remove persistent database '{}'?", name), false)
        {
            out.status(&format!("Database '{}' preserved", name));
            return;
        }

        out.status(&format!("Removing database '{}'...", name));
        report.database_dropped = self.drop_session_database(name, out).await;
        match self.store.remove_credential(name) {
            Ok(removed) => report.credentials_removed = removed,
            Err(e) => out.warning(&format!("Could not remove saved credentials: {}", e)),
        }
    }

    async fn stop_without_record(
        &self,
        options: StopOptions,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
    ) -> Result<StopReport> {
        let port = self.project.config.default_port;
        let orphan = tokio::task::spawn_blocking(move || find_process_on_port(port))
            .await
            .ok()
            .flatten();

        let outcome = match orphan {
            Some(pid) => {
                out.warning(&format!(
                    "No state file found, but process detected on port {}",
                    port
                ));
                if confirm.confirm("Kill process?", false) {
                    out.status(&format!("Killing process {}...", pid));
                    let timeout = self.project.config.stop_timeout();
                    if kill_process_tree(pid, timeout).await? {
                        out.success("Process killed");
                    } else {
                        out.error("Failed to kill process");
                    }
                    StopOutcome::OrphanKilled(pid)
                } else {
                    StopOutcome::OrphanLeft(pid)
                }
            }
            None => {
                out.status("Dev server is not running");
                StopOutcome::NotRunning
            }
        };

        let mut report = StopReport::new(outcome);
        if options.force_cleanup {
            report.swept = OrphanSweeper::new(self).sweep(out).await?;
        }
        Ok(report)
    }
}
