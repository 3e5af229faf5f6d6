use comradarr_dev::orchestrator::{SessionOrchestrator, SessionStatus, StopOptions, StopOutcome};
use comradarr_dev::output::UserOutput;
use comradarr_dev::prompt::TerminalPrompt;

pub async fn run_stop(
    orchestrator: &SessionOrchestrator,
    status_only: bool,
    force_cleanup: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if status_only {
        report_status(orchestrator, out).await;
        return Ok(());
    }

    let options = StopOptions {
        force_cleanup,
        timeout: None,
    };
    let report = orchestrator.stop(options, &TerminalPrompt, out).await?;

    if let StopOutcome::OrphanLeft(pid) = report.outcome {
        out.status(&format!("Left process {} running", pid));
    }
    if report.credentials_removed {
        out.success("Saved credentials removed");
    }
    if !report.swept.is_empty() {
        out.success(&format!(
            "Removed {} orphaned database(s)",
            report.swept.len()
        ));
    }
    Ok(())
}

async fn report_status(orchestrator: &SessionOrchestrator, out: &dyn UserOutput) {
    match orchestrator.status().await {
        SessionStatus::Running(record) => {
            out.success(&format!("Dev server is running (PID: {})", record.pid));
            out.status(&format!("  URL:      http://localhost:{}", record.port));
            out.status(&format!("  Database: {} ({})", record.db_name, record.mode));
            out.status(&format!(
                "  Started:  {}",
                record.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        SessionStatus::Stale(record) => {
            out.warning(&format!(
                "State file exists but process {} is not running",
                record.pid
            ));
            out.status("Run 'cr-dev stop' to clean up");
        }
        SessionStatus::OrphanOnPort { port, pid } => {
            out.warning(&format!(
                "No state file, but process {} is listening on port {}",
                pid, port
            ));
        }
        SessionStatus::NotRunning => out.status("Dev server is not running"),
    }
}
