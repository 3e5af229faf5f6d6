use crate::cli::DbCommands;
use comradarr_dev::config::TestDbConfig;
use comradarr_dev::orchestrator::SessionOrchestrator;
use comradarr_dev::output::UserOutput;
use comradarr_dev::platform::Platform;
use comradarr_dev::prompt::TerminalPrompt;

pub async fn run_db(
    cmd: &DbCommands,
    orchestrator: &SessionOrchestrator,
    platform: &Platform,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let test_db = TestDbConfig::from_env();
    match cmd {
        DbCommands::Install { no_start } => orchestrator.engine_install(!no_start, out).await?,
        DbCommands::Start => orchestrator.engine_start(out).await?,
        DbCommands::Stop => orchestrator.engine_stop(out).await?,
        DbCommands::Status => {
            out.status(&format!("Platform: {}", platform));
            out.blank();
            orchestrator.report_engine_status(&test_db, out).await;
        }
        DbCommands::Setup => orchestrator.setup_test_db(&test_db, out).await?,
        DbCommands::Teardown => {
            orchestrator
                .teardown_test_db(&test_db, &TerminalPrompt, out)
                .await?
        }
        DbCommands::Reset => {
            orchestrator
                .reset_test_db(&test_db, &TerminalPrompt, out)
                .await?
        }
        DbCommands::Env => run_db_env(out),
    }
    Ok(())
}

/// Shell exports for the test database. Needs no project or engine.
pub fn run_db_env(out: &dyn UserOutput) {
    for line in TestDbConfig::from_env().export_lines() {
        out.line(&line);
    }
}
