use comradarr_dev::config::TestDbConfig;
use comradarr_dev::orchestrator::SessionOrchestrator;

pub async fn run_tui(orchestrator: SessionOrchestrator) -> anyhow::Result<()> {
    comradarr_dev::tui::run(orchestrator, TestDbConfig::from_env()).await?;
    Ok(())
}
