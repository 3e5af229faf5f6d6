use comradarr_dev::orchestrator::SessionOrchestrator;
use comradarr_dev::output::UserOutput;
use comradarr_dev::prompt::{Confirm, TerminalPrompt};

pub fn run_saved_list(
    orchestrator: &SessionOrchestrator,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let saved = orchestrator.saved_databases();

    if json {
        use serde_json::json;

        let list: Vec<_> = saved
            .iter()
            .map(|db| {
                json!({
                    "name": db.name,
                    "saved_at": db.entry.saved_at,
                    "last_used": db.entry.last_used,
                    "in_use_by": db.in_use_by,
                })
            })
            .collect();
        out.line(&serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if saved.is_empty() {
        out.status("No saved databases");
        out.status("Create one with: cr-dev dev --persist --db-name <name>");
        return Ok(());
    }

    out.status("Saved databases:");
    out.status(&format!("{:-<72}", ""));
    for db in saved {
        let last_used = db
            .entry
            .last_used
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let line = format!(
            "  {:<32} saved {}  last used {}",
            db.name,
            db.entry.saved_at.format("%Y-%m-%d %H:%M"),
            last_used
        );
        match db.in_use_by {
            Some(pid) => out.success(&format!("{}  (in use, PID {})", line, pid)),
            None => out.status(&line),
        }
    }
    Ok(())
}

pub async fn run_saved_delete(
    orchestrator: &SessionOrchestrator,
    name: &str,
    drop: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if drop
        && !TerminalPrompt.confirm(
            &format!("Drop database '{}' and all of its data?", name),
            false,
        )
    {
        out.status("Operation cancelled");
        return Ok(());
    }
    orchestrator.forget_saved(name, drop, out).await?;
    Ok(())
}
