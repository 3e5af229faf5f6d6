mod cli;
mod commands;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, DbCommands, SavedCommands};
use comradarr_dev::orchestrator::{SessionOrchestrator, SuiteOptions};
use comradarr_dev::output::CliOutput;
use comradarr_dev::platform::{Platform, PostgresGateway, SystemRunner};
use comradarr_dev::state::StateStore;
use comradarr_dev::{Error as DevError, Project};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Declining a prompt is not a failure.
            if let Some(DevError::Aborted) = e.downcast_ref::<DevError>() {
                eprintln!("Cancelled");
                return;
            }

            if let Some(dev_error) = e.downcast_ref::<DevError>() {
                eprintln!("Error: {}", dev_error);
                if let Some(suggestion) = dev_error.suggestion() {
                    eprintln!("\nHint: {}", suggestion);
                }
            } else {
                eprintln!("Error: {:#}", e);
            }
            std::process::exit(1);
        }
    }
}

/// Returns the exit code on success; only `test` uses a non-zero one.
async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let is_tui = matches!(cli.command, Commands::Tui);
    init_tracing(is_tui, cli.verbose)?;

    let out = CliOutput;

    // ── Tier 1: Commands that need no project ─────────────────────────
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            return Ok(0);
        }
        Commands::Db(DbCommands::Env) => {
            commands::run_db_env(&out);
            return Ok(0);
        }
        _ => {}
    }

    // ── Load project ─────────────────────────────────────────────────
    let project = Project::load(cli.project_root.as_deref())?;
    project.config.validate()?;
    match &project.config_path {
        Some(path) => tracing::debug!("Using config {}", path.display()),
        None => tracing::debug!("No config file, using defaults in {}", project.root.display()),
    }

    let db_port = match &cli.command {
        Commands::Dev(args) => args.db_port.unwrap_or(project.config.db_port),
        _ => project.config.db_port,
    };
    let platform = Platform::detect();
    tracing::debug!("Detected platform: {}", platform);
    let orchestrator = build_orchestrator(project, platform.clone(), db_port);

    // ── Tier 2: Everything else ──────────────────────────────────────
    match cli.command {
        Commands::Dev(args) => commands::run_dev(&orchestrator, &args, &out).await?,
        Commands::Stop {
            status,
            force_cleanup,
        } => commands::run_stop(&orchestrator, status, force_cleanup, &out).await?,
        Commands::Test {
            unit,
            integration,
            skip_db,
            no_auto_install,
        } => {
            let options = SuiteOptions {
                unit_only: unit,
                integration_only: integration,
                skip_db,
                no_auto_install,
            };
            return commands::run_test(&orchestrator, options, &out).await;
        }
        Commands::Db(cmd) => commands::run_db(&cmd, &orchestrator, &platform, &out).await?,
        Commands::Saved(SavedCommands::List { json }) => {
            commands::run_saved_list(&orchestrator, json, &out)?
        }
        Commands::Saved(SavedCommands::Delete { name, drop }) => {
            commands::run_saved_delete(&orchestrator, &name, drop, &out).await?
        }
        Commands::Tui => commands::run_tui(orchestrator).await?,
        // Handled before the project was loaded.
        Commands::Completions { .. } => {}
    }
    Ok(0)
}

fn build_orchestrator(project: Project, platform: Platform, db_port: u16) -> SessionOrchestrator {
    let runner = Arc::new(SystemRunner);
    let gateway = PostgresGateway::new(platform, runner.clone()).with_port(db_port);
    let store = StateStore::for_project(&project);
    SessionOrchestrator::new(Arc::new(gateway), runner, store, project)
}

fn init_tracing(is_tui: bool, verbose: bool) -> anyhow::Result<()> {
    let default_level = match (verbose, is_tui) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
    };

    if is_tui {
        // The terminal belongs to the dashboard; log to a file instead.
        let log_dir = dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".comradarr-dev")
            .join("logs");
        std::fs::create_dir_all(&log_dir)?;

        let log_path = log_dir.join("tui.log");
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::sync::Mutex::new(log_file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .init();
    }

    Ok(())
}
