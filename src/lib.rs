#![allow(unused_assignments)]

//! # comradarr-dev
//!
//! Development environment manager for Comradarr: runs the dev server
//! against an isolated PostgreSQL database and cleans up after it.
//!
//! ## Features
//!
//! - **Session modes**: ephemeral databases dropped on stop, persistent
//!   databases whose credentials are saved, and reconnects to saved ones
//! - **Self-healing state**: a dead PID in the Session Record is treated as
//!   "not running" and cleaned up like a normal stop
//! - **Provisioning**: role, database, migrations and admin seed through the
//!   `psql` client on macOS (Homebrew) and Linux (apt)
//! - **Supervision**: a background dev server with merged output captured in
//!   a bounded ring buffer
//! - **Test runs**: unit and integration suites against a shared test
//!   database
//! - **TUI**: an interactive dashboard over all of the above
//!
//! ## Quick Start
//!
//! ```no_run
//! use comradarr_dev::orchestrator::{SessionOrchestrator, StartRequest};
//! use comradarr_dev::output::CliOutput;
//! use comradarr_dev::platform::{Platform, PostgresGateway, SystemRunner};
//! use comradarr_dev::prompt::TerminalPrompt;
//! use comradarr_dev::state::StateStore;
//! use comradarr_dev::Project;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), comradarr_dev::Error> {
//! let project = Project::load(None)?;
//! let runner = Arc::new(SystemRunner);
//! let gateway = Arc::new(PostgresGateway::new(Platform::detect(), runner.clone()));
//! let store = StateStore::for_project(&project);
//! let orchestrator = SessionOrchestrator::new(gateway, runner, store, project);
//!
//! let session = orchestrator
//!     .prepare(StartRequest::default(), &TerminalPrompt, &CliOutput)
//!     .await?;
//! println!("Database: {}", session.db_name());
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Orchestration runs on one call path per invocation. The only threads
//! sharing mutable state are the Supervisor's output reader and whoever
//! drains its [`service::LogBuffer`]. State files are not locked across
//! processes: running the CLI and the TUI against the same project at once
//! can lose an update.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod platform;
pub mod probe;
pub mod prompt;
pub mod service;
pub mod state;
pub mod tui;

// Re-export commonly used types
pub use config::{DevConfig, Project, ProjectConfig, SessionMode, TestDbConfig};
pub use error::{Error, Result};
pub use orchestrator::SessionOrchestrator;
pub use platform::{DatabaseGateway, Platform, PostgresGateway};
pub use service::{LogBuffer, Supervisor};
pub use state::{CredentialEntry, SessionRecord, StateStore};
