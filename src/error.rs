// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid database name: '{0}'")]
    #[diagnostic(
        code(cr_dev::config::invalid_db_name),
        help("Database names must match ^[A-Za-z_][A-Za-z0-9_]*$ and be at most 63 characters")
    )]
    InvalidDatabaseName(String),

    #[error("Port {port} is already in use{}", .pid.map(|p| format!(" by PID {}", p)).unwrap_or_default())]
    #[diagnostic(
        code(cr_dev::port::in_use),
        help("Find what's using the port with: lsof -i :{port}\nStop the conflicting process or pass a different --port")
    )]
    PortInUse { port: u16, pid: Option<u32> },

    #[error("No saved credentials for database: {0}")]
    #[diagnostic(
        code(cr_dev::credentials::missing),
        help("List saved databases with `cr-dev saved list` or start a persistent session with `cr-dev dev --persist --db-name {0}`")
    )]
    MissingCredentials(String),

    #[error("PostgreSQL is not available: {0}")]
    #[diagnostic(
        code(cr_dev::engine::unavailable),
        help("Start it with `cr-dev db start` or install it with `cr-dev db install`")
    )]
    EngineUnavailable(String),

    #[error("{tool} failed{}: {stderr}", .code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    #[diagnostic(code(cr_dev::tool::failed))]
    ExternalTool {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Migrations failed: {0}")]
    #[diagnostic(
        code(cr_dev::migrations::failed),
        help("Run the migration command manually to see the full output")
    )]
    MigrationFailed(String),

    #[error("Database '{name}' is in use by dev server (PID: {pid})")]
    #[diagnostic(
        code(cr_dev::database::in_use),
        help("Stop the dev server first with `cr-dev stop`")
    )]
    DatabaseInUse { name: String, pid: u32 },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Process error: {0}")]
    #[diagnostic(
        code(cr_dev::process::error),
        help("Check that the command exists and is executable")
    )]
    Process(String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation aborted by user")]
    Aborted,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::InvalidDatabaseName(_) => Some(
                "Use letters, digits and underscores only, starting with a letter or underscore."
                    .to_string(),
            ),
            Error::PortInUse { port, pid } => {
                let kill_hint = match pid {
                    Some(p) => format!("Stop PID {} or pass a different --port.", p),
                    None => "Pass a different --port.".to_string(),
                };
                Some(format!("Port {} is already in use. {}", port, kill_hint))
            }
            Error::MissingCredentials(name) => Some(format!(
                "Start a persistent session first: cr-dev dev --persist --db-name {}",
                name
            )),
            Error::EngineUnavailable(_) => {
                Some("Start PostgreSQL with `cr-dev db start`.".to_string())
            }
            Error::DatabaseInUse { .. } => {
                Some("Stop the dev server first with `cr-dev stop`.".to_string())
            }
            Error::MigrationFailed(_) => Some(
                "Check the migration output above; the freshly created database was rolled back."
                    .to_string(),
            ),
            Error::UnsupportedPlatform(_) => {
                Some("Only macOS (Homebrew) and Linux (apt) are supported.".to_string())
            }
            _ => None,
        }
    }
}

/// Validate a PID before sending it a signal.
///
/// Rejects 0 (would target our own process group), 1 (init) and values that
/// do not fit in a `pid_t`.
pub fn validate_pid(pid: u32) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: "PID 0 refers to the process group, not a process".to_string(),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: "refusing to signal PID 1 (init)".to_string(),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("PID {} exceeds i32::MAX", pid),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Lenient variant for read-only existence checks.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}
