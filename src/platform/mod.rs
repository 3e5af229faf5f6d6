//! Host platform detection and PostgreSQL provisioning.
//!
//! The platform is resolved once at startup into a closed [`Platform`]
//! variant and handed to [`PostgresGateway`], which picks the engine
//! control commands and `psql` invocation style for that host.

mod gateway;
mod runner;

pub use gateway::{DatabaseGateway, PostgresGateway, Provisioned};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

pub const DEFAULT_BREW_FORMULA: &str = "postgresql@16";

const BREW_FORMULAE: [&str; 5] = [
    "postgresql@17",
    "postgresql@16",
    "postgresql@15",
    "postgresql@14",
    "postgresql",
];

const DEBIAN_IDS: [&str; 7] = [
    "debian",
    "ubuntu",
    "mint",
    "pop",
    "elementary",
    "kali",
    "raspbian",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    /// Homebrew-managed engine. `formula` is the installed one, if any.
    MacOs { formula: Option<String> },
    /// apt-managed engine, administered as the `postgres` account via sudo.
    Linux { systemd: bool, wsl: bool, debian: bool },
    Unsupported(String),
}

impl Platform {
    /// Probe the current host.
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOs {
                formula: detect_brew_formula(),
            },
            "linux" => Platform::Linux {
                systemd: Path::new("/run/systemd/system").exists(),
                wsl: detect_wsl(),
                debian: std::fs::read_to_string("/etc/os-release")
                    .map(|c| is_debian_like(&c))
                    .unwrap_or(false),
            },
            other => Platform::Unsupported(other.to_string()),
        }
    }

    /// Homebrew formula to manage, falling back to the default.
    pub fn brew_formula(&self) -> Option<&str> {
        match self {
            Platform::MacOs { formula } => {
                Some(formula.as_deref().unwrap_or(DEFAULT_BREW_FORMULA))
            }
            _ => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Platform::Unsupported(_))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::MacOs { formula } => write!(
                f,
                "macOS (Homebrew {})",
                formula.as_deref().unwrap_or("formula not installed")
            ),
            Platform::Linux { systemd, wsl, debian } => {
                write!(f, "Linux")?;
                if *debian {
                    write!(f, " (Debian family)")?;
                }
                if *wsl {
                    write!(f, " under WSL")?;
                }
                if !systemd {
                    write!(f, ", no systemd")?;
                }
                Ok(())
            }
            Platform::Unsupported(os) => write!(f, "{} (unsupported)", os),
        }
    }
}

fn detect_brew_formula() -> Option<String> {
    which::which("brew").ok()?;
    BREW_FORMULAE
        .iter()
        .find(|formula| {
            Command::new("brew")
                .args(["list", "--formula", formula])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
        .map(|f| f.to_string())
}

fn detect_wsl() -> bool {
    std::fs::read_to_string("/proc/version")
        .map(|v| {
            let v = v.to_lowercase();
            v.contains("microsoft") || v.contains("wsl")
        })
        .unwrap_or(false)
}

/// Parse `/etc/os-release` for a Debian-derived `ID` or `ID_LIKE`.
fn is_debian_like(os_release: &str) -> bool {
    let mut ids = Vec::new();
    for line in os_release.lines() {
        if let Some(value) = line
            .strip_prefix("ID_LIKE=")
            .or_else(|| line.strip_prefix("ID="))
        {
            ids.extend(
                value
                    .trim_matches('"')
                    .to_lowercase()
                    .split_whitespace()
                    .map(String::from),
            );
        }
    }
    ids.iter().any(|id| DEBIAN_IDS.contains(&id.as_str()))
}
