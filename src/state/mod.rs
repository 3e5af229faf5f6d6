//! Durable session state.
//!
//! Two JSON documents, both rewritten whole on every change:
//!
//! - the Session Record (one live dev server per host), kept in the temp
//!   directory
//! - the credential map (databases that outlive their session), kept in the
//!   project root
//!
//! Reads never fail. A missing, unreadable or malformed file is reported as
//! "nothing stored" so callers can always make progress.

mod types;

pub use types::*;

use crate::error::{Error, Result};
use crate::probe::is_process_alive;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StateStore {
    session_path: PathBuf,
    credentials_path: PathBuf,
}

impl StateStore {
    pub fn new(session_path: impl Into<PathBuf>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            session_path: session_path.into(),
            credentials_path: credentials_path.into(),
        }
    }

    pub fn for_project(project: &crate::config::Project) -> Self {
        Self::new(
            project.config.state_path(),
            project.config.credentials_path(&project.root),
        )
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn credentials_path(&self) -> &Path {
        &self.credentials_path
    }

    // ── Session Record ────────────────────────────────────────────────

    pub fn save_session(&self, record: &SessionRecord) -> Result<()> {
        write_json(&self.session_path, record)
    }

    pub fn load_session(&self) -> Option<SessionRecord> {
        read_json(&self.session_path)
    }

    pub fn remove_session(&self) -> Result<()> {
        remove_if_exists(&self.session_path)
    }

    /// Back-fill the PID once the child process exists.
    pub fn update_session_pid(&self, pid: u32) -> Result<()> {
        let Some(mut record) = self.load_session() else {
            return Err(Error::Config(
                "No session record to update with the server PID".to_string(),
            ));
        };
        record.pid = pid;
        self.save_session(&record)
    }

    /// The live record using `db_name`, if any.
    pub fn is_database_in_use(&self, db_name: &str) -> Option<SessionRecord> {
        self.load_session()
            .filter(|record| record.db_name == db_name && is_process_alive(record.pid))
    }

    // ── Credentials ───────────────────────────────────────────────────

    /// Insert or overwrite the entry for `name`.
    pub fn save_credential(&self, name: &str, entry: CredentialEntry) -> Result<()> {
        let mut document = self.credential_document();
        document.insert(name.to_string(), serde_json::to_value(entry)?);
        write_json(&self.credentials_path, &document)
    }

    /// Look up `name` and stamp `last_used`.
    ///
    /// The refreshed entry is persisted; a failed write is logged and the
    /// entry is still returned.
    pub fn load_credential(&self, name: &str) -> Option<CredentialEntry> {
        let mut document = self.credential_document();
        let mut entry = parse_entry(name, document.get(name)?.clone())?;
        entry.last_used = Some(Utc::now());
        let refreshed = serde_json::to_value(&entry)
            .map_err(Error::from)
            .and_then(|value| {
                document.insert(name.to_string(), value);
                write_json(&self.credentials_path, &document)
            });
        if let Err(e) = refreshed {
            tracing::warn!("Failed to refresh last_used for '{}': {}", name, e);
        }
        Some(entry)
    }

    /// Look up `name` without touching `last_used`.
    pub fn peek_credential(&self, name: &str) -> Option<CredentialEntry> {
        let value = self.credential_document().remove(name)?;
        parse_entry(name, value)
    }

    /// Returns whether an entry was removed.
    pub fn remove_credential(&self, name: &str) -> Result<bool> {
        let mut document = self.credential_document();
        if document.remove(name).is_none() {
            return Ok(false);
        }
        write_json(&self.credentials_path, &document)?;
        Ok(true)
    }

    pub fn list_credential_names(&self) -> Vec<String> {
        self.list_all_credentials().into_keys().collect()
    }

    /// Every entry that parses. Unreadable entries are skipped here but
    /// kept on disk by the writers above.
    pub fn list_all_credentials(&self) -> CredentialMap {
        self.credential_document()
            .into_iter()
            .filter_map(|(name, value)| {
                let entry = parse_entry(&name, value)?;
                Some((name, entry))
            })
            .collect()
    }

    /// The credential file as raw per-name values.
    fn credential_document(&self) -> BTreeMap<String, serde_json::Value> {
        read_json(&self.credentials_path).unwrap_or_default()
    }
}

fn parse_entry(name: &str, value: serde_json::Value) -> Option<CredentialEntry> {
    match serde_json::from_value(value) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!("Skipping unreadable credentials for '{}': {}", name, e);
            None
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring malformed state file {}: {}", path.display(), e);
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value)?;
    atomic_write(path, &contents)
}

/// Write-then-rename so readers never observe a half-written file.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        // Holds database passwords.
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&temp_path)
        .map_err(|e| Error::Config(format!("Failed to create {}: {}", temp_path.display(), e)))?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Config(format!("Failed to replace {}: {}", path.display(), e))
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
