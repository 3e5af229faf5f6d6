use crate::config::SessionMode;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const STATE_VERSION: &str = "1.0";

/// The currently running dev server.
///
/// Unknown or missing fields fall back to defaults so older and newer
/// versions of the tool can read each other's files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    pub version: String,
    pub pid: u32,
    pub port: u16,
    pub db_name: String,
    pub db_password: String,
    pub db_port: u16,
    pub secret_key: String,
    pub admin_password: String,
    pub mode: SessionMode,
    pub log_file: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            pid: 0,
            port: crate::config::DEFAULT_PORT,
            db_name: String::new(),
            db_password: String::new(),
            db_port: crate::config::DEFAULT_DB_PORT,
            secret_key: String::new(),
            admin_password: String::new(),
            mode: SessionMode::Ephemeral,
            log_file: None,
            started_at: Utc::now(),
        }
    }
}

/// Secrets for reconnecting to a database without re-provisioning it.
///
/// Every field is optional on read. Timestamps that fail to parse (older
/// files wrote `""`) fall back to defaults instead of rejecting the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialEntry {
    pub password: String,
    pub secret_key: String,
    pub admin_password: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub saved_at: DateTime<Utc>,
    #[serde(deserialize_with = "lenient_optional_timestamp")]
    pub last_used: Option<DateTime<Utc>>,
}

impl Default for CredentialEntry {
    fn default() -> Self {
        Self::new(String::new(), String::new(), String::new())
    }
}

impl CredentialEntry {
    /// New entry stamped now, never used yet.
    pub fn new(password: String, secret_key: String, admin_password: String) -> Self {
        Self {
            password,
            secret_key,
            admin_password,
            saved_at: Utc::now(),
            last_used: None,
        }
    }
}

/// RFC 3339, or a naive ISO 8601 timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp).unwrap_or_else(Utc::now))
}

fn lenient_optional_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Whole credential document, ordered by name for stable diffs.
pub type CredentialMap = BTreeMap<String, CredentialEntry>;
