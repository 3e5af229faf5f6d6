use crate::error::{Error, Result};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

pub const DEFAULT_PORT: u16 = 5173;
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_PREFIX: &str = "comradarr_dev";
pub const MAX_DB_NAME_LENGTH: usize = 63;

/// Cleanup policy of a dev session, fixed when the session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Database dropped on clean stop, never has a credential entry.
    #[default]
    Ephemeral,
    /// Database and credentials survive stop.
    Persistent,
    /// Resumed from saved credentials; provisioning and migrations skipped.
    Reconnect,
}

impl SessionMode {
    /// Whether a credential entry must exist for this mode.
    pub fn keeps_credentials(&self) -> bool {
        matches!(self, SessionMode::Persistent | SessionMode::Reconnect)
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Ephemeral => write!(f, "ephemeral"),
            SessionMode::Persistent => write!(f, "persistent"),
            SessionMode::Reconnect => write!(f, "reconnect"),
        }
    }
}

/// Identity and secrets of one dev session.
#[derive(Debug, Clone)]
pub struct DevConfig {
    pub port: u16,
    pub db_port: u16,
    pub db_name: Option<String>,
    pub db_password: String,
    pub admin_password: String,
    pub secret_key: String,
    pub mode: SessionMode,
    pub skip_auth: bool,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, DEFAULT_DB_PORT)
    }
}

impl DevConfig {
    /// Fresh config with newly generated secrets.
    pub fn new(port: u16, db_port: u16) -> Self {
        Self {
            port,
            db_port,
            db_name: None,
            db_password: generate_password(),
            admin_password: generate_password(),
            secret_key: generate_secret_key(),
            mode: SessionMode::Ephemeral,
            skip_auth: false,
        }
    }

    /// Connection string for the session database; the role shares its name.
    pub fn database_url(&self) -> Result<String> {
        let name = self
            .db_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Config("db_name is required for database_url".to_string()))?;
        Ok(format!(
            "postgres://{}:{}@localhost:{}/{}",
            name,
            encode_password(&self.db_password),
            self.db_port,
            name
        ))
    }

    /// Environment for the migration tool, seed script and dev server.
    pub fn launch_env(&self) -> Result<Vec<(String, String)>> {
        let mut env = vec![
            ("DATABASE_URL".to_string(), self.database_url()?),
            ("SECRET_KEY".to_string(), self.secret_key.clone()),
        ];
        if self.skip_auth {
            env.push(("AUTH_MODE".to_string(), "local_bypass".to_string()));
        }
        Ok(env)
    }
}

pub(crate) fn encode_password(password: &str) -> String {
    url::form_urlencoded::byte_serialize(password.as_bytes()).collect()
}

static DB_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn db_name_pattern() -> &'static Regex {
    DB_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex pattern is valid")
    })
}

/// Accepts SQL identifiers usable unquoted as both role and database name.
pub fn validate_db_name(name: &str) -> Result<()> {
    if name.len() > MAX_DB_NAME_LENGTH || !db_name_pattern().is_match(name) {
        return Err(Error::InvalidDatabaseName(name.to_string()));
    }
    Ok(())
}

/// `<prefix>_<8 hex chars>`
pub fn generate_db_name(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}_{:08x}", prefix, suffix)
}

/// 64 lowercase hex characters (32 random bytes).
pub fn generate_secret_key() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 32 random alphanumeric characters.
pub fn generate_password() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
