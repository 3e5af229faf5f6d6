use super::session::{encode_password, generate_secret_key};

/// Shared database used by the integration test suite.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    pub user: String,
    pub password: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub secret_key: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            user: "comradarr_test".to_string(),
            password: "testpassword".to_string(),
            name: "comradarr_test".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            secret_key: generate_secret_key(),
        }
    }
}

impl TestDbConfig {
    /// Read `TEST_DB_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let port = match lookup("TEST_DB_PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!("Ignoring invalid TEST_DB_PORT '{}'", raw);
                defaults.port
            }),
            None => defaults.port,
        };

        Self {
            user: lookup("TEST_DB_USER").unwrap_or(defaults.user),
            password: lookup("TEST_DB_PASSWORD").unwrap_or(defaults.password),
            name: lookup("TEST_DB_NAME").unwrap_or(defaults.name),
            host: lookup("TEST_DB_HOST").unwrap_or(defaults.host),
            port,
            secret_key: defaults.secret_key,
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user,
            encode_password(&self.password),
            self.host,
            self.port,
            self.name
        )
    }

    /// `DATABASE_URL` and `SECRET_KEY` for migrations and the test suite.
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("DATABASE_URL".to_string(), self.database_url()),
            ("SECRET_KEY".to_string(), self.secret_key.clone()),
        ]
    }

    /// Shell `export` lines for `cr-dev db env`.
    pub fn export_lines(&self) -> Vec<String> {
        let pairs = [
            ("DATABASE_URL", self.database_url()),
            ("SECRET_KEY", self.secret_key.clone()),
            ("TEST_DB_USER", self.user.clone()),
            ("TEST_DB_PASSWORD", self.password.clone()),
            ("TEST_DB_NAME", self.name.clone()),
            ("TEST_DB_HOST", self.host.clone()),
            ("TEST_DB_PORT", self.port.to_string()),
        ];
        pairs
            .iter()
            .map(|(k, v)| format!("export {}='{}'", k, v))
            .collect()
    }
}
