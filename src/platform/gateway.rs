use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use super::Platform;
use crate::config::{validate_db_name, TestDbConfig, DEFAULT_DB_PORT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

const ADMIN_DATABASE: &str = "postgres";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of [`DatabaseGateway::ensure_user_and_database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    /// False when the database already existed.
    pub database_created: bool,
}

/// Everything the orchestrator needs from the database engine.
///
/// Create and drop operations are idempotent: ensuring an existing role or
/// database succeeds, and dropping a missing one succeeds.
#[async_trait]
pub trait DatabaseGateway: Send + Sync {
    async fn is_engine_running(&self) -> bool;

    async fn start_engine(&self) -> Result<()>;

    async fn stop_engine(&self) -> Result<()>;

    async fn install_engine(&self) -> Result<()>;

    /// Poll `is_engine_running` until it succeeds or `timeout` passes.
    async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_engine_running().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Create or update `role` with `password`, create `database` owned by it
    /// if absent, and grant it full privileges.
    async fn ensure_user_and_database(
        &self,
        database: &str,
        role: &str,
        password: &str,
    ) -> Result<Provisioned>;

    /// Terminate connections, then drop `database` and `role`.
    async fn drop_database_and_user(&self, database: &str, role: &str) -> Result<()>;

    /// Best effort; callers log and continue on failure.
    async fn terminate_connections(&self, database: &str) -> Result<()>;

    async fn database_exists(&self, database: &str) -> Result<bool>;

    /// Databases named `<prefix>_...`.
    async fn list_databases(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether the test credentials can log in over TCP.
    async fn check_connection(&self, test_db: &TestDbConfig) -> bool;
}

/// [`DatabaseGateway`] driving `psql`, `pg_isready` and the host's service
/// manager.
pub struct PostgresGateway {
    platform: Platform,
    host: String,
    port: u16,
    runner: Arc<dyn CommandRunner>,
}

impl PostgresGateway {
    pub fn new(platform: Platform, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            platform,
            host: "localhost".to_string(),
            port: DEFAULT_DB_PORT,
            runner,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// `psql` connected to `database` with the engine's superuser rights.
    ///
    /// macOS (Homebrew) lets the current user in directly; Linux goes through
    /// the `postgres` service account without prompting for a password.
    fn psql(&self, database: &str) -> Result<CommandSpec> {
        let spec = match &self.platform {
            Platform::MacOs { .. } => CommandSpec::new("psql")
                .args(["-h", &self.host])
                .args(["-p", &self.port.to_string()]),
            Platform::Linux { .. } => CommandSpec::new("sudo")
                .args(["-n", "-u", "postgres", "psql"])
                .args(["-p", &self.port.to_string()]),
            Platform::Unsupported(os) => return Err(Error::UnsupportedPlatform(os.clone())),
        };
        Ok(spec.args(["-v", "ON_ERROR_STOP=1", "-d", database]))
    }

    async fn sql(&self, database: &str, sql: &str) -> Result<CommandOutput> {
        let spec = self.psql(database)?.args(["-c", sql]);
        self.runner.run(&spec).await?.check("psql")
    }

    /// Tuples-only, unaligned query output.
    async fn query(&self, database: &str, sql: &str) -> Result<String> {
        let spec = self.psql(database)?.args(["-tAc", sql]);
        let output = self.runner.run(&spec).await?.check("psql")?;
        Ok(output.stdout)
    }

    /// Run a service-control command, mapping failure to `ExternalTool`.
    async fn control(&self, program: &str, args: &[&str]) -> Result<()> {
        let spec = CommandSpec::new(program).args(args.iter().copied());
        self.runner.run(&spec).await?.check(program)?;
        Ok(())
    }

    fn service_args<'a>(&self, systemd: bool, action: &'a str) -> Vec<&'a str> {
        if systemd {
            vec!["systemctl", action, "postgresql"]
        } else {
            vec!["service", "postgresql", action]
        }
    }
}

fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Double-quoted identifier, so mixed-case names keep their case and match
/// the `rolname`/`datname` comparisons.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl DatabaseGateway for PostgresGateway {
    async fn is_engine_running(&self) -> bool {
        let mut spec = CommandSpec::new("pg_isready").args(["-q", "-p", &self.port.to_string()]);
        if matches!(self.platform, Platform::MacOs { .. }) {
            spec = spec.args(["-h", &self.host]);
        }
        match self.runner.run(&spec).await {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::debug!("pg_isready unavailable: {}", e);
                false
            }
        }
    }

    async fn start_engine(&self) -> Result<()> {
        match &self.platform {
            Platform::MacOs { .. } => {
                let formula = self.platform.brew_formula().unwrap_or_default();
                self.control("brew", &["services", "start", formula]).await
            }
            Platform::Linux { systemd, .. } => {
                self.control("sudo", &self.service_args(*systemd, "start")).await
            }
            Platform::Unsupported(os) => Err(Error::UnsupportedPlatform(os.clone())),
        }
    }

    async fn stop_engine(&self) -> Result<()> {
        match &self.platform {
            Platform::MacOs { .. } => {
                let formula = self.platform.brew_formula().unwrap_or_default();
                self.control("brew", &["services", "stop", formula]).await
            }
            Platform::Linux { systemd, .. } => {
                self.control("sudo", &self.service_args(*systemd, "stop")).await
            }
            Platform::Unsupported(os) => Err(Error::UnsupportedPlatform(os.clone())),
        }
    }

    async fn install_engine(&self) -> Result<()> {
        match &self.platform {
            Platform::MacOs { .. } => {
                if !self.runner.exists("brew") {
                    return Err(Error::Process(
                        "Homebrew is required: https://brew.sh".to_string(),
                    ));
                }
                let formula = self.platform.brew_formula().unwrap_or_default();
                self.control("brew", &["install", formula]).await
            }
            Platform::Linux { debian, .. } => {
                if !debian && !self.runner.exists("apt-get") {
                    return Err(Error::UnsupportedPlatform(
                        "Linux without apt-get; install PostgreSQL with your package manager"
                            .to_string(),
                    ));
                }
                self.control(
                    "sudo",
                    &["apt-get", "install", "-y", "postgresql", "postgresql-contrib"],
                )
                .await
            }
            Platform::Unsupported(os) => Err(Error::UnsupportedPlatform(os.clone())),
        }
    }

    async fn ensure_user_and_database(
        &self,
        database: &str,
        role: &str,
        password: &str,
    ) -> Result<Provisioned> {
        validate_db_name(database)?;
        validate_db_name(role)?;
        let password = quote_literal(password);
        let role_name = role;
        let role = quote_ident(role_name);

        let role_sql = format!(
            "DO $$\nBEGIN\n  IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{role_name}') THEN\n    CREATE ROLE {role} WITH LOGIN PASSWORD '{password}';\n  ELSE\n    ALTER ROLE {role} WITH LOGIN PASSWORD '{password}';\n  END IF;\nEND\n$$;"
        );
        self.sql(ADMIN_DATABASE, &role_sql).await?;

        let database_created = if self.database_exists(database).await? {
            tracing::debug!("Database {} already exists", database);
            false
        } else {
            self.sql(
                ADMIN_DATABASE,
                &format!("CREATE DATABASE {} OWNER {}", quote_ident(database), role),
            )
            .await?;
            true
        };

        let grant_sql = format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {role}; GRANT ALL ON SCHEMA public TO {role};",
            quote_ident(database)
        );
        if let Err(e) = self.sql(database, &grant_sql).await {
            tracing::warn!("Granting privileges on {} failed: {}", database, e);
        }

        Ok(Provisioned { database_created })
    }

    async fn drop_database_and_user(&self, database: &str, role: &str) -> Result<()> {
        validate_db_name(database)?;
        validate_db_name(role)?;

        if let Err(e) = self.terminate_connections(database).await {
            tracing::warn!("Could not terminate connections to {}: {}", database, e);
        }
        self.sql(
            ADMIN_DATABASE,
            &format!("DROP DATABASE IF EXISTS {}", quote_ident(database)),
        )
        .await?;
        self.sql(ADMIN_DATABASE, &format!("DROP ROLE IF EXISTS {}", quote_ident(role)))
            .await?;
        Ok(())
    }

    async fn terminate_connections(&self, database: &str) -> Result<()> {
        validate_db_name(database)?;
        let sql = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{}' AND pid <> pg_backend_pid()",
            database
        );
        self.sql(ADMIN_DATABASE, &sql).await?;
        Ok(())
    }

    async fn database_exists(&self, database: &str) -> Result<bool> {
        validate_db_name(database)?;
        let out = self
            .query(
                ADMIN_DATABASE,
                &format!("SELECT 1 FROM pg_database WHERE datname = '{}'", database),
            )
            .await?;
        Ok(out.trim() == "1")
    }

    async fn list_databases(&self, prefix: &str) -> Result<Vec<String>> {
        validate_db_name(prefix)?;
        let out = self
            .query(
                ADMIN_DATABASE,
                &format!(
                    "SELECT datname FROM pg_database WHERE datname LIKE '{}_%' ORDER BY datname",
                    prefix
                ),
            )
            .await?;
        // LIKE treats `_` as a wildcard; filter on the literal prefix.
        let literal = format!("{}_", prefix);
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(&literal))
            .map(String::from)
            .collect())
    }

    async fn check_connection(&self, test_db: &TestDbConfig) -> bool {
        let spec = CommandSpec::new("psql")
            .args(["-h", &test_db.host])
            .args(["-p", &test_db.port.to_string()])
            .args(["-U", &test_db.user])
            .args(["-d", &test_db.name])
            .args(["-c", "SELECT 1"])
            .env("PGPASSWORD", test_db.password.clone())
            .timeout(Duration::from_secs(10));
        matches!(self.runner.run(&spec).await, Ok(output) if output.success())
    }
}
