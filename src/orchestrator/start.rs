use super::SessionOrchestrator;
use crate::config::{generate_db_name, validate_db_name, DevConfig, SessionMode};
use crate::error::{Error, Result};
use crate::output::UserOutput;
use crate::platform::CommandSpec;
use crate::probe::{find_process_on_port, is_port_in_use};
use crate::prompt::Confirm;
use crate::state::{CredentialEntry, SessionRecord};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Lines of tool stderr echoed to the user when a step fails.
const FAILURE_TAIL_LINES: usize = 20;

/// What the caller asked for when starting a session.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub persist: bool,
    pub db_name: Option<String>,
    pub reconnect: Option<String>,
    pub admin_password: Option<String>,
    /// Defaults to the project's `default_port`.
    pub port: Option<u16>,
    /// Defaults to the project's `db_port`.
    pub db_port: Option<u16>,
    pub skip_auth: bool,
}

/// A provisioned session, ready to spawn.
#[derive(Debug, Clone)]
pub struct PreparedSession {
    pub config: DevConfig,
    pub record: SessionRecord,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

impl PreparedSession {
    pub fn db_name(&self) -> &str {
        &self.record.db_name
    }

    pub fn mode(&self) -> SessionMode {
        self.record.mode
    }
}

struct Resolved {
    name: String,
    mode: SessionMode,
    saved_at: Option<DateTime<Utc>>,
}

impl SessionOrchestrator {
    /// Run the start sequence up to (not including) spawning the server.
    ///
    /// On success the Session Record is saved with this process's PID; the
    /// caller back-fills the server PID with
    /// [`StateStore::update_session_pid`](crate::state::StateStore::update_session_pid).
    pub async fn prepare(
        &self,
        request: StartRequest,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
    ) -> Result<PreparedSession> {
        if request.reconnect.is_some() && request.db_name.is_some() {
            return Err(Error::Config(
                "--reconnect and --db-name cannot be combined".to_string(),
            ));
        }
        let settings = &self.project.config;
        let port = request.port.unwrap_or(settings.default_port);
        let db_port = request.db_port.unwrap_or(settings.db_port);

        self.ensure_engine(out).await?;
        self.ensure_port_free(port).await?;

        let mut config = DevConfig::new(port, db_port);
        config.skip_auth = request.skip_auth;
        if let Some(password) = request.admin_password.clone() {
            config.admin_password = password;
        }

        let resolved = self.resolve_mode(&request, &mut config, confirm, out)?;
        config.db_name = Some(resolved.name.clone());
        config.mode = resolved.mode;

        if resolved.mode != SessionMode::Reconnect {
            self.provision(&config, &resolved.name, out).await?;
        }

        if config.mode.keeps_credentials() {
            let mut entry = CredentialEntry::new(
                config.db_password.clone(),
                config.secret_key.clone(),
                config.admin_password.clone(),
            );
            if let Some(saved_at) = resolved.saved_at {
                entry.saved_at = saved_at;
                entry.last_used = Some(Utc::now());
            }
            self.store.save_credential(&resolved.name, entry)?;
        }

        let record = SessionRecord {
            pid: std::process::id(),
            port,
            db_name: resolved.name.clone(),
            db_password: config.db_password.clone(),
            db_port,
            secret_key: config.secret_key.clone(),
            admin_password: config.admin_password.clone(),
            mode: config.mode,
            ..SessionRecord::default()
        };
        self.store.save_session(&record)?;

        let mut command = settings.dev_command.clone();
        command.extend(["--port".to_string(), port.to_string()]);
        let env = config.launch_env()?;

        print_banner(&config, &resolved.name, out);

        Ok(PreparedSession {
            config,
            record,
            command,
            env,
            cwd: self.project.root.clone(),
        })
    }

    /// Remove the Session Record and apply the mode's cleanup policy once
    /// the server process has exited.
    pub async fn cleanup_after_exit(&self, record: &SessionRecord, out: &dyn UserOutput) {
        if let Err(e) = self.store.remove_session() {
            tracing::warn!("Failed to remove session record: {}", e);
        }
        if record.db_name.is_empty() {
            return;
        }
        match record.mode {
            SessionMode::Ephemeral => {
                out.status("Cleaning up ephemeral database...");
                self.drop_session_database(&record.db_name, out).await;
            }
            SessionMode::Persistent | SessionMode::Reconnect => {
                out.status(&format!("Database '{}' preserved", record.db_name));
            }
        }
    }

    async fn ensure_port_free(&self, port: u16) -> Result<()> {
        let in_use = tokio::task::spawn_blocking(move || {
            is_port_in_use(port).then(|| find_process_on_port(port))
        })
        .await
        .map_err(|e| Error::Process(format!("port probe failed: {}", e)))?;
        match in_use {
            Some(pid) => Err(Error::PortInUse { port, pid }),
            None => Ok(()),
        }
    }

    fn resolve_mode(
        &self,
        request: &StartRequest,
        config: &mut DevConfig,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
    ) -> Result<Resolved> {
        if let Some(name) = &request.reconnect {
            validate_db_name(name)?;
            let creds = self
                .store
                .load_credential(name)
                .ok_or_else(|| Error::MissingCredentials(name.clone()))?;
            apply_credentials(config, &creds);
            out.status(&format!("Reconnecting to database: {}", name));
            return Ok(Resolved {
                name: name.clone(),
                mode: SessionMode::Reconnect,
                saved_at: Some(creds.saved_at),
            });
        }

        let persistent_or_ephemeral = if request.persist {
            SessionMode::Persistent
        } else {
            SessionMode::Ephemeral
        };

        if let Some(name) = &request.db_name {
            validate_db_name(name)?;
            if self.store.peek_credential(name).is_some() {
                let question = format!("Database '{}' already exists. Reconnect?", name);
                if !confirm.confirm(&question, true) {
                    return Err(Error::Aborted);
                }
                let creds = self
                    .store
                    .load_credential(name)
                    .ok_or_else(|| Error::MissingCredentials(name.clone()))?;
                apply_credentials(config, &creds);
                out.status(&format!("Reconnecting to database: {}", name));
                return Ok(Resolved {
                    name: name.clone(),
                    mode: SessionMode::Reconnect,
                    saved_at: Some(creds.saved_at),
                });
            }
            return Ok(Resolved {
                name: name.clone(),
                mode: persistent_or_ephemeral,
                saved_at: None,
            });
        }

        Ok(Resolved {
            name: generate_db_name(&self.project.config.db_prefix),
            mode: persistent_or_ephemeral,
            saved_at: None,
        })
    }

    /// Create role and database, migrate, seed. Rolls back a freshly created
    /// non-persistent database when migrations fail.
    async fn provision(&self, config: &DevConfig, name: &str, out: &dyn UserOutput) -> Result<()> {
        let label = match config.mode {
            SessionMode::Ephemeral => "ephemeral database",
            _ => "database",
        };
        out.status(&format!("Creating {} '{}'...", label, name));
        let provisioned = self
            .gateway
            .ensure_user_and_database(name, name, &config.db_password)
            .await?;
        if provisioned.database_created {
            out.success(&format!("Database '{}' created", name));
        } else {
            out.status(&format!("Database '{}' already exists, reusing it", name));
        }

        out.status("Running migrations...");
        if let Err(e) = self.run_migrations(config, out).await {
            out.error("Failed to run migrations");
            if provisioned.database_created && config.mode != SessionMode::Persistent {
                out.status(&format!("Rolling back database '{}'...", name));
                self.drop_session_database(name, out).await;
            }
            return Err(e);
        }
        out.success("Migrations completed");

        out.status("Creating admin user...");
        if self.seed_admin(config).await {
            out.success("Admin user created");
        } else {
            out.warning("Admin user may already exist");
        }
        Ok(())
    }

    async fn run_migrations(&self, config: &DevConfig, out: &dyn UserOutput) -> Result<()> {
        let settings = &self.project.config;
        let spec = CommandSpec::from_argv(&settings.migrate_command)?
            .cwd(&self.project.root)
            .env("DATABASE_URL", config.database_url()?)
            .env("SECRET_KEY", config.secret_key.clone())
            .timeout(settings.migration_timeout());

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| Error::MigrationFailed(e.to_string()))?;
        if output.success() {
            return Ok(());
        }

        let detail = if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        let lines: Vec<&str> = detail.lines().collect();
        for line in &lines[lines.len().saturating_sub(FAILURE_TAIL_LINES)..] {
            out.line(line);
        }
        Err(Error::MigrationFailed(match output.status {
            Some(code) => format!("'{}' exited with code {}", spec.display(), code),
            None => format!("'{}' was terminated by a signal", spec.display()),
        }))
    }

    /// Non-fatal: the admin user usually exists already on reuse.
    async fn seed_admin(&self, config: &DevConfig) -> bool {
        let spec = match (
            CommandSpec::from_argv(&self.project.config.seed_command),
            config.database_url(),
        ) {
            (Ok(spec), Ok(url)) => spec
                .cwd(&self.project.root)
                .env("DATABASE_URL", url)
                .env("SECRET_KEY", config.secret_key.clone())
                .env("ADMIN_PASSWORD", config.admin_password.clone()),
            _ => return false,
        };
        match self.runner.run(&spec).await {
            Ok(output) => output.success(),
            Err(e) => {
                tracing::debug!("Seed command failed to run: {}", e);
                false
            }
        }
    }
}

fn apply_credentials(config: &mut DevConfig, creds: &CredentialEntry) {
    config.db_password = creds.password.clone();
    config.secret_key = creds.secret_key.clone();
    config.admin_password = creds.admin_password.clone();
}

const RULE: &str = "═══════════════════════════════════════════════════════════════";

fn print_banner(config: &DevConfig, name: &str, out: &dyn UserOutput) {
    out.blank();
    out.success(RULE);
    out.success("   Comradarr Dev Server");
    out.success(RULE);
    out.blank();
    out.status(&format!("  URL:          http://localhost:{}", config.port));
    out.status(&format!("  Database:     {} ({})", name, config.mode));
    out.status("  Admin User:   admin");
    out.status(&format!("  Admin Pass:   {}", config.admin_password));
    if config.skip_auth {
        out.warning("  Auth:         BYPASSED (--skip-auth)");
    }
    out.blank();
}
