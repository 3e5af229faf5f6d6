//! Engine service control and the shared integration-test database.

use super::{SessionOrchestrator, ENGINE_READY_TIMEOUT};
use crate::config::TestDbConfig;
use crate::error::{Error, Result};
use crate::output::UserOutput;
use crate::platform::CommandSpec;
use crate::prompt::Confirm;

/// Snapshot for `db status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub psql_installed: bool,
    pub pg_isready_installed: bool,
    pub running: bool,
    /// `None` when the engine is not running.
    pub test_db_reachable: Option<bool>,
}

impl SessionOrchestrator {
    pub async fn engine_status(&self, test_db: &TestDbConfig) -> EngineStatus {
        let running = self.gateway.is_engine_running().await;
        let test_db_reachable = if running {
            Some(self.gateway.check_connection(test_db).await)
        } else {
            None
        };
        EngineStatus {
            psql_installed: self.runner.exists("psql"),
            pg_isready_installed: self.runner.exists("pg_isready"),
            running,
            test_db_reachable,
        }
    }

    pub async fn report_engine_status(&self, test_db: &TestDbConfig, out: &dyn UserOutput) {
        let status = self.engine_status(test_db).await;
        let tool = |name: &str, found: bool| {
            if found {
                out.success(&format!("  ✓ {}: installed", name));
            } else {
                out.error(&format!("  ✗ {}: not found", name));
            }
        };
        out.status("PostgreSQL Status");
        tool("psql", status.psql_installed);
        tool("pg_isready", status.pg_isready_installed);
        if status.running {
            out.success("  ✓ Service: running");
        } else {
            out.warning("  ○ Service: stopped");
        }

        out.blank();
        out.status("Test Database Configuration");
        out.status(&format!("  User: {}", test_db.user));
        out.status(&format!("  Database: {}", test_db.name));
        out.status(&format!("  Host: {}:{}", test_db.host, test_db.port));
        match status.test_db_reachable {
            Some(true) => out.success("  ✓ Connection: OK"),
            Some(false) => out.warning("  ○ Connection: database may not exist yet"),
            None => {}
        }
    }

    pub async fn engine_start(&self, out: &dyn UserOutput) -> Result<()> {
        if self.gateway.is_engine_running().await {
            out.status("PostgreSQL is already running");
            return Ok(());
        }
        out.status("Starting PostgreSQL service...");
        self.gateway.start_engine().await?;
        if self.gateway.wait_until_ready(ENGINE_READY_TIMEOUT).await {
            out.success("PostgreSQL is now running");
            Ok(())
        } else {
            out.error("PostgreSQL started but not responding");
            Err(Error::EngineUnavailable(
                "service started but not accepting connections".to_string(),
            ))
        }
    }

    pub async fn engine_stop(&self, out: &dyn UserOutput) -> Result<()> {
        if !self.gateway.is_engine_running().await {
            out.status("PostgreSQL is not running");
            return Ok(());
        }
        out.status("Stopping PostgreSQL service...");
        self.gateway.stop_engine().await?;
        out.success("PostgreSQL stopped");
        Ok(())
    }

    /// Install the engine if `psql` is missing, then optionally start it.
    pub async fn engine_install(&self, start: bool, out: &dyn UserOutput) -> Result<()> {
        if self.runner.exists("psql") {
            out.status("PostgreSQL already installed");
        } else {
            out.status("Installing PostgreSQL...");
            self.gateway.install_engine().await?;
            out.success("PostgreSQL installed successfully");
        }

        if !start {
            return Ok(());
        }
        if self.gateway.is_engine_running().await {
            out.status("PostgreSQL is already running");
            return Ok(());
        }
        out.status("Starting PostgreSQL service...");
        self.gateway.start_engine().await?;
        if self.gateway.wait_until_ready(ENGINE_READY_TIMEOUT).await {
            out.success("PostgreSQL is now running");
        } else {
            out.warning("PostgreSQL started but not responding yet");
        }
        Ok(())
    }

    /// Create the test role and database and migrate it.
    pub async fn setup_test_db(&self, test_db: &TestDbConfig, out: &dyn UserOutput) -> Result<()> {
        if !self.gateway.is_engine_running().await {
            out.error("PostgreSQL is not running. Start it first with: cr-dev db start");
            return Err(Error::EngineUnavailable("service is stopped".to_string()));
        }

        out.status(&format!(
            "Creating user '{}' and database '{}'...",
            test_db.user, test_db.name
        ));
        self.gateway
            .ensure_user_and_database(&test_db.name, &test_db.user, &test_db.password)
            .await?;
        out.success(&format!("Database '{}' ready", test_db.name));

        out.status("Running migrations...");
        let spec = CommandSpec::from_argv(&self.project.config.migrate_command)?
            .cwd(&self.project.root)
            .envs(test_db.env())
            .timeout(self.project.config.migration_timeout());
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| Error::MigrationFailed(e.to_string()))?;
        if !output.success() {
            out.error(&format!("Failed to run migrations: {}", output.stderr.trim()));
            return Err(Error::MigrationFailed(format!(
                "'{}' exited with {:?}",
                spec.display(),
                output.status
            )));
        }
        out.success("Migrations completed");
        out.success("Test database setup complete!");
        Ok(())
    }

    /// Drop the test database and role. Drop failures are warnings.
    pub async fn teardown_test_db(
        &self,
        test_db: &TestDbConfig,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
    ) -> Result<()> {
        self.guard_test_db_in_use(test_db, confirm, out)?;
        if !self.gateway.is_engine_running().await {
            out.error("PostgreSQL is not running");
            return Err(Error::EngineUnavailable("service is stopped".to_string()));
        }

        out.status(&format!(
            "Dropping database '{}' and user '{}'...",
            test_db.name, test_db.user
        ));
        match self
            .gateway
            .drop_database_and_user(&test_db.name, &test_db.user)
            .await
        {
            Ok(()) => out.success("Teardown complete"),
            Err(e) => out.warning(&format!("Could not drop test database: {}", e)),
        }
        Ok(())
    }

    pub async fn reset_test_db(
        &self,
        test_db: &TestDbConfig,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
    ) -> Result<()> {
        out.status("Resetting test database...");
        self.teardown_test_db(test_db, confirm, out).await?;
        self.setup_test_db(test_db, out).await
    }

    /// Refuse (or ask, when a human is present) if a live dev session uses
    /// the test database.
    fn guard_test_db_in_use(
        &self,
        test_db: &TestDbConfig,
        confirm: &dyn Confirm,
        out: &dyn UserOutput,
    ) -> Result<()> {
        let Some(record) = self.store.is_database_in_use(&test_db.name) else {
            return Ok(());
        };
        let in_use = Error::DatabaseInUse {
            name: test_db.name.clone(),
            pid: record.pid,
        };
        out.warning(&in_use.to_string());
        if confirm.confirm("Continue anyway?", false) {
            return Ok(());
        }
        out.status("Operation cancelled");
        Err(in_use)
    }
}
