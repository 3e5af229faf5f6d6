//! Session lifecycle: start, stop and status of the dev server and the
//! database it owns, plus test-database administration and the test runner.
//!
//! The orchestrator never prints. Every entry point takes a
//! [`UserOutput`](crate::output::UserOutput) sink and, where a decision is
//! needed, a [`Confirm`](crate::prompt::Confirm) capability.

mod orphans;
mod saved;
mod start;
mod stop;
mod suite;
mod test_db;

pub use saved::SavedDatabase;
pub use start::{PreparedSession, StartRequest};
pub use stop::{SessionStatus, StopOptions, StopOutcome, StopReport};
pub use suite::{SuiteOptions, SuiteOutcome, TestOutcome};
pub use test_db::EngineStatus;

use crate::config::Project;
use crate::error::{Error, Result};
use crate::output::UserOutput;
use crate::platform::{CommandRunner, DatabaseGateway};
use crate::state::StateStore;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for the engine after starting its service.
pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates the gateway, state store and external commands for one
/// project. Cheap to clone.
#[derive(Clone)]
pub struct SessionOrchestrator {
    gateway: Arc<dyn DatabaseGateway>,
    runner: Arc<dyn CommandRunner>,
    store: StateStore,
    project: Project,
}

impl SessionOrchestrator {
    pub fn new(
        gateway: Arc<dyn DatabaseGateway>,
        runner: Arc<dyn CommandRunner>,
        store: StateStore,
        project: Project,
    ) -> Self {
        Self {
            gateway,
            runner,
            store,
            project,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn DatabaseGateway> {
        &self.gateway
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Start the engine when it is not already accepting connections.
    pub async fn ensure_engine(&self, out: &dyn UserOutput) -> Result<()> {
        if self.gateway.is_engine_running().await {
            return Ok(());
        }
        out.status("Starting PostgreSQL...");
        self.gateway
            .start_engine()
            .await
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;
        if !self.gateway.wait_until_ready(ENGINE_READY_TIMEOUT).await {
            return Err(Error::EngineUnavailable(format!(
                "started but not accepting connections after {:?}",
                ENGINE_READY_TIMEOUT
            )));
        }
        out.success("PostgreSQL is running");
        Ok(())
    }

    /// Drop a session database (role shares the name). Failures are
    /// reported, not propagated.
    pub(crate) async fn drop_session_database(&self, name: &str, out: &dyn UserOutput) -> bool {
        match self.gateway.drop_database_and_user(name, name).await {
            Ok(()) => {
                out.success(&format!("Database '{}' removed", name));
                true
            }
            Err(e) => {
                tracing::warn!("Dropping {} failed: {}", name, e);
                out.warning(&format!("Could not remove database '{}': {}", name, e));
                false
            }
        }
    }
}
