//! Reconciliation of databases left behind by sessions that never cleaned
//! up (crashes, killed terminals, lost state files).

use super::SessionOrchestrator;
use crate::error::Result;
use crate::output::UserOutput;

/// Short-lived helper borrowing the orchestrator for one sweep.
pub(super) struct OrphanSweeper<'a> {
    orchestrator: &'a SessionOrchestrator,
}

impl<'a> OrphanSweeper<'a> {
    pub fn new(orchestrator: &'a SessionOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Generated-name databases with no saved credentials and no live
    /// session using them.
    pub async fn find(&self) -> Result<Vec<String>> {
        let store = &self.orchestrator.store;
        let prefix = &self.orchestrator.project.config.db_prefix;
        let candidates = self.orchestrator.gateway.list_databases(prefix).await?;
        let saved = store.list_all_credentials();

        Ok(candidates
            .into_iter()
            .filter(|name| {
                if saved.contains_key(name) {
                    tracing::debug!("Skipping {}: has saved credentials", name);
                    return false;
                }
                if let Some(record) = store.is_database_in_use(name) {
                    tracing::debug!("Skipping {}: in use by PID {}", name, record.pid);
                    return false;
                }
                true
            })
            .collect())
    }

    /// Drop every orphan found by [`find`](Self::find). Returns the names
    /// that were dropped.
    pub async fn sweep(&self, out: &dyn UserOutput) -> Result<Vec<String>> {
        out.status("Looking for orphaned dev databases...");
        let orphans = self.find().await?;
        if orphans.is_empty() {
            out.status("No orphaned databases found");
            return Ok(orphans);
        }

        out.status(&format!("Found {} orphaned database(s)", orphans.len()));
        let mut dropped = Vec::with_capacity(orphans.len());
        for name in orphans {
            out.status(&format!("Dropping {}...", name));
            if self.orchestrator.drop_session_database(&name, out).await {
                dropped.push(name);
            }
        }
        Ok(dropped)
    }
}

impl SessionOrchestrator {
    /// Orphaned generated-name databases, without touching them.
    pub async fn find_orphan_databases(&self) -> Result<Vec<String>> {
        OrphanSweeper::new(self).find().await
    }

    /// Drop orphaned generated-name databases.
    pub async fn sweep_orphan_databases(&self, out: &dyn UserOutput) -> Result<Vec<String>> {
        OrphanSweeper::new(self).sweep(out).await
    }
}
