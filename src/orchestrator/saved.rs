//! Saved (persistent) databases and their credentials.

use super::SessionOrchestrator;
use crate::config::validate_db_name;
use crate::error::{Error, Result};
use crate::output::UserOutput;
use crate::probe::is_process_alive;
use crate::state::CredentialEntry;

/// One Credential Entry as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedDatabase {
    pub name: String,
    pub entry: CredentialEntry,
    /// PID of the live dev server using it.
    pub in_use_by: Option<u32>,
}

impl SessionOrchestrator {
    /// Saved databases in name order.
    pub fn saved_databases(&self) -> Vec<SavedDatabase> {
        let live = self
            .store
            .load_session()
            .filter(|record| is_process_alive(record.pid));
        self.store
            .list_all_credentials()
            .into_iter()
            .map(|(name, entry)| {
                let in_use_by = live
                    .as_ref()
                    .filter(|record| record.db_name == name)
                    .map(|record| record.pid);
                SavedDatabase {
                    name,
                    entry,
                    in_use_by,
                }
            })
            .collect()
    }

    /// Forget the credentials for `name`, optionally dropping the database
    /// and role too. Refused while a live dev server uses it.
    pub async fn forget_saved(
        &self,
        name: &str,
        drop_database: bool,
        out: &dyn UserOutput,
    ) -> Result<()> {
        validate_db_name(name)?;
        if let Some(record) = self.store.is_database_in_use(name) {
            return Err(Error::DatabaseInUse {
                name: name.to_string(),
                pid: record.pid,
            });
        }
        if self.store.peek_credential(name).is_none() {
            return Err(Error::MissingCredentials(name.to_string()));
        }

        if drop_database {
            out.status(&format!("Removing database '{}'...", name));
            self.drop_session_database(name, out).await;
        }
        self.store.remove_credential(name)?;
        out.success(&format!("Removed saved credentials for '{}'", name));
        Ok(())
    }
}
