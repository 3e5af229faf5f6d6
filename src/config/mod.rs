//! Configuration types.
//!
//! - `session` - per-session settings (`DevConfig`, `SessionMode`) plus
//!   database name and secret generation
//! - `test_db` - the shared integration-test database (`TestDbConfig`)
//! - `parser` - optional `comradarr-dev.yaml` project file (`ProjectConfig`)

mod parser;
mod session;
mod test_db;

pub use parser::*;
pub use session::*;
pub use test_db::*;
