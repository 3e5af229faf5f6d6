mod db;
mod dev;
mod saved;
mod stop;
mod tui;

pub use db::{run_db, run_db_env};
pub use dev::run_dev;
pub use saved::{run_saved_delete, run_saved_list};
pub use stop::run_stop;
pub use test::run_test;
pub use tui::run_tui;
