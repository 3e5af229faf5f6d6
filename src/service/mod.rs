//! Background process supervision for the TUI dev server.

mod log_capture;
mod supervisor;

pub use log_capture::{LogBuffer, DEFAULT_MAX_LOG_LINES};
pub use supervisor::{CleanupFn, Supervisor, SupervisorState, READER_JOIN_TIMEOUT};
