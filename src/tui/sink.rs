use crate::output::UserOutput;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Raw output of the dev server or a test run.
    Output,
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// [`UserOutput`] that feeds the log panel.
///
/// Orchestration runs in background tasks; everything they report arrives
/// here and is drained by the UI on each tick.
pub struct ChannelOutput {
    tx: mpsc::UnboundedSender<LogLine>,
    pending: Mutex<String>,
}

impl ChannelOutput {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LogLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                pending: Mutex::new(String::new()),
            },
            rx,
        )
    }

    fn send(&self, level: LogLevel, message: &str) {
        // The receiver only goes away when the UI is shutting down.
        let _ = self.tx.send(LogLine::new(level, message));
    }
}

impl UserOutput for ChannelOutput {
    fn status(&self, message: &str) {
        self.send(LogLevel::Info, message);
    }

    fn success(&self, message: &str) {
        self.send(LogLevel::Success, message);
    }

    fn warning(&self, message: &str) {
        self.send(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.send(LogLevel::Error, message);
    }

    fn progress(&self, message: &str) {
        self.pending.lock().push_str(message);
    }

    fn finish_progress(&self, result: &str) {
        let line = format!("{}{}", std::mem::take(&mut *self.pending.lock()), result);
        self.send(LogLevel::Info, &line);
    }

    fn blank(&self) {}

    fn line(&self, line: &str) {
        self.send(LogLevel::Output, line);
    }
}
