use parking_lot::Mutex;
use std::io::Write;

/// Abstraction over user-facing output.
///
/// Orchestration code takes a `&dyn UserOutput` instead of calling
/// `println!`/`eprintln!`, so the same flow can print to a terminal, feed the
/// TUI log panel, or be captured in tests.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Reconnecting to database: mydb")
    fn status(&self, message: &str);

    /// Success message (e.g., "Migrations completed")
    fn success(&self, message: &str);

    /// Warning message (e.g., "Admin user may already exist")
    fn warning(&self, message: &str);

    /// Error message (e.g., "Failed to create user: ...")
    fn error(&self, message: &str);

    /// Inline progress (no trailing newline). Call `finish_progress` after.
    fn progress(&self, message: &str);

    /// Finish an inline progress line with a result.
    fn finish_progress(&self, result: &str);

    /// A blank line separator.
    fn blank(&self);

    /// A raw line of child process output.
    fn line(&self, line: &str) {
        self.status(line);
    }
}

/// Standard CLI output: writes to stdout/stderr with ANSI colors.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn progress(&self, message: &str) {
        print!("{}", message);
        std::io::stdout().flush().ok();
    }

    fn finish_progress(&self, result: &str) {
        println!("{}", result);
    }

    fn blank(&self) {
        println!();
    }

    fn line(&self, line: &str) {
        println!("{}", line);
    }
}

/// Suppresses all output.
pub struct QuietOutput;

impl UserOutput for QuietOutput {
    fn status(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn progress(&self, _message: &str) {}
    fn finish_progress(&self, _result: &str) {}
    fn blank(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLevel {
    Status,
    Success,
    Warning,
    Error,
    Line,
}

/// Records every message with its level.
#[derive(Default)]
pub struct CollectingOutput {
    entries: Mutex<Vec<(OutputLevel, String)>>,
    pending: Mutex<String>,
}

impl CollectingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(OutputLevel, String)> {
        self.entries.lock().clone()
    }

    /// Messages at one level, in order.
    pub fn messages(&self, level: OutputLevel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Whether any message (at any level) contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|(_, m)| m.contains(needle))
    }

    fn push(&self, level: OutputLevel, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}

impl UserOutput for CollectingOutput {
    fn status(&self, message: &str) {
        self.push(OutputLevel::Status, message);
    }

    fn success(&self, message: &str) {
        self.push(OutputLevel::Success, message);
    }

    fn warning(&self, message: &str) {
        self.push(OutputLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(OutputLevel::Error, message);
    }

    fn progress(&self, message: &str) {
        self.pending.lock().push_str(message);
    }

    fn finish_progress(&self, result: &str) {
        let prefix = std::mem::take(&mut *self.pending.lock());
        self.push(OutputLevel::Status, &format!("{}{}", prefix, result));
    }

    fn blank(&self) {}

    fn line(&self, line: &str) {
        self.push(OutputLevel::Line, line);
    }
}
