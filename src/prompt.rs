use std::io::{stdin, stdout, BufRead, Write};

/// Capability to ask the user a yes/no question.
///
/// The CLI asks on the terminal; the TUI and tests answer with a fixed value.
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str, default: bool) -> bool;

    /// Whether a human is actually being asked.
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Asks on stdin when attached to a TTY, otherwise answers with the default.
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn tty() -> bool {
        use std::io::IsTerminal;
        if std::env::var_os("CR_DEV_NON_INTERACTIVE").is_some() {
            return false;
        }
        stdin().is_terminal() && stdout().is_terminal()
    }
}

impl Confirm for TerminalPrompt {
    fn confirm(&self, question: &str, default: bool) -> bool {
        if !Self::tty() {
            tracing::debug!("Non-interactive, answering '{}' with {}", question, default);
            return default;
        }

        let hint = if default { "[Y/n]" } else { "[y/N]" };
        print!("{} {} ", question, hint);
        stdout().flush().ok();

        let mut answer = String::new();
        if stdin().lock().read_line(&mut answer).is_err() {
            return default;
        }
        parse_answer(&answer).unwrap_or(default)
    }

    fn is_interactive(&self) -> bool {
        Self::tty()
    }
}

/// Always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

impl AutoConfirm {
    pub fn yes() -> Self {
        Self(true)
    }

    pub fn no() -> Self {
        Self(false)
    }
}

impl Confirm for AutoConfirm {
    fn confirm(&self, question: &str, _default: bool) -> bool {
        tracing::debug!("Auto-answering '{}' with {}", question, self.0);
        self.0
    }
}

/// `None` for empty or unrecognised input.
fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
