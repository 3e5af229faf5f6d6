//! Liveness probes over OS process and socket state.
//!
//! All probes are queries: none of them signal or otherwise disturb the
//! processes they look at. Termination lives in [`tree`].

mod tree;

pub use tree::{child_pids, kill_process_tree};

use crate::error::validate_pid_for_check;
use std::process::Command;
use std::time::{Duration, Instant};

/// Interval between `wait_for_port` checks.
pub const PORT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Whether `pid` names a live (non-zombie) process.
///
/// Sends the null signal, so the target is never affected. Unknown or
/// out-of-range PIDs report `false`.
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;

    let Some(nix_pid) = validate_pid_for_check(pid) else {
        return false;
    };

    let exists = match kill(nix_pid, None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(nix::errno::Errno::EPERM) => true, // exists, owned by someone else
        Err(_) => false,
    };

    exists && !is_zombie(pid)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // State is the first field after the parenthesised command name.
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            let close = stat.rfind(')')?;
            stat[close + 1..].split_whitespace().next().map(|s| s == "Z")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// First PID with a listening TCP socket on `port`.
pub fn find_process_on_port(port: u16) -> Option<u32> {
    find_with_lsof(port).or_else(|| find_with_ss(port))
}

fn find_with_lsof(port: u16) -> Option<u32> {
    let output = Command::new("lsof")
        .args(["-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_pid_lines(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(target_os = "linux")]
fn find_with_ss(port: u16) -> Option<u32> {
    let output = Command::new("ss")
        .args(["-tlnpH", &format!("sport = :{}", port)])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_ss_pid(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(not(target_os = "linux"))]
fn find_with_ss(_port: u16) -> Option<u32> {
    None
}

/// First numeric line of `lsof -t` / `pgrep` style output.
pub(crate) fn parse_pid_lines(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .next()
}

/// First `pid=N` in `ss -p` output.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_ss_pid(stdout: &str) -> Option<u32> {
    stdout.lines().find_map(|line| {
        line.split(|c| c == ',' || c == '(' || c == ')')
            .find_map(|part| part.strip_prefix("pid="))
            .and_then(|pid| pid.parse().ok())
    })
}

/// Whether something already listens on `port`.
///
/// A failed bind on either loopback or the wildcard address counts as in use
/// (on macOS binding 127.0.0.1 can succeed while 0.0.0.0 is taken), as does a
/// listener reported by `lsof`/`ss`.
pub fn is_port_in_use(port: u16) -> bool {
    let localhost_free = std::net::TcpListener::bind(("127.0.0.1", port)).is_ok();
    let any_free = std::net::TcpListener::bind(("0.0.0.0", port)).is_ok();
    if !(localhost_free && any_free) {
        return true;
    }
    find_process_on_port(port).is_some()
}

/// Poll until something listens on `port` or `timeout` elapses.
pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let claimed = tokio::task::spawn_blocking(move || is_port_in_use(port))
            .await
            .unwrap_or(false);
        if claimed {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn impossible_pids_are_dead() {
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
        assert!(!is_process_alive(i32::MAX as u32));
    }

    #[test]
    fn reaped_child_is_dead() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_process_alive(pid));
    }

    #[test]
    fn parses_lsof_output() {
        assert_eq!(parse_pid_lines("1234\n5678\n"), Some(1234));
        assert_eq!(parse_pid_lines("garbage\n42\n"), Some(42));
        assert_eq!(parse_pid_lines(""), None);
    }

    #[test]
    fn parses_ss_output() {
        let line = r#"LISTEN 0 511 127.0.0.1:5173 0.0.0.0:* users:(("node",pid=4242,fd=23))"#;
        assert_eq!(parse_ss_pid(line), Some(4242));
        assert_eq!(parse_ss_pid("LISTEN 0 511 127.0.0.1:5173 0.0.0.0:*"), None);
    }

    #[test]
    fn bound_listener_marks_port_in_use() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_in_use(port));
    }

    #[tokio::test]
    async fn wait_for_port_sees_existing_listener() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(wait_for_port(port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn wait_for_port_times_out_on_free_port() {
        let port = {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!wait_for_port(port, Duration::from_millis(100)).await);
    }
}
