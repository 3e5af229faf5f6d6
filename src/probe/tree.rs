use super::{is_process_alive, parse_pid_lines};
use crate::error::{validate_pid, Result};
use nix::sys::signal::{self, Signal};
use std::process::Command;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Direct children of `pid`, via `pgrep -P`.
pub fn child_pids(pid: u32) -> Vec<u32> {
    let output = match Command::new("pgrep").args(["-P", &pid.to_string()]).output() {
        Ok(o) => o,
        Err(e) => {
            tracing::debug!("pgrep unavailable: {}", e);
            return Vec::new();
        }
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| parse_pid_lines(line))
        .collect()
}

/// Every descendant of `pid`, parents before children.
fn descendants(pid: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![pid];
    while let Some(parent) = frontier.pop() {
        for child in child_pids(parent) {
            if child != pid && !found.contains(&child) {
                found.push(child);
                frontier.push(child);
            }
        }
    }
    found
}

/// Terminate `pid` and everything it spawned.
///
/// Sends SIGTERM to the root, waits up to `timeout` for the whole tree to
/// exit, then SIGKILLs any survivor, deepest descendants first. Descendants are
/// collected before signalling since they get reparented once the root dies.
///
/// Returns `Ok(true)` when nothing in the tree is left alive.
pub async fn kill_process_tree(pid: u32, timeout: Duration) -> Result<bool> {
    let root = validate_pid(pid)?;
    if !is_process_alive(pid) {
        return Ok(true);
    }

    let children = tokio::task::spawn_blocking(move || descendants(pid))
        .await
        .unwrap_or_default();

    tracing::debug!("Sending SIGTERM to {} ({} descendants)", pid, children.len());
    if let Err(e) = signal::kill(root, Signal::SIGTERM) {
        tracing::debug!("SIGTERM to {} failed: {}", pid, e);
    }

    let mut tree = vec![pid];
    tree.extend(children);

    // Children get the same grace period as the root to wind down.
    let deadline = Instant::now() + timeout;
    while tree.iter().any(|p| is_process_alive(*p)) && Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let survivors: Vec<u32> = tree.iter().copied().filter(|p| is_process_alive(*p)).collect();
    if survivors.is_empty() {
        return Ok(true);
    }

    tracing::warn!(
        "{} process(es) survived SIGTERM after {:?}, sending SIGKILL",
        survivors.len(),
        timeout
    );
    for survivor in survivors.iter().rev() {
        if let Ok(target) = validate_pid(*survivor) {
            let _ = signal::kill(target, Signal::SIGKILL);
        }
    }
    tokio::time::sleep(POLL_INTERVAL).await;

    Ok(tree.iter().all(|p| !is_process_alive(*p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    /// Spawn `script` under `sh` and reap it on a background thread.
    fn spawn_reaped(script: &str) -> u32 {
        let mut child = Command::new("sh")
            .args(["-c", script])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        pid
    }

    #[tokio::test]
    async fn dead_pid_is_already_done() {
        let pid = spawn_reaped("exit 0");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(kill_process_tree(pid, Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_init() {
        assert!(kill_process_tree(1, Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn terminates_cooperative_process() {
        let pid = spawn_reaped("sleep 30");
        assert!(kill_process_tree(pid, Duration::from_secs(5)).await.unwrap());
        assert!(!is_process_alive(pid));
    }

    #[tokio::test]
    async fn escalates_when_sigterm_is_ignored() {
        let pid = spawn_reaped("trap '' TERM; while true; do sleep 0.1; done");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let started = Instant::now();
        assert!(kill_process_tree(pid, Duration::from_millis(300)).await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!is_process_alive(pid));
    }

    #[tokio::test]
    async fn descendants_get_the_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let pid = spawn_reaped(&format!(
            "(sleep 1; touch '{}') & wait",
            marker.display()
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;
        let children = child_pids(pid);
        assert!(!children.is_empty());

        assert!(kill_process_tree(pid, Duration::from_secs(5)).await.unwrap());
        assert!(marker.exists(), "descendant was killed before it finished");
        for child in children {
            assert!(!is_process_alive(child));
        }
    }

    #[tokio::test]
    async fn kills_descendants() {
        let pid = spawn_reaped("sleep 30 & sleep 30 & wait");
        tokio::time::sleep(Duration::from_millis(300)).await;
        let children = child_pids(pid);
        assert!(kill_process_tree(pid, Duration::from_secs(2)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;
        for child in children {
            assert!(!is_process_alive(child), "descendant {} survived", child);
        }
    }
}
