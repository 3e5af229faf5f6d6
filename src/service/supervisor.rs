use super::log_capture::LogBuffer;
use crate::error::{validate_pid, Error, Result};
use crate::probe::is_process_alive;
use crate::state::StateStore;
use chrono::{DateTime, Utc};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::{self, killpg, Signal};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Upper bound on waiting for the output reader during `stop`.
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Invoked once after the supervised child has died.
pub type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Stopping,
}

/// Runs the cleanup callback and clears the session record, once per child.
struct Finisher {
    cleanup: Mutex<Option<CleanupFn>>,
    done: AtomicBool,
    stopping: AtomicBool,
    store: Option<StateStore>,
}

impl Finisher {
    fn finish(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cleanup) = self.cleanup.lock().take() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(cleanup)).is_err() {
                tracing::error!("Dev server cleanup callback panicked");
            }
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_session() {
                tracing::warn!("Failed to remove session record: {}", e);
            }
        }
    }
}

struct Inner {
    state: SupervisorState,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    reader_done: Option<mpsc::Receiver<()>>,
    finisher: Option<Arc<Finisher>>,
    started_at: Option<DateTime<Utc>>,
}

/// Owns one background child process and its captured output.
///
/// stdout and stderr share one pipe so lines keep the order the child wrote
/// them in. The child runs in its own process group, which is what `stop`
/// signals.
pub struct Supervisor {
    inner: Mutex<Inner>,
    logs: LogBuffer,
    store: Option<StateStore>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SupervisorState::Idle,
                child: None,
                reader: None,
                reader_done: None,
                finisher: None,
                started_at: None,
            }),
            logs: LogBuffer::new(),
            store: None,
        }
    }

    /// Remove the Session Record from `store` whenever the child dies.
    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// Take all output captured since the last drain.
    pub fn drain_output(&self) -> Vec<String> {
        self.logs.drain()
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.lock().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().child.as_ref().map(Child::id)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().started_at
    }

    /// Spawn `command` unless a child is already running.
    ///
    /// Returns `Ok(false)`, leaving the current child untouched, when
    /// already running.
    pub fn start(
        &self,
        command: &[String],
        cwd: &Path,
        env: &[(String, String)],
        cleanup: Option<CleanupFn>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.state != SupervisorState::Idle {
            return Ok(false);
        }
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("dev command must not be empty".to_string()))?;

        let (read_end, write_end) = output_pipe()?;
        let mut child = {
            // Dropped right after spawn so only the child holds the write end.
            let mut cmd = Command::new(program);
            cmd.args(args)
                .current_dir(cwd)
                .envs(env.iter().map(|(k, v)| (k, v)))
                .stdin(Stdio::null())
                .stdout(Stdio::from(write_end.try_clone()?))
                .stderr(Stdio::from(write_end))
                .process_group(0);
            cmd.spawn().map_err(|e| {
                Error::Process(format!("Failed to start '{}': {}", command.join(" "), e))
            })?
        };
        tracing::debug!("Started '{}' as PID {}", command.join(" "), child.id());

        let finisher = Arc::new(Finisher {
            cleanup: Mutex::new(cleanup),
            done: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            store: self.store.clone(),
        });

        let (done_tx, done_rx) = mpsc::channel();
        let child_pid = child.id();
        let logs = self.logs.clone();
        let reader_finisher = finisher.clone();
        let reader = std::thread::Builder::new()
            .name("cr-dev-output".to_string())
            .spawn(move || {
                for line in BufReader::new(read_end).split(b'\n') {
                    match line {
                        Ok(bytes) => {
                            let line = String::from_utf8_lossy(&bytes);
                            logs.push(line.trim_end_matches('\r'));
                        }
                        Err(_) => break,
                    }
                }
                // EOF only means the write end is closed; a child that
                // redirected its output is still running. Wait for it to die.
                while !reader_finisher.stopping.load(Ordering::SeqCst)
                    && !reader_finisher.done.load(Ordering::SeqCst)
                    && is_process_alive(child_pid)
                {
                    std::thread::sleep(EXIT_POLL_INTERVAL);
                }
                if !reader_finisher.stopping.load(Ordering::SeqCst) {
                    reader_finisher.finish();
                }
                let _ = done_tx.send(());
            });
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Process(format!("Failed to start output reader: {}", e)));
            }
        };

        inner.child = Some(child);
        inner.reader = Some(reader);
        inner.reader_done = Some(done_rx);
        inner.finisher = Some(finisher);
        inner.started_at = Some(Utc::now());
        inner.state = SupervisorState::Running;
        Ok(true)
    }

    /// Whether a child exists and has not exited.
    ///
    /// Observing an exit reaps the child, runs cleanup (once) and returns
    /// the supervisor to `Idle`.
    pub fn is_running(&self) -> bool {
        let finisher = {
            let mut inner = self.inner.lock();
            if inner.state != SupervisorState::Running {
                return false;
            }
            let exited = match inner.child.as_mut() {
                Some(child) => !matches!(child.try_wait(), Ok(None)),
                None => true,
            };
            if !exited {
                return true;
            }

            tracing::info!("Dev server exited");
            inner.child = None;
            inner.reader = None;
            inner.reader_done = None;
            inner.started_at = None;
            inner.state = SupervisorState::Idle;
            inner.finisher.take()
        };

        // Outside the lock: cleanup may call back into the supervisor.
        if let Some(finisher) = finisher {
            finisher.finish();
        }
        false
    }

    /// Terminate the child: SIGTERM to its process group, up to `timeout`
    /// for it to exit, then SIGKILL. Cleanup runs once the child is dead.
    ///
    /// A no-op when idle.
    pub fn stop(&self, timeout: Duration) {
        let (child, reader, reader_done, finisher) = {
            let mut inner = self.inner.lock();
            if inner.state != SupervisorState::Running {
                return;
            }
            inner.state = SupervisorState::Stopping;
            (
                inner.child.take(),
                inner.reader.take(),
                inner.reader_done.take(),
                inner.finisher.take(),
            )
        };

        if let Some(finisher) = &finisher {
            finisher.stopping.store(true, Ordering::SeqCst);
        }

        if let Some(mut child) = child {
            let raw_pid = child.id();
            if matches!(child.try_wait(), Ok(None)) {
                send_signal(raw_pid, Signal::SIGTERM);
            }

            if let (Some(reader), Some(done)) = (reader, reader_done) {
                match done.recv_timeout(READER_JOIN_TIMEOUT) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                        let _ = reader.join();
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        tracing::debug!("Output reader still busy, detaching it");
                    }
                }
            }

            let deadline = Instant::now() + timeout;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!("Dev server {} exited with {}", raw_pid, status);
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => {
                        std::thread::sleep(EXIT_POLL_INTERVAL);
                    }
                    _ => {
                        tracing::warn!(
                            "Dev server {} did not exit after SIGTERM ({:?}), sending SIGKILL",
                            raw_pid,
                            timeout
                        );
                        send_signal(raw_pid, Signal::SIGKILL);
                        let _ = child.wait();
                        break;
                    }
                }
            }
        }

        if let Some(finisher) = finisher {
            finisher.finish();
        }

        let mut inner = self.inner.lock();
        inner.started_at = None;
        inner.state = SupervisorState::Idle;
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Never leave the process group running behind us.
        let inner = self.inner.get_mut();
        if let Some(child) = inner.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                send_signal(child.id(), Signal::SIGKILL);
                let _ = child.wait();
            }
        }
    }
}

/// Signal the process group led by `raw_pid`, falling back to the process.
fn send_signal(raw_pid: u32, sig: Signal) {
    let Ok(pid) = validate_pid(raw_pid) else {
        tracing::warn!("Refusing to signal invalid PID {}", raw_pid);
        return;
    };
    if let Err(e) = killpg(pid, sig).or_else(|_| signal::kill(pid, sig)) {
        tracing::debug!("Failed to send {:?} to {}: {}", sig, raw_pid, e);
    }
}

/// Close-on-exec pipe; the child only sees the write end through its
/// stdout/stderr.
fn output_pipe() -> Result<(File, OwnedFd)> {
    let (read_end, write_end) = nix::unistd::pipe()
        .map_err(|e| Error::Process(format!("Failed to create output pipe: {}", e)))?;
    for fd in [&read_end, &write_end] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| Error::Process(format!("Failed to configure output pipe: {}", e)))?;
    }
    Ok((File::from(read_end), write_end))
}
