use crate::cli::DevArgs;
use comradarr_dev::orchestrator::{SessionOrchestrator, StartRequest};
use comradarr_dev::output::UserOutput;
use comradarr_dev::probe::{kill_process_tree, wait_for_port};
use comradarr_dev::prompt::TerminalPrompt;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::signal::unix::{signal as unix_signal, SignalKind};

/// Grace period for stragglers after the stop timeout has passed.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long to watch for the server to claim its port.
const STARTUP_WAIT: Duration = Duration::from_secs(60);

/// Run the dev server in the foreground until it exits or we are told to
/// stop, then apply the session's cleanup policy.
pub async fn run_dev(
    orchestrator: &SessionOrchestrator,
    args: &DevArgs,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let request = StartRequest {
        persist: args.persist,
        db_name: args.db_name.clone(),
        reconnect: args.reconnect.clone(),
        admin_password: args.admin_password.clone(),
        port: args.port,
        db_port: args.db_port,
        skip_auth: args.skip_auth,
    };
    let session = orchestrator.prepare(request, &TerminalPrompt, out).await?;
    let mut record = session.record.clone();

    let (program, rest) = session
        .command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("dev_command is empty"))?;
    out.status(&format!("Starting: {}", session.command.join(" ")));

    let spawned = tokio::process::Command::new(program)
        .args(rest)
        .current_dir(&session.cwd)
        .envs(session.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            out.error(&format!("Failed to start dev server: {}", e));
            orchestrator.cleanup_after_exit(&record, out).await;
            return Err(e.into());
        }
    };

    if let Some(pid) = child.id() {
        record.pid = pid;
        if let Err(e) = orchestrator.store().update_session_pid(pid) {
            tracing::warn!("Failed to record dev server PID: {}", e);
        }
    }

    let mut sigterm = unix_signal(SignalKind::terminate())?;
    let listening = wait_for_port(record.port, STARTUP_WAIT);
    tokio::pin!(listening);
    let mut announced = false;
    let exited = loop {
        tokio::select! {
            status = child.wait() => break Some(status),
            _ = tokio::signal::ctrl_c() => break None,
            _ = sigterm.recv() => break None,
            up = &mut listening, if !announced => {
                announced = true;
                if up {
                    out.success(&format!("Dev server is listening on port {}", record.port));
                } else {
                    tracing::debug!("Port {} not claimed after {:?}", record.port, STARTUP_WAIT);
                }
            }
        }
    };

    match exited {
        Some(Ok(status)) if !status.success() => {
            out.warning(&format!("Dev server exited with {}", status));
        }
        Some(Ok(_)) => out.status("Dev server exited"),
        Some(Err(e)) => out.warning(&format!("Lost track of dev server: {}", e)),
        None => {
            out.blank();
            out.status("Shutting down dev server...");
            let timeout = orchestrator.project().config.stop_timeout();
            shutdown_child(&mut child, timeout).await;
        }
    }

    // `cr-dev stop` from another terminal already removed the record and
    // cleaned up; don't do it twice.
    let still_ours = orchestrator
        .store()
        .load_session()
        .is_some_and(|current| current.pid == record.pid);
    if still_ours {
        orchestrator.cleanup_after_exit(&record, out).await;
    } else {
        tracing::debug!("Session record gone, cleanup already handled elsewhere");
    }
    Ok(())
}

/// SIGTERM, wait up to `timeout`, then SIGKILL the whole tree.
async fn shutdown_child(child: &mut tokio::process::Child, timeout: Duration) {
    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::debug!("SIGTERM to {} failed: {}", pid, e);
    }
    if tokio::time::timeout(timeout, child.wait()).await.is_ok() {
        return;
    }

    tracing::warn!("Dev server {} ignored SIGTERM for {:?}, killing it", pid, timeout);
    if let Err(e) = kill_process_tree(pid, Duration::ZERO).await {
        tracing::debug!("Killing process tree {} failed: {}", pid, e);
    }
    let _ = child.start_kill();
    let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
}
