//! Interactive dashboard: engine and test-database controls, a supervised
//! dev server, test runs and saved databases, with one scrollback panel for
//! everything they print.

use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::MissedTickBehavior;

pub mod app;
pub mod sink;
pub mod ui;

use crate::config::TestDbConfig;
use crate::orchestrator::SessionOrchestrator;
use app::{App, StatusLevel};

/// Redraw cadence. Each tick also collects finished tasks and dev-server
/// output.
const TICK: Duration = Duration::from_millis(250);

/// Run the TUI until the user quits. A dev server started from the
/// dashboard is stopped (and cleaned up) before returning.
pub async fn run(orchestrator: SessionOrchestrator, test_db: TestDbConfig) -> anyhow::Result<()> {
    // Restore the terminal before the default hook prints the panic.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(orchestrator, test_db);
    if let Ok(size) = terminal.size() {
        app.on_resize(size.width, size.height);
    }
    let result = run_app(&mut terminal, &mut app).await;

    // The dev server must not outlive the dashboard.
    if app.dev_state() != crate::service::SupervisorState::Idle {
        app.set_status("Stopping dev server...", StatusLevel::Info, 60);
        let _ = terminal.draw(|f| ui::draw(f, &app));
    }
    app.shutdown().await;

    let cleanup_result = restore_terminal(&mut terminal);

    match (result, cleanup_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), _) => Err(e),
        (Ok(()), Err(e)) => Err(e.into()),
    }
}

fn restore_terminal<B: ratatui::backend::Backend + std::io::Write>(
    terminal: &mut Terminal<B>,
) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> anyhow::Result<()> {
    let mut input = EventStream::new();
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Raw mode turns Ctrl-C into a key press, but `kill` still reaches us.
    let mut interrupt = watch_signal(SignalKind::interrupt());
    let mut terminate = watch_signal(SignalKind::terminate());

    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        tokio::select! {
            _ = tick.tick() => app.on_tick().await?,
            _ = next_signal(&mut interrupt) => break,
            _ = next_signal(&mut terminate) => break,
            event = input.next() => match event {
                // Some terminals report key releases as well.
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if !app.handle_key(key).await? {
                        break;
                    }
                }
                Some(Ok(Event::Resize(width, height))) => app.on_resize(width, height),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
        }
    }
    Ok(())
}

fn watch_signal(kind: SignalKind) -> Option<Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            tracing::warn!("Cannot watch signal {:?}: {}. Use 'q' to quit.", kind, e);
            None
        }
    }
}

/// Resolves on the next delivery; never resolves without a handler.
async fn next_signal(stream: &mut Option<Signal>) {
    match stream {
        Some(stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
