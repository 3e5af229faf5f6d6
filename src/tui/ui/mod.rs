use crate::tui::app::App;
use ratatui::Frame;

pub mod dashboard;
pub mod logs;

pub fn draw(f: &mut Frame, app: &App) {
    dashboard::draw(f, app, f.area());
    if app.show_help {
        draw_help(f);
    }
}

fn draw_help(f: &mut Frame) {
    use ratatui::{
        layout::{Alignment, Constraint, Direction, Layout},
        style::{Color, Modifier, Style},
        text::{Line, Span},
        widgets::{Block, Borders, Clear, Paragraph, Wrap},
    };

    let heading = |text: &'static str| {
        Line::from(vec![Span::styled(
            text,
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )])
    };

    let text = vec![
        Line::from(vec![Span::styled(
            "cr-dev dashboard - Keyboard Shortcuts",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )]),
        Line::from(""),
        heading("Menu"),
        Line::from("  ↑/k ↓/j   Move selection"),
        Line::from("  1-15      Jump to a numbered entry"),
        Line::from("  Enter     Run the selected entry"),
        Line::from("  ←/h →/l   Select a saved database"),
        Line::from(""),
        heading("Logs"),
        Line::from("  PgUp/PgDn Scroll"),
        Line::from("  End/f     Follow new output"),
        Line::from("  c         Clear"),
        Line::from(""),
        heading("Global"),
        Line::from("  ?         Toggle this help"),
        Line::from("  Esc       Close help"),
        Line::from("  q/Ctrl+C  Quit (stops the dev server first)"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "One dev-server task and one command can run at a time.",
            Style::default().fg(Color::DarkGray),
        )]),
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    let paragraph = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: true })
        .alignment(Alignment::Left);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(15),
            Constraint::Percentage(70),
            Constraint::Percentage(15),
        ])
        .split(f.area());

    let h_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Percentage(60),
            Constraint::Percentage(20),
        ])
        .split(chunks[1]);

    f.render_widget(Clear, h_chunks[1]);
    f.render_widget(paragraph, h_chunks[1]);
}
