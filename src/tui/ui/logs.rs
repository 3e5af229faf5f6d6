use crate::tui::app::App;
use crate::tui::sink::LogLevel;
use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

pub fn draw(f: &mut Frame, app: &App, area: Rect) {
    let height = usize::from(area.height.saturating_sub(2));

    let lines: Vec<Line> = app
        .logs
        .visible(height)
        .map(|log_line| {
            let style = match log_line.level {
                LogLevel::Output => Style::default(),
                LogLevel::Info => Style::default().fg(Color::Cyan),
                LogLevel::Success => Style::default().fg(Color::Green),
                LogLevel::Warning => Style::default().fg(Color::Yellow),
                LogLevel::Error => Style::default().fg(Color::Red),
            };
            Line::from(vec![
                Span::styled(
                    format!("{} ", log_line.timestamp.format("%H:%M:%S")),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(log_line.message.as_str(), style),
            ])
        })
        .collect();

    let title = if app.logs.is_following() {
        format!(" Output ({}) ", app.logs.len())
    } else {
        format!(" Output ({}) [PAUSED - End to follow] ", app.logs.len())
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));

    f.render_widget(Paragraph::new(lines).block(block), area);
}
