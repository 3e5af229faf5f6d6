use crate::service::SupervisorState;
use crate::tui::app::{App, StatusLevel, TaskGroup, MENU};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

/// Rows for the saved-database list, borders included.
const SAVED_PANEL_MAX: u16 = 8;

pub fn draw(f: &mut Frame, app: &App, area: Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(10),   // Menu + logs
            Constraint::Length(1), // Status bar
        ])
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(36), Constraint::Min(20)])
        .split(rows[1]);

    let saved_height = (app.saved.len() as u16 + 2).clamp(3, SAVED_PANEL_MAX);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(saved_height)])
        .split(columns[0]);

    draw_header(f, app, rows[0]);
    draw_menu(f, app, left[0]);
    draw_saved(f, app, left[1]);
    super::logs::draw(f, app, columns[1]);
    draw_status_bar(f, app, rows[2]);
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let server = match (app.dev_state(), app.dev_session()) {
        (SupervisorState::Idle, _) => vec![Span::styled(
            "○ Dev server stopped",
            Style::default().fg(Color::DarkGray),
        )],
        (SupervisorState::Stopping, _) => vec![Span::styled(
            "⏸ Dev server stopping",
            Style::default().fg(Color::Yellow),
        )],
        (SupervisorState::Running, session) => {
            let mut spans = vec![Span::styled(
                "✓ Dev server running",
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            )];
            if let Some(record) = session {
                spans.push(Span::raw(format!(
                    "  {}  DB {}  port {}",
                    record.mode, record.db_name, record.port
                )));
            }
            if let Some(pid) = app.dev_pid() {
                spans.push(Span::raw(format!("  PID {}", pid)));
            }
            spans
        }
    };

    let text = vec![
        Line::from(vec![
            Span::styled("Comradarr Dev ", Style::default().fg(Color::Cyan)),
            Span::styled(
                concat!("v", env!("CARGO_PKG_VERSION")),
                Style::default().fg(Color::DarkGray),
            ),
            Span::styled("  | Press ? for help", Style::default().fg(Color::DarkGray)),
        ]),
        Line::from(server),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn draw_menu(f: &mut Frame, app: &App, area: Rect) {
    let mut items = Vec::with_capacity(MENU.len() + 5);
    let mut current_group = None;

    for (idx, action) in MENU.iter().enumerate() {
        let group = action.menu_group();
        if current_group != Some(group) {
            current_group = Some(group);
            items.push(ListItem::new(Line::from(Span::styled(
                group.title(),
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ))));
        }

        let busy = app.busy(action.task_group()).is_some();
        let style = if idx == app.selected {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else if busy {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        };
        items.push(ListItem::new(Line::from(vec![
            Span::styled(format!(" {:>2}. ", idx + 1), Style::default().fg(Color::DarkGray)),
            Span::styled(action.label(), style),
        ])));
    }

    let block = Block::default()
        .title(" Actions ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    f.render_widget(List::new(items).block(block), area);
}

fn draw_saved(f: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = if app.saved.is_empty() {
        vec![ListItem::new(Span::styled(
            " none",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        app.saved
            .iter()
            .enumerate()
            .map(|(idx, db)| {
                let marker = if idx == app.selected_saved { "▸" } else { " " };
                let mut spans = vec![Span::styled(
                    format!("{} {}", marker, db.name),
                    if idx == app.selected_saved {
                        Style::default().add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    },
                )];
                if db.in_use_by.is_some() {
                    spans.push(Span::styled(" (in use)", Style::default().fg(Color::Green)));
                }
                ListItem::new(Line::from(spans))
            })
            .collect()
    };

    let block = Block::default()
        .title(" Saved DBs (←/→) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    f.render_widget(List::new(items).block(block), area);
}

fn draw_status_bar(f: &mut Frame, app: &App, area: Rect) {
    if let Some(ref msg) = app.status_message {
        let color = match msg.level {
            StatusLevel::Info => Color::Blue,
            StatusLevel::Success => Color::Green,
            StatusLevel::Warning => Color::Yellow,
            StatusLevel::Error => Color::Red,
        };

        let paragraph = Paragraph::new(msg.text.as_str()).style(
            Style::default()
                .fg(color)
                .add_modifier(Modifier::BOLD)
                .bg(Color::DarkGray),
        );
        f.render_widget(paragraph, area);
        return;
    }

    let mut spans = Vec::new();
    for group in [TaskGroup::DevServer, TaskGroup::Command] {
        if let Some(label) = app.busy(group) {
            spans.push(Span::styled(
                format!("[{}: {}] ", group.name(), label),
                Style::default().fg(Color::Yellow),
            ));
        }
    }
    spans.extend([
        Span::styled("[Enter]", Style::default().fg(Color::Cyan)),
        Span::raw(" run "),
        Span::styled("[?]", Style::default().fg(Color::Cyan)),
        Span::raw(" help "),
        Span::styled("[q]", Style::default().fg(Color::Cyan)),
        Span::raw("uit"),
    ]);

    let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    f.render_widget(paragraph, area);
}
