use crate::app::{App, DetailView, PaneBuffer, View};
use cfdeck_core::{Binding, LogLevel, LogLine, ServiceKind};
use cfdeck_tail::{PaneId, TailState};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

const GRID_COLUMNS: usize = 2;

#[derive(Clone, Copy)]
struct Theme {
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

fn theme() -> Theme {
    Theme {
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(246, 130, 31),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

fn panel(title: String, theme: Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

pub fn render_ui(frame: &mut ratatui::Frame, app: &App) {
    let size = frame.size();
    let theme = theme();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(size);
    frame.render_widget(render_header(app, theme), layout[0]);
    match app.view {
        View::Services => render_services(frame, app, theme, layout[1]),
        View::Detail => frame.render_widget(render_detail(app, theme), layout[1]),
        View::Tail => render_pane(frame, app, PaneId::Single, theme, layout[1]),
        View::Grid => render_grid(frame, app, theme, layout[1]),
    }
    frame.render_widget(render_status(app, theme), layout[2]);
    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn render_header(app: &App, theme: Theme) -> Paragraph<'static> {
    let tails = app.tails().active_sessions().count();
    let line = Line::from(vec![
        Span::styled(
            "cfdeck ",
            Style::default()
                .fg(theme.accent)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("account {} ", app.account_label()),
            Style::default().fg(theme.text),
        ),
        Span::styled(
            format!("| {} ", app.view.title()),
            Style::default().fg(theme.muted),
        ),
        Span::styled(
            format!("| {} ", app.service),
            Style::default().fg(theme.muted),
        ),
        Span::styled(
            format!("| tails {tails}"),
            Style::default().fg(if tails > 0 { theme.ok } else { theme.muted }),
        ),
    ]);
    Paragraph::new(line).block(panel("Cloud".to_string(), theme))
}

fn render_status(app: &App, theme: Theme) -> Paragraph<'static> {
    let text = app
        .status_note
        .clone()
        .unwrap_or_else(|| "? help  q quit".to_string());
    let color = if text.contains("failed") || text.contains("dropped") {
        theme.critical
    } else {
        theme.muted
    };
    Paragraph::new(Line::from(Span::styled(text, Style::default().fg(color))))
}

fn render_services(frame: &mut ratatui::Frame, app: &App, theme: Theme, area: Rect) {
    let rows = app.service_rows();
    let mut title = app.service.to_string();
    if app.is_loading(app.service) {
        title.push_str(" (loading)");
    } else if app.registry().is_cache_stale(app.service) && !rows.is_empty() {
        title.push_str(" (stale)");
    }
    if rows.is_empty() {
        let message = if app.is_loading(app.service) {
            "Loading..."
        } else {
            "Nothing listed."
        };
        let paragraph = Paragraph::new(Line::from(Span::styled(
            message,
            Style::default().fg(theme.muted),
        )))
        .block(panel(title, theme));
        frame.render_widget(paragraph, area);
        return;
    }

    let name_width = rows
        .iter()
        .map(|row| row.name.chars().count())
        .max()
        .unwrap_or(0)
        .min(40);
    let items: Vec<ListItem> = rows
        .iter()
        .map(|row| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:<width$}  ", ellipsize(&row.name, 40), width = name_width),
                    Style::default().fg(theme.text),
                ),
                Span::styled(row.note.clone(), Style::default().fg(theme.muted)),
            ]))
        })
        .collect();
    let mut state = ListState::default();
    state.select(Some(app.selected.min(rows.len() - 1)));
    let list = List::new(items)
        .highlight_symbol(">> ")
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .block(panel(title, theme));
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_detail(app: &App, theme: Theme) -> Paragraph<'static> {
    let Some(detail) = app.detail_view() else {
        return Paragraph::new("Nothing selected.").block(panel("Detail".to_string(), theme));
    };
    let lines = detail_lines(&detail, theme);
    Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(panel(format!("{} / {}", detail.service, detail.name), theme))
}

fn detail_lines(detail: &DetailView, theme: Theme) -> Vec<Line<'static>> {
    let label = Style::default().fg(theme.muted);
    let value = Style::default().fg(theme.text);
    let mut lines = vec![Line::from(vec![
        Span::styled("key  ", label),
        Span::styled(detail.key.clone(), value),
    ])];

    if detail.service == ServiceKind::Workers {
        let status = match &detail.deployment {
            None => Span::styled("checking", label),
            Some(entry) => match &entry.deployment {
                None => Span::styled("not deployed", Style::default().fg(theme.warn)),
                Some(info) => Span::styled(
                    info.versions
                        .iter()
                        .map(|v| format!("{} {}%", v.version_id, v.percentage))
                        .collect::<Vec<_>>()
                        .join(", "),
                    Style::default().fg(theme.ok),
                ),
            },
        };
        lines.push(Line::from(vec![Span::styled("deployment  ", label), status]));
        if let Some(url) = detail.deployment.as_ref().and_then(|entry| entry.public_url()) {
            lines.push(Line::from(vec![
                Span::styled("url  ", label),
                Span::styled(url, Style::default().fg(theme.accent)),
            ]));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled("bindings", label)));
        let targets: Vec<&Binding> = detail
            .bindings
            .iter()
            .filter(|binding| binding.target().is_some())
            .collect();
        if targets.is_empty() {
            lines.push(Line::from(Span::styled("  none", label)));
        }
        for binding in targets {
            if let Some((service, key, name)) = binding.target() {
                lines.push(Line::from(Span::styled(
                    format!("  {name} -> {service} {key}"),
                    value,
                )));
            }
        }
        return lines;
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("bound by", label)));
    match &detail.bound_by {
        None => lines.push(Line::from(Span::styled(
            "  unknown (binding index not built yet)",
            Style::default().fg(theme.warn),
        ))),
        Some(refs) if refs.is_empty() => {
            lines.push(Line::from(Span::styled("  no Workers", label)));
        }
        Some(refs) => {
            for reference in refs {
                lines.push(Line::from(Span::styled(
                    format!("  {} as {}", reference.script_name, reference.binding_name),
                    value,
                )));
            }
        }
    }
    lines
}

fn render_pane(frame: &mut ratatui::Frame, app: &App, pane: PaneId, theme: Theme, area: Rect) {
    let Some(buffer) = app.pane_buffer(pane) else {
        let paragraph = Paragraph::new(Line::from(Span::styled(
            "No tail running. Press t on a Worker.",
            Style::default().fg(theme.muted),
        )))
        .block(panel("Tail".to_string(), theme));
        frame.render_widget(paragraph, area);
        return;
    };
    let state = app.pane_state(pane).unwrap_or(TailState::Stopped);
    let title = format!("{} [{}]", buffer.script_name, state);
    let visible = area.height.saturating_sub(2) as usize;
    let paragraph = Paragraph::new(pane_lines(buffer, visible, theme)).block(
        panel(title, theme).border_style(Style::default().fg(state_color(&state, theme))),
    );
    frame.render_widget(paragraph, area);
}

fn render_grid(frame: &mut ratatui::Frame, app: &App, theme: Theme, area: Rect) {
    let cells = app.tails().grid_len();
    if cells == 0 {
        let paragraph = Paragraph::new("Grid is empty.")
            .block(panel(grid_title(app), theme));
        frame.render_widget(paragraph, area);
        return;
    }
    let rows = cells.div_ceil(GRID_COLUMNS);
    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, rows as u32); rows])
        .split(area);
    for (row, row_area) in row_areas.iter().enumerate() {
        let col_areas = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Ratio(1, GRID_COLUMNS as u32); GRID_COLUMNS])
            .split(*row_area);
        for (col, cell_area) in col_areas.iter().enumerate() {
            let index = row * GRID_COLUMNS + col;
            if index < cells {
                render_pane(frame, app, PaneId::Grid(index), theme, *cell_area);
                if index == app.grid_focus {
                    frame.render_widget(
                        Block::default()
                            .borders(Borders::ALL)
                            .border_style(Style::default().fg(theme.accent)),
                        *cell_area,
                    );
                }
            }
        }
    }
}

fn grid_title(app: &App) -> String {
    match app.grid_env() {
        Some(env) => format!("Grid {env}"),
        None => "Grid".to_string(),
    }
}

fn pane_lines(buffer: &PaneBuffer, visible: usize, theme: Theme) -> Vec<Line<'static>> {
    let skip = buffer.len().saturating_sub(visible);
    buffer
        .lines()
        .skip(skip)
        .map(|line| log_line(line, theme))
        .collect()
}

fn log_line(line: &LogLine, theme: Theme) -> Line<'static> {
    let level_color = match line.level {
        LogLevel::Error => theme.critical,
        LogLevel::Warn => theme.warn,
        LogLevel::Request => theme.accent,
        LogLevel::Debug => theme.muted,
        LogLevel::Log | LogLevel::Info => theme.text,
    };
    Line::from(vec![
        Span::styled(
            format!("{} ", line.timestamp.format("%H:%M:%S")),
            Style::default().fg(theme.muted),
        ),
        Span::styled(line.text.clone(), Style::default().fg(level_color)),
    ])
}

fn state_color(state: &TailState, theme: Theme) -> Color {
    match state {
        TailState::Streaming | TailState::Connected => theme.ok,
        TailState::Idle | TailState::Connecting => theme.border,
        TailState::Stopped => theme.muted,
        TailState::Error(_) => theme.critical,
    }
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: Theme) {
    let area = centered_rect(60, 60, frame.size());
    let keys = [
        ("1-8 / Tab", "pick service"),
        ("j / k", "move selection or grid focus"),
        ("Enter", "open detail"),
        ("Esc / h", "back to Workers"),
        ("t", "tail selected Worker"),
        ("g", "tail next environment in grid"),
        ("s", "stop tails in view"),
        ("x", "stop focused grid cell"),
        ("a", "next account"),
        ("r", "refresh"),
        ("q", "quit"),
    ];
    let mut lines: Vec<Line> = keys
        .iter()
        .map(|(key, action)| {
            Line::from(vec![
                Span::styled(
                    format!("{key:<12}"),
                    Style::default()
                        .fg(theme.accent)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(*action, Style::default().fg(theme.text)),
            ])
        })
        .collect();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Listings other than KV and D1 need a [commands.list] entry in config.toml,",
        Style::default().fg(theme.muted),
    )));
    lines.push(Line::from(Span::styled(
        "e.g. \"Workers\" = [\"<subcommand>\", \"--json\"]",
        Style::default().fg(theme.muted),
    )));
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(panel("Keys".to_string(), theme)),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return "...".chars().take(max).collect();
    }
    let prefix: String = input.chars().take(max - 3).collect();
    format!("{prefix}...")
}
