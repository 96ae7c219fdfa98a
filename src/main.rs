use std::io;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Local};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};

use crcon_terminal::api::{AdminApi, RconApi};
use crcon_terminal::config::Config;
use crcon_terminal::dispatch::{ActionPayload, ActionType};
use crcon_terminal::entity::{CollectionKind, Entity};
use crcon_terminal::fake_feed::DemoApi;
use crcon_terminal::feed::spawn_provider;
use crcon_terminal::persist;
use crcon_terminal::state::{
    AppState, Delta, InputMode, NoticeLevel, ProviderCommand, Row, RosterView, apply_delta,
};

struct App {
    state: AppState,
    should_quit: bool,
    cmd_tx: mpsc::Sender<ProviderCommand>,
    demo: bool,
}

impl App {
    fn new(config: &Config, cmd_tx: mpsc::Sender<ProviderCommand>) -> Self {
        let mut state = AppState::with_operator(&config.operator, config.history_page_size);
        persist::load_into_state(&mut state);
        state.settings_dirty = false;
        Self {
            state,
            should_quit: false,
            cmd_tx,
            demo: config.demo,
        }
    }

    fn send(&mut self, cmd: ProviderCommand) {
        if let Err(mpsc::SendError(cmd)) = self.cmd_tx.send(cmd) {
            self.state.command_not_sent(&cmd);
        }
    }

    fn watch_current(&mut self) {
        let kind = self.state.tab;
        let filter = self.state.current().filter.clone();
        self.send(ProviderCommand::Watch { kind, filter });
    }

    fn on_key(&mut self, key: KeyEvent) {
        match self.state.mode.clone() {
            InputMode::Normal => self.on_key_normal(key),
            InputMode::Filter { buffer } => self.on_key_filter(key, buffer),
            InputMode::ActionMenu { cursor } => self.on_key_menu(key, cursor),
            InputMode::Reason { .. } => self.on_key_reason(key),
        }
    }

    fn on_key_normal(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char(c @ '1'..='4') => {
                let idx = (c as usize) - ('1' as usize);
                if self.state.switch_tab(CollectionKind::ALL[idx]) {
                    self.watch_current();
                }
            }
            KeyCode::Char('j') | KeyCode::Down => self.state.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.state.select_prev(),
            KeyCode::Char(' ') => self.state.toggle_cursor(),
            KeyCode::Char('a') => self.state.toggle_all_visible(),
            KeyCode::Char('c') => self.state.clear_selection(),
            KeyCode::Char('D') => {
                let dropped = self.state.prune_absent_selection();
                self.state
                    .push_log(format!("[INFO] Dropped {dropped} absent selection(s)"));
            }
            KeyCode::Char('s') => self.state.cycle_sort(),
            KeyCode::Char('g') => self.state.cycle_group(),
            KeyCode::Char('x') => self.state.toggle_accent_folding(),
            KeyCode::Char('/') => {
                let buffer = self.state.current().options.filter_text.clone();
                self.state.mode = InputMode::Filter { buffer };
            }
            KeyCode::Char('r') => {
                let kind = self.state.tab;
                self.send(ProviderCommand::Refresh { kind });
            }
            KeyCode::Char('n') | KeyCode::Char('p') => {
                let forward = key.code == KeyCode::Char('n');
                if let Some(filter) = self.state.change_page(forward) {
                    let kind = self.state.tab;
                    self.send(ProviderCommand::SetFilter { kind, filter });
                }
            }
            KeyCode::Char('b') | KeyCode::Enter => {
                self.state.mode = InputMode::ActionMenu { cursor: 0 };
            }
            KeyCode::Char('?') => self.state.help_overlay = !self.state.help_overlay,
            KeyCode::Esc => self.state.help_overlay = false,
            _ => {}
        }
    }

    fn on_key_filter(&mut self, key: KeyEvent, mut buffer: String) {
        match key.code {
            KeyCode::Esc => {
                self.state.set_filter_text("");
                self.state.mode = InputMode::Normal;
                self.push_server_name_filter("");
            }
            KeyCode::Enter => {
                self.state.mode = InputMode::Normal;
                self.push_server_name_filter(&buffer);
            }
            KeyCode::Backspace => {
                buffer.pop();
                self.state.set_filter_text(&buffer);
                self.state.mode = InputMode::Filter { buffer };
            }
            KeyCode::Char(c) => {
                buffer.push(c);
                self.state.set_filter_text(&buffer);
                self.state.mode = InputMode::Filter { buffer };
            }
            _ => {}
        }
    }

    /// History search also narrows server-side, since only one page is local.
    fn push_server_name_filter(&mut self, text: &str) {
        let kind = self.state.tab;
        if kind != CollectionKind::History {
            return;
        }
        let ignore_accents = self.state.current().options.ignore_accents;
        let view = self.state.current_mut();
        view.filter.set_text("player_name", text);
        view.filter.set_flag("ignore_accent", ignore_accents && !text.is_empty());
        view.filter.page = Some(1);
        let filter = view.filter.clone();
        self.send(ProviderCommand::SetFilter { kind, filter });
    }

    fn on_key_menu(&mut self, key: KeyEvent, cursor: usize) {
        let actions = ActionType::ALL;
        match key.code {
            KeyCode::Esc | KeyCode::Char('b') => self.state.mode = InputMode::Normal,
            KeyCode::Char('j') | KeyCode::Down => {
                self.state.mode = InputMode::ActionMenu {
                    cursor: (cursor + 1).min(actions.len() - 1),
                };
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.state.mode = InputMode::ActionMenu {
                    cursor: cursor.saturating_sub(1),
                };
            }
            KeyCode::Enter => {
                let action = actions[cursor.min(actions.len() - 1)];
                if let Some(cmd) = self.state.begin_action(action, ActionPayload::default()) {
                    self.send(cmd);
                }
            }
            _ => {}
        }
    }

    fn on_key_reason(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.state.mode = InputMode::Normal,
            KeyCode::Tab => self.state.cycle_template(),
            KeyCode::Enter => {
                if let Some(cmd) = self.state.confirm_reason() {
                    self.send(cmd);
                }
            }
            KeyCode::Backspace => {
                if let InputMode::Reason { buffer, .. } = &mut self.state.mode {
                    buffer.pop();
                }
            }
            KeyCode::Char(c) => {
                if let InputMode::Reason { buffer, .. } = &mut self.state.mode {
                    buffer.push(c);
                }
            }
            _ => {}
        }
    }

    fn save_settings_if_dirty(&mut self) {
        if !self.state.settings_dirty {
            return;
        }
        self.state.settings_dirty = false;
        if let Err(err) = persist::save_from_state(&self.state) {
            self.state.push_log(format!("[WARN] Settings not saved: {err:#}"));
        }
    }
}

fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let api: Arc<dyn AdminApi> = if config.demo {
        Arc::new(DemoApi::default())
    } else {
        Arc::new(RconApi::new(config.clone())?)
    };

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let (tx, rx) = mpsc::channel();
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let provider = spawn_provider(api, config.clone(), tx, cmd_rx);

    let mut app = App::new(&config, cmd_tx);
    app.state.push_log(format!(
        "[INFO] Connected to {}",
        if config.demo { "demo backend" } else { config.base_url.as_str() }
    ));
    app.watch_current();
    let res = run_app(&mut terminal, &mut app, rx);

    app.save_settings_if_dirty();
    let _ = app.cmd_tx.send(ProviderCommand::Shutdown);
    let _ = provider.join();

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    rx: mpsc::Receiver<Delta>,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(delta) = rx.try_recv() {
            apply_delta(&mut app.state, delta);
        }
        app.state.expire_notifications(Instant::now());
        app.save_settings_if_dirty();

        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            app.on_key(key);
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(5),
            Constraint::Length(4),
            Constraint::Length(6),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_text(&app.state, app.demo))
        .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    render_roster(frame, chunks[1], app.state.current());
    render_notifications(frame, chunks[2], &app.state);
    render_console(frame, chunks[3], &app.state);

    let footer = Paragraph::new(footer_text(&app.state)).style(Style::default().fg(Color::Gray));
    frame.render_widget(footer, chunks[4]);

    match &app.state.mode {
        InputMode::ActionMenu { cursor } => render_action_menu(frame, frame.size(), *cursor),
        InputMode::Reason {
            request, buffer, ..
        } => render_reason_prompt(
            frame,
            frame.size(),
            request.action,
            request.target_keys.len(),
            buffer,
        ),
        _ => {}
    }
    if app.state.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn header_text(state: &AppState, demo: bool) -> String {
    let tabs = CollectionKind::ALL
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            if *kind == state.tab {
                format!("[{} {}]", i + 1, kind.label())
            } else {
                format!(" {} {} ", i + 1, kind.label())
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    let view = state.current();
    let sort = if view.options.sort_key.is_empty() {
        "server order"
    } else {
        view.options.sort_key.as_str()
    };
    let group = view.options.group_by.as_deref().unwrap_or("none");
    let accents = if view.options.ignore_accents { "on" } else { "off" };
    let line1 = format!(
        "CRCON TERMINAL{} | {tabs}",
        if demo { " (demo)" } else { "" }
    );
    let line2 = format!(
        "Rows: {} | Selected: {} | Sort: {sort} | Group: {group} | Filter: \"{}\" (accents-folding {accents}){}",
        view.collection.len(),
        view.selection.len(),
        view.options.filter_text,
        page_label(view),
    );
    let line3 = match (&view.last_error, view.loading, view.fetched_at) {
        (Some(err), _, _) => format!("Stale data, last refresh failed: {err}"),
        (None, true, _) => "Loading…".to_string(),
        (None, false, Some(at)) => format!("Updated {}", format_time(at)),
        (None, false, None) => String::new(),
    };
    format!("{line1}\n{line2}\n{line3}")
}

fn page_label(view: &RosterView) -> String {
    if !view.kind.paginated() {
        return String::new();
    }
    let page = view.filter.page.unwrap_or(1);
    match view.total {
        Some(total) => format!(" | Page {page} ({total} total)"),
        None => format!(" | Page {page}"),
    }
}

fn format_time(at: SystemTime) -> String {
    let local: DateTime<Local> = at.into();
    local.format("%H:%M:%S").to_string()
}

fn footer_text(state: &AppState) -> String {
    match &state.mode {
        InputMode::Normal => "1-4 Tabs | j/k Move | Space Select | a All | c Clear | D Drop absent | s Sort | g Group | / Filter | x Accents | r Refresh | n/p Page | b Actions | ? Help | q Quit".to_string(),
        InputMode::Filter { buffer } => format!("Filter: {buffer}_  (Enter apply, Esc clear)"),
        InputMode::ActionMenu { .. } => "j/k Move | Enter Run | Esc Close".to_string(),
        InputMode::Reason { .. } => "Type a reason | Tab Templates | Enter Send | Esc Cancel".to_string(),
    }
}

fn columns(kind: CollectionKind) -> Vec<(&'static str, &'static str, Constraint)> {
    match kind {
        CollectionKind::Live => vec![
            ("Name", "name", Constraint::Min(18)),
            ("Team", "team", Constraint::Length(8)),
            ("Squad", "unit_name", Constraint::Length(10)),
            ("CC", "country", Constraint::Length(4)),
            ("Lvl", "level", Constraint::Length(5)),
            ("Pen", "penalty_weight", Constraint::Length(5)),
        ],
        CollectionKind::History => vec![
            ("Name", "name", Constraint::Min(18)),
            ("Player ID", "player_id", Constraint::Length(19)),
            ("CC", "country", Constraint::Length(4)),
            ("Pen", "penalty_weight", Constraint::Length(5)),
            ("Flags", "flags", Constraint::Length(8)),
            ("BL", "is_blacklisted", Constraint::Length(6)),
        ],
        CollectionKind::Vip => vec![
            ("Name", "name", Constraint::Min(18)),
            ("Player ID", "player_id", Constraint::Length(19)),
            ("Expires", "vip_expiration", Constraint::Length(26)),
        ],
        CollectionKind::Blacklist => vec![
            ("Name", "name", Constraint::Min(16)),
            ("Player ID", "player_id", Constraint::Length(19)),
            ("List", "blacklist_name", Constraint::Length(10)),
            ("Reason", "reason", Constraint::Min(12)),
            ("Expires", "expires_at", Constraint::Length(26)),
        ],
    }
}

fn cell_text(entity: &Entity, attr: &str) -> String {
    match entity.get(attr) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Bool(b)) => (if *b { "yes" } else { "" }).to_string(),
        Some(serde_json::Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

fn render_roster(frame: &mut Frame, area: Rect, view: &RosterView) {
    let block = Block::default()
        .title(format!(" {} ", view.kind.label()))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(inner);

    let cols = columns(view.kind);
    let mut widths = vec![Constraint::Length(4)];
    widths.extend(cols.iter().map(|(_, _, w)| *w));

    let header_cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(widths.clone())
        .split(sections[0]);
    let bold = Style::default().add_modifier(Modifier::BOLD);
    for (i, (title, _, _)) in cols.iter().enumerate() {
        render_cell_text(frame, header_cells[i + 1], title, bold);
    }

    let list_area = sections[1];
    let rows = view.rows();
    if rows.is_empty() {
        let msg = if view.loading {
            "Loading…"
        } else if view.options.filter_text.is_empty() {
            "Nothing here"
        } else {
            "No rows match the filter"
        };
        frame.render_widget(
            Paragraph::new(msg).style(Style::default().fg(Color::DarkGray)),
            list_area,
        );
        return;
    }

    let visible = list_area.height as usize;
    let (start, end) = visible_range(view.cursor, rows.len(), visible);
    for (i, idx) in (start..end).enumerate() {
        let row_area = Rect {
            x: list_area.x,
            y: list_area.y + i as u16,
            width: list_area.width,
            height: 1,
        };
        let under_cursor = idx == view.cursor;
        let row_style = if under_cursor {
            Style::default().fg(Color::White).bg(Color::DarkGray)
        } else {
            Style::default()
        };
        if under_cursor {
            frame.render_widget(Block::default().style(row_style), row_area);
        }

        match &rows[idx] {
            Row::Group { key, keys } => {
                let mark = if !keys.is_empty() && view.selection.is_superset(keys) {
                    "[x]"
                } else if keys.iter().any(|k| view.selection.contains(k)) {
                    "[-]"
                } else {
                    "[ ]"
                };
                let label = format!("{mark} {} ({})", key.to_uppercase(), keys.len());
                render_cell_text(
                    frame,
                    row_area,
                    &label,
                    row_style.fg(Color::Cyan).add_modifier(Modifier::BOLD),
                );
            }
            Row::Entity { key } => {
                let Some(entity) = view.collection.get(key) else {
                    continue;
                };
                let cells = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints(widths.clone())
                    .split(row_area);
                let mark = if view.selection.contains(key) { "[x]" } else { "[ ]" };
                render_cell_text(frame, cells[0], mark, row_style);
                for (i, (_, attr, _)) in cols.iter().enumerate() {
                    render_cell_text(frame, cells[i + 1], &cell_text(entity, attr), row_style);
                }
            }
        }
    }
}

fn render_notifications(frame: &mut Frame, area: Rect, state: &AppState) {
    let absent = state.current().absent_selected();
    let mut lines: Vec<Line> = Vec::new();
    if !absent.is_empty() {
        lines.push(Line::styled(
            format!(
                "{} selected player(s) no longer present: {}",
                absent.len(),
                absent.join(", ")
            ),
            Style::default().fg(Color::Yellow),
        ));
    }
    if !state.pending.is_empty() {
        let pending = state
            .pending
            .iter()
            .map(|p| format!("{} x{}", p.action.label(), p.target_keys.len()))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(Line::styled(
            format!("Pending: {pending}"),
            Style::default().fg(Color::Blue),
        ));
    }
    for note in state.notifications.iter().rev() {
        let color = match note.level {
            NoticeLevel::Info => Color::Green,
            NoticeLevel::Warn => Color::Red,
        };
        lines.push(Line::styled(note.text.clone(), Style::default().fg(color)));
    }
    let height = area.height.saturating_sub(1) as usize;
    lines.truncate(height);
    let widget = Paragraph::new(lines).block(Block::default().borders(Borders::TOP));
    frame.render_widget(widget, area);
}

fn render_console(frame: &mut Frame, area: Rect, state: &AppState) {
    let height = area.height.saturating_sub(2) as usize;
    let text = state
        .logs
        .iter()
        .rev()
        .take(height)
        .rev()
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let console = Paragraph::new(text)
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().title(" Console ").borders(Borders::ALL));
    frame.render_widget(console, area);
}

fn render_action_menu(frame: &mut Frame, area: Rect, cursor: usize) {
    let popup_area = centered_rect(40, 60, area);
    frame.render_widget(Clear, popup_area);
    let lines: Vec<Line> = ActionType::ALL
        .iter()
        .enumerate()
        .map(|(i, action)| {
            let marker = if action.requires_reason() { " *" } else { "" };
            let text = format!("{}{marker}", action.label());
            if i == cursor {
                Line::styled(text, Style::default().fg(Color::Black).bg(Color::Cyan))
            } else {
                Line::raw(text)
            }
        })
        .collect();
    let menu = Paragraph::new(lines).block(
        Block::default()
            .title(" Actions (* needs a reason) ")
            .borders(Borders::ALL),
    );
    frame.render_widget(menu, popup_area);
}

fn render_reason_prompt(
    frame: &mut Frame,
    area: Rect,
    action: ActionType,
    targets: usize,
    buffer: &str,
) {
    let popup_area = centered_rect(60, 20, area);
    frame.render_widget(Clear, popup_area);
    let text = format!(
        "{} for {targets} player(s) needs a reason.\n\n> {buffer}_",
        action.label()
    );
    let prompt = Paragraph::new(text).block(
        Block::default()
            .title(" Confirm ")
            .borders(Borders::ALL),
    );
    frame.render_widget(prompt, popup_area);
}

fn render_cell_text(frame: &mut Frame, area: Rect, text: &str, style: Style) {
    let text_area = Rect {
        x: area.x,
        y: area.y + (area.height / 2),
        width: area.width,
        height: 1,
    };
    let paragraph = Paragraph::new(text).style(style);
    frame.render_widget(paragraph, text_area);
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }
    if total <= visible {
        return (0, total);
    }

    let mut start = selected.saturating_sub(visible / 2);
    if start + visible > total {
        start = total - visible;
    }
    (start, start + visible)
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 70, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "CRCON Terminal - Help",
        "",
        "Views:",
        "  1 / 2 / 3 / 4   Live / History / VIP / Blacklist",
        "  r               Refresh now",
        "  n / p           Next / previous page (History, Blacklist)",
        "",
        "Selection:",
        "  j/k or ↑/↓      Move",
        "  Space           Toggle row (or whole group on a header)",
        "  a               Toggle all visible rows",
        "  c               Clear selection",
        "  D               Drop selected players no longer present",
        "",
        "View:",
        "  s               Cycle sort",
        "  g               Cycle grouping",
        "  /               Filter by name",
        "  x               Toggle accent-insensitive filtering",
        "",
        "Actions:",
        "  b / Enter       Action menu (acts on selection, or cursor row)",
        "  Tab             In the reason prompt, cycle saved reasons",
        "",
        "  ?               Toggle help",
        "  q               Quit",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
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

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
