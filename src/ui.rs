use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

use star_coins::persist::PersistentRoster;
use star_coins::view::{self, RosterStats, StudentRow};
use star_coins::{BatchTarget, Selection, SortKey, SqliteBlobStore, StoreError};

pub struct App {
    pub store: PersistentRoster<SqliteBlobStore>,
    pub rows: Vec<StudentRow>,
    pub state: TableState,
    pub sort: SortKey,
    pub search: String,
    pub searching: bool,
    pub show_detail: bool,
    pub message: Option<(String, bool)>,
}

impl App {
    pub fn new(store: PersistentRoster<SqliteBlobStore>) -> Self {
        let mut app = Self {
            store,
            rows: Vec::new(),
            state: TableState::default(),
            sort: SortKey::default(),
            search: String::new(),
            searching: false,
            show_detail: false,
            message: None,
        };
        app.refresh();
        app
    }

    fn selection(&self) -> Selection {
        self.store.roster().current_selection().clone()
    }

    /// Rebuild the table from the roster, keeping the cursor in range
    pub fn refresh(&mut self) {
        let selection = self.selection();
        let search = Some(self.search.trim()).filter(|s| !s.is_empty());
        self.rows = view::student_rows(self.store.roster(), &selection, search, self.sort);

        let selected = match self.state.selected() {
            _ if self.rows.is_empty() => None,
            Some(i) => Some(i.min(self.rows.len() - 1)),
            None => Some(0),
        };
        self.state.select(selected);
    }

    pub fn stats(&self) -> RosterStats {
        view::stats(self.store.roster(), &self.selection())
    }

    pub fn selected_row(&self) -> Option<&StudentRow> {
        self.state.selected().and_then(|i| self.rows.get(i))
    }

    fn report(&mut self, result: std::result::Result<String, StoreError>) {
        self.message = Some(match result {
            Ok(text) => (text, false),
            Err(err) => (err.to_string(), true),
        });
        self.refresh();
    }

    /// Move to the next (or previous) entry of: all classes, then each class
    pub fn cycle_class(&mut self, forward: bool) {
        let mut choices = vec![Selection::AllClasses];
        choices.extend(
            self.store
                .roster()
                .classes()
                .iter()
                .map(|c| Selection::Class(c.id.clone())),
        );

        let current = self.selection();
        let position = choices.iter().position(|s| *s == current).unwrap_or(0);
        let len = choices.len();
        let next = if forward { (position + 1) % len } else { (position + len - 1) % len };
        let target = choices.swap_remove(next);

        let result = self.store.apply(|r| r.select_class(target));
        self.state.select(Some(0));
        match result {
            Ok(()) => {
                self.message = None;
                self.refresh();
            }
            Err(err) => self.report(Err(err)),
        }
    }

    pub fn cycle_sort(&mut self) {
        self.sort = self.sort.next();
        self.refresh();
    }

    pub fn adjust_selected(&mut self, delta: i64) {
        let Some(row) = self.selected_row().cloned() else {
            return;
        };
        let result = self
            .store
            .apply(|r| r.adjust_coins(&row.id, delta))
            .map(|balance| format!("{} {:+} 星币（现有 {}）", row.name, delta, balance));
        self.report(result);
    }

    pub fn adjust_class(&mut self, delta: i64) {
        let result = self
            .store
            .apply(|r| r.batch_adjust(&BatchTarget::CurrentClass, delta))
            .map(|count| format!("{} 名学生每人 {:+} 星币", count, delta));
        self.report(result);
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn next(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if app.searching {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => app.searching = false,
                KeyCode::Backspace => {
                    app.search.pop();
                    app.refresh();
                }
                KeyCode::Char(c) => {
                    app.search.push(c);
                    app.refresh();
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Enter => app.toggle_detail(),
            KeyCode::BackTab => app.cycle_class(false),
            KeyCode::Tab => app.cycle_class(!key.modifiers.contains(KeyModifiers::SHIFT)),
            KeyCode::Char('s') => app.cycle_sort(),
            KeyCode::Char('/') => app.searching = true,
            KeyCode::Char('c') => {
                app.search.clear();
                app.refresh();
            }
            KeyCode::Char('+') | KeyCode::Char('=') => app.adjust_selected(1),
            KeyCode::Char('-') => app.adjust_selected(-1),
            KeyCode::Char('a') => app.adjust_class(1),
            KeyCode::Char('z') => app.adjust_class(-1),
            KeyCode::Down | KeyCode::Char('j') => app.next(),
            KeyCode::Up | KeyCode::Char('k') => app.previous(),
            KeyCode::Home => app.state.select(Some(0)),
            KeyCode::End => {
                if !app.rows.is_empty() {
                    app.state.select(Some(app.rows.len() - 1));
                }
            }
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Class + stats
            Constraint::Min(0),    // Student table
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    if app.show_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        render_table(f, chunks[1], app);
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let roster = app.store.roster();
    let selection = app.selection();
    let stats = app.stats();

    let mut tab_spans = vec![];
    let all_style = tab_style(selection == Selection::AllClasses);
    tab_spans.push(Span::styled("所有班级", all_style));
    for class in roster.classes() {
        tab_spans.push(Span::raw(" │ "));
        let active = selection.class_id() == Some(class.id.as_str());
        tab_spans.push(Span::styled(class.name.clone(), tab_style(active)));
    }

    let stats_line = Line::from(vec![
        Span::styled("学生总数 ", Style::default().fg(Color::DarkGray)),
        Span::styled(stats.total_students.to_string(), Style::default().fg(Color::White)),
        Span::raw("  |  "),
        Span::styled("星币最多 ", Style::default().fg(Color::DarkGray)),
        Span::styled(stats.top_student_text(&selection), Style::default().fg(Color::Yellow)),
        Span::raw("  |  "),
        Span::styled("平均星币 ", Style::default().fg(Color::DarkGray)),
        Span::styled(stats.average_coins.to_string(), Style::default().fg(Color::Green)),
    ]);

    let header = Paragraph::new(vec![Line::from(tab_spans), stats_line]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" ⭐ 星币管理 "),
    );

    f.render_widget(header, area);
}

fn tab_style(active: bool) -> Style {
    if active {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["姓名", "班级", "星币"].iter().map(|h| {
        Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.rows.iter().map(|row| {
        let color = if row.coins < 0 { Color::Red } else { Color::Green };
        Row::new(vec![
            Cell::from(truncate(&row.name, 20)),
            Cell::from(truncate(&row.class_name, 20)),
            Cell::from(row.coins.to_string()).style(Style::default().fg(color)),
        ])
        .height(1)
    });

    let title = if app.rows.is_empty() && !app.search.trim().is_empty() {
        " 没有找到匹配的学生 ".to_string()
    } else {
        format!(" 学生 ({}) ", app.rows.len())
    };

    let table = Table::new(
        rows,
        [Constraint::Length(22), Constraint::Length(22), Constraint::Length(10)],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let mut spans = vec![];
    if app.searching {
        spans.push(Span::styled(" 搜索: ", Style::default().fg(Color::Cyan)));
        spans.push(Span::raw(app.search.clone()));
        spans.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    } else if let Some((text, is_error)) = &app.message {
        let color = if *is_error { Color::Red } else { Color::Green };
        spans.push(Span::styled(format!(" {} ", text), Style::default().fg(color)));
        spans.push(Span::raw(" | "));
    }

    if !app.searching {
        spans.push(Span::styled(
            format!(" 排序: {} ", app.sort.as_str()),
            Style::default().fg(Color::Cyan),
        ));
        spans.extend([
            Span::raw(" | "),
            key("Tab"),
            Span::raw(" 班级 | "),
            key("+/-"),
            Span::raw(" 星币 | "),
            key("a/z"),
            Span::raw(" 全班 | "),
            key("s"),
            Span::raw(" 排序 | "),
            key("/"),
            Span::raw(" 搜索 | "),
            Span::styled("q", Style::default().fg(Color::Red)),
            Span::raw(" 退出"),
        ]);
    }

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" 学生详情 ");

    let Some(row) = app.selected_row() else {
        f.render_widget(Paragraph::new("未选择学生").block(block), area);
        return;
    };

    let label = |text: &'static str| {
        Span::styled(text, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    };

    let content = vec![
        Line::from(""),
        Line::from(vec![label("  姓名: "), Span::raw(row.name.clone())]),
        Line::from(""),
        Line::from(vec![label("  班级: "), Span::raw(row.class_name.clone())]),
        Line::from(""),
        Line::from(vec![
            label("  星币: "),
            Span::styled(
                row.coins.to_string(),
                Style::default().fg(if row.coins < 0 { Color::Red } else { Color::Green }),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            label("  ID: "),
            Span::styled(row.id.clone(), Style::default().fg(Color::DarkGray)),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "  Press Enter to close",
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )),
    ];

    f.render_widget(Paragraph::new(content).block(block), area);
}

/// Shorten to `max_len` characters, never splitting a multi-byte char
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
