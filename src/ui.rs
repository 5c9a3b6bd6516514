use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use dfp_bank_benchmark::aggregator::{MappingStatus, MappingUsage, ReconciledRecord};
use dfp_bank_benchmark::dashboard::{self, DashboardMetric, Filter, DASHBOARD_METRICS, UNDEFINED_MARKER};
use dfp_bank_benchmark::unmapped::UnmappedLine;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Dataset,
    Ranking,
    MappingUsage,
    UnmappedLines,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Dataset => Page::Ranking,
            Page::Ranking => Page::MappingUsage,
            Page::MappingUsage => Page::UnmappedLines,
            Page::UnmappedLines => Page::Dataset,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Dataset => Page::UnmappedLines,
            Page::Ranking => Page::Dataset,
            Page::MappingUsage => Page::Ranking,
            Page::UnmappedLines => Page::MappingUsage,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Dataset => "Dataset",
            Page::Ranking => "Ranking",
            Page::MappingUsage => "Mapping Usage",
            Page::UnmappedLines => "Unmapped Lines",
        }
    }
}

pub struct App {
    pub records: Vec<ReconciledRecord>,
    pub mapping_usage: Vec<MappingUsage>,
    pub unmapped: Vec<UnmappedLine>,
    pub banks: Vec<String>,
    pub years: Vec<i32>,
    pub filter: Filter,
    pub metric_idx: usize,
    pub current_page: Page,
    pub state: TableState,
    bank_cursor: Option<usize>,
    year_cursor: Option<usize>,
}

impl App {
    pub fn new(
        records: Vec<ReconciledRecord>,
        mapping_usage: Vec<MappingUsage>,
        unmapped: Vec<UnmappedLine>,
    ) -> Self {
        let banks = dashboard::banks(&records);
        let years = dashboard::years(&records);

        let mut state = TableState::default();
        if !records.is_empty() {
            state.select(Some(0));
        }

        Self {
            records,
            mapping_usage,
            unmapped,
            banks,
            years,
            filter: Filter::default(),
            metric_idx: 0,
            current_page: Page::Dataset,
            state,
            bank_cursor: None,
            year_cursor: None,
        }
    }

    pub fn metric(&self) -> DashboardMetric {
        DASHBOARD_METRICS[self.metric_idx]
    }

    pub fn cycle_metric(&mut self) {
        self.metric_idx = (self.metric_idx + 1) % DASHBOARD_METRICS.len();
    }

    /// all -> each bank -> all
    pub fn cycle_bank(&mut self) {
        self.bank_cursor = cycle(self.bank_cursor, self.banks.len());
        self.filter.banks = self
            .bank_cursor
            .and_then(|i| self.banks.get(i))
            .into_iter()
            .cloned()
            .collect();
        self.reset_selection();
    }

    /// all -> each year -> all
    pub fn cycle_year(&mut self) {
        self.year_cursor = cycle(self.year_cursor, self.years.len());
        self.filter.years = self
            .year_cursor
            .and_then(|i| self.years.get(i))
            .into_iter()
            .copied()
            .collect();
        self.reset_selection();
    }

    pub fn clear_filter(&mut self) {
        self.bank_cursor = None;
        self.year_cursor = None;
        self.filter = Filter::default();
        self.reset_selection();
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
        self.reset_selection();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
        self.reset_selection();
    }

    pub fn filtered_records(&self) -> Vec<&ReconciledRecord> {
        dashboard::apply_filter(&self.records, &self.filter)
    }

    /// Year shown on the ranking page: the filtered year, else the latest
    pub fn ranking_year(&self) -> Option<i32> {
        self.year_cursor
            .and_then(|i| self.years.get(i).copied())
            .or_else(|| self.years.last().copied())
    }

    pub fn ranking(&self) -> Vec<dashboard::RankingEntry> {
        let Some(year) = self.ranking_year() else {
            return Vec::new();
        };
        // Ranking compares banks, so only the year filter applies
        let all: Vec<&ReconciledRecord> = self.records.iter().collect();
        dashboard::ranking(&all, &self.metric(), year)
    }

    pub fn filtered_usage(&self) -> Vec<&MappingUsage> {
        self.mapping_usage
            .iter()
            .filter(|u| self.filter.years.is_empty() || self.filter.years.contains(&u.year))
            .collect()
    }

    pub fn filtered_unmapped(&self) -> Vec<&UnmappedLine> {
        self.unmapped
            .iter()
            .filter(|l| self.filter.years.is_empty() || self.filter.years.contains(&l.year))
            .filter(|l| self.filter.banks.is_empty() || self.filter.banks.contains(&l.company))
            .collect()
    }

    pub fn row_count(&self) -> usize {
        match self.current_page {
            Page::Dataset => self.filtered_records().len(),
            Page::Ranking => self.ranking().len(),
            Page::MappingUsage => self.filtered_usage().len(),
            Page::UnmappedLines => self.filtered_unmapped().len(),
        }
    }

    fn reset_selection(&mut self) {
        if self.row_count() > 0 {
            self.state.select(Some(0));
        } else {
            self.state.select(None);
        }
    }

    pub fn next(&mut self) {
        let len = self.row_count();
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
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map_or(0, |i| (i + 20).min(len - 1));
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let i = self.state.selected().map_or(0, |i| i.saturating_sub(20));
        self.state.select(Some(i));
    }
}

fn cycle(cursor: Option<usize>, len: usize) -> Option<usize> {
    match cursor {
        None if len > 0 => Some(0),
        Some(i) if i + 1 < len => Some(i + 1),
        _ => None,
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

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('m') => app.cycle_metric(),
                KeyCode::Char('b') => app.cycle_bank(),
                KeyCode::Char('y') => app.cycle_year(),
                KeyCode::Char('c') => app.clear_filter(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.state.select(Some(0)),
                KeyCode::End => {
                    let len = app.row_count();
                    if len > 0 {
                        app.state.select(Some(len - 1));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Dataset => render_dataset(f, chunks[1], app),
        Page::Ranking => render_ranking(f, chunks[1], app),
        Page::MappingUsage => render_mapping_usage(f, chunks[1], app),
        Page::UnmappedLines => render_unmapped(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn header_row(titles: &[&str]) -> Row<'static> {
    let cells: Vec<Cell> = titles
        .iter()
        .map(|h| {
            Cell::from(h.to_string()).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        })
        .collect();

    Row::new(cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

/// Formatted value; undefined stands out from zero
fn value_cell(metric: &DashboardMetric, value: Option<f64>) -> Cell<'static> {
    let text = metric.format(value);
    let color = match value {
        None => Color::DarkGray,
        Some(v) if v < 0.0 => Color::Red,
        Some(_) => Color::Green,
    };
    let style = if text == UNDEFINED_MARKER {
        Style::default().fg(color).add_modifier(Modifier::ITALIC)
    } else {
        Style::default().fg(color)
    };
    Cell::from(text).style(style)
}

fn page_block(title: String) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::White))
        .title(title)
}

fn highlight() -> Style {
    Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD)
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Dataset, Page::Ranking, Page::MappingUsage, Page::UnmappedLines];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Records: {}", app.records.len()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Unmapped: {}", app.unmapped.len()),
        Style::default().fg(Color::Magenta),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_dataset(f: &mut Frame, area: Rect, app: &mut App) {
    let mut titles = vec!["Banco", "Ano"];
    titles.extend(DASHBOARD_METRICS.iter().map(|m| m.label));

    let rows: Vec<Row> = app
        .filtered_records()
        .into_iter()
        .map(|record| {
            let mut cells = vec![
                Cell::from(truncate(&record.company, 28)),
                Cell::from(record.year.to_string()),
            ];
            cells.extend(
                DASHBOARD_METRICS
                    .iter()
                    .map(|m| value_cell(m, record.column(m.column))),
            );
            Row::new(cells).height(1)
        })
        .collect();

    let mut widths = vec![Constraint::Length(30), Constraint::Length(6)];
    widths.extend(DASHBOARD_METRICS.iter().map(|m| match m.kind {
        dashboard::MetricKind::Money => Constraint::Length(24),
        dashboard::MetricKind::Ratio => Constraint::Length(10),
    }));

    let table = Table::new(rows, widths)
        .header(header_row(&titles))
        .block(page_block(" Dataset - Base Final ".to_string()))
        .highlight_style(highlight())
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_ranking(f: &mut Frame, area: Rect, app: &mut App) {
    let metric = app.metric();
    let year = app
        .ranking_year()
        .map(|y| y.to_string())
        .unwrap_or_else(|| UNDEFINED_MARKER.to_string());

    let rows: Vec<Row> = app
        .ranking()
        .into_iter()
        .map(|entry| {
            Row::new(vec![
                Cell::from(format!("{:>2}", entry.rank)),
                Cell::from(entry.company.clone()),
                value_cell(&metric, entry.value),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [Constraint::Length(4), Constraint::Length(32), Constraint::Length(24)],
    )
    .header(header_row(&["#", "Banco", metric.label]))
    .block(page_block(format!(" Ranking - {} ({}) ", metric.label, year)))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_mapping_usage(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .filtered_usage()
        .into_iter()
        .map(|usage| {
            let color = match usage.status {
                MappingStatus::Resolved => Color::Green,
                MappingStatus::NoCandidateMatched => Color::Yellow,
                MappingStatus::SourceUnavailable | MappingStatus::DuplicateRows => Color::Red,
            };
            let label = match &usage.label_used {
                Some(label) => Cell::from(label.clone()),
                None => Cell::from(UNDEFINED_MARKER).style(Style::default().fg(Color::DarkGray)),
            };

            Row::new(vec![
                Cell::from(usage.year.to_string()),
                Cell::from(usage.metric.clone()),
                Cell::from(usage.statement.code()),
                label,
                Cell::from(usage.status.code()).style(Style::default().fg(color)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(24),
            Constraint::Length(6),
            Constraint::Length(60),
            Constraint::Length(22),
        ],
    )
    .header(header_row(&["Ano", "Metric", "Demo", "Label used", "Status"]))
    .block(page_block(" Mapping Usage ".to_string()))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_unmapped(f: &mut Frame, area: Rect, app: &mut App) {
    let money = DASHBOARD_METRICS[0];

    let rows: Vec<Row> = app
        .filtered_unmapped()
        .into_iter()
        .map(|line| {
            Row::new(vec![
                Cell::from(line.year.to_string()),
                Cell::from(line.statement.code()),
                Cell::from(truncate(&line.company, 28)),
                Cell::from(line.code.clone()),
                Cell::from(truncate(&line.label, 60)),
                value_cell(&money, Some(line.value)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(30),
            Constraint::Length(14),
            Constraint::Length(62),
            Constraint::Length(24),
        ],
    )
    .header(header_row(&["Ano", "Demo", "Banco", "CD_CONTA", "DS_CONTA", "VL_CONTA"]))
    .block(page_block(format!(" Unmapped Lines ({}) ", app.unmapped.len())))
    .highlight_style(highlight())
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let mut status_spans = vec![Span::styled(
        format!(" Row: {}/{} ", selected, app.row_count()),
        Style::default().fg(Color::Cyan),
    )];

    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled(
        format!("Metric: {}", app.metric().label),
        Style::default().fg(Color::Green),
    ));

    if !app.filter.is_empty() {
        let banks: Vec<&str> = app.filter.banks.iter().map(String::as_str).collect();
        let years: Vec<String> = app.filter.years.iter().map(|y| y.to_string()).collect();
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(
            format!("Filter: {} {}", banks.join(","), years.join(",")),
            Style::default().fg(Color::Green),
        ));
    }

    for (key, hint) in [
        ("Tab", " Page"),
        ("m", " Metric"),
        ("b", " Bank"),
        ("y", " Year"),
        ("c", " Clear"),
        ("↑/↓", " Nav"),
    ] {
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(hint));
    }
    status_spans.push(Span::raw(" | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use dfp_bank_benchmark::derived::DerivedMetrics;

    fn record(company: &str, year: i32, assets: f64) -> ReconciledRecord {
        ReconciledRecord {
            company: company.to_string(),
            year,
            reference_date: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
            values: [("total_assets".to_string(), assets)].into_iter().collect(),
            derived: DerivedMetrics::default(),
        }
    }

    fn app() -> App {
        App::new(
            vec![
                record("BCO BRASIL S.A.", 2022, 10.0),
                record("BCO BRASIL S.A.", 2023, 12.0),
                record("BCO BRADESCO S.A.", 2023, 20.0),
            ],
            vec![],
            vec![],
        )
    }

    #[test]
    fn test_bank_filter_cycles_back_to_all() {
        let mut app = app();
        assert_eq!(app.filtered_records().len(), 3);

        app.cycle_bank();
        assert_eq!(app.filtered_records().len(), 1); // BCO BRADESCO S.A.
        app.cycle_bank();
        assert_eq!(app.filtered_records().len(), 2); // BCO BRASIL S.A.
        app.cycle_bank();
        assert!(app.filter.is_empty());
    }

    #[test]
    fn test_ranking_uses_latest_year_by_default() {
        let mut app = app();
        assert_eq!(app.ranking_year(), Some(2023));

        let ranked = app.ranking();
        assert_eq!(ranked[0].company, "BCO BRADESCO S.A.");

        app.cycle_year();
        assert_eq!(app.ranking_year(), Some(2022));
        assert_eq!(app.ranking().len(), 1);

        app.cycle_metric();
        assert_eq!(app.metric().column, "total_liabilities");
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = app();
        app.previous();
        assert_eq!(app.state.selected(), Some(2));
        app.next();
        assert_eq!(app.state.selected(), Some(0));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Patrimônio Líquido", 10), "Patrimô...");
        assert_eq!(truncate("ROE", 10), "ROE");
    }
}
