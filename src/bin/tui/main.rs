mod app;

use std::io;
use std::time::Duration;

use app::{comment_lines, format_date_ns, format_latency, format_percent, truncate, AppState, ConnectionStatus};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let session_key = std::env::var("SESSION_KEY").ok();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url, session_key);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut market_table_state = TableState::default();
    market_table_state.select(None);

    let result = run_loop(&mut terminal, &mut app, &client, &mut market_table_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    market_state: &mut TableState,
) -> io::Result<()> {
    let refresh_interval = Duration::from_secs(5);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, market_state))?;

        let timeout = refresh_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let selected_id = market_state
                        .selected()
                        .and_then(|i| app.markets.get(i))
                        .map(|m| m.id.clone());

                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.markets.len().saturating_sub(1);
                            let next = market_state.selected().map_or(0, |i| (i + 1).min(max));
                            market_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = market_state
                                .selected()
                                .map_or(0, |i| i.saturating_sub(1));
                            market_state.select(Some(prev));
                        }
                        KeyCode::Enter => {
                            if let Some(id) = selected_id {
                                app.open_detail(client, &id).await;
                            }
                        }
                        KeyCode::Esc => app.close_detail(),
                        KeyCode::Char('u') | KeyCode::Char('d') => {
                            if let Some(id) = selected_id {
                                app.vote(client, &id, key.code == KeyCode::Char('u')).await;
                                last_tick = std::time::Instant::now();
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, market_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_body(f, app, market_state, chunks[1]);
    render_footer(f, app, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let p99_str = format_latency(&app.latency);
    let who = if app.session_key.is_some() { "signed in" } else { "anonymous" };

    let title_spans = vec![
        Span::styled(
            " MMXXV  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(
            format!("{} markets", app.markets.len()),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(p99_str, Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(who, Style::default().fg(Color::DarkGray)),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans))
        .block(Block::default().borders(Borders::ALL).border_style(
            Style::default().fg(Color::DarkGray),
        ));

    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, market_state: &mut TableState, area: Rect) {
    // Horizontal split: markets (55%) | detail (45%)
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    render_markets_table(f, app, market_state, halves[0]);
    render_detail(f, app, halves[1]);
}

fn render_markets_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let header_cells = ["#", "Market", "Author", "Posted", "↑", "↓", "💬"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .markets
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let title = if m.is_new {
                format!("{} [NEW]", truncate(&m.title, 24))
            } else {
                truncate(&m.title, 30)
            };
            let (up_style, down_style) = match m.viewer_vote.as_str() {
                "up" => (Style::default().fg(Color::Green).add_modifier(Modifier::BOLD), Style::default()),
                "down" => (Style::default(), Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
                _ => (Style::default(), Style::default()),
            };

            Row::new(vec![
                Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(title),
                Cell::from(truncate(m.author.display_name(), 18)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(format_date_ns(m.created_at)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(m.upvotes.to_string()).style(up_style),
                Cell::from(m.downvotes.to_string()).style(down_style),
                Cell::from(m.comment_count.to_string()).style(Style::default().fg(Color::Cyan)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(18),
            Constraint::Length(12),
            Constraint::Length(4),
            Constraint::Length(4),
            Constraint::Length(4),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " MARKETS ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, state);
}

fn render_detail(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            " DETAIL ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));

    let Some(detail) = &app.detail else {
        let hint = Paragraph::new("Select a market and press Enter")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        f.render_widget(hint, area);
        return;
    };
    let m = &detail.market;
    let label = Style::default().fg(Color::Yellow);

    let mut lines = vec![
        Line::from(Span::styled(m.title.clone(), Style::default().add_modifier(Modifier::BOLD))),
        Line::from(Span::styled(
            format!("by {} on {}", m.author.display_name(), format_date_ns(m.created_at)),
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(m.description.clone()),
        Line::from(vec![Span::styled("Resolves: ", label), Span::raw(m.resolution_criteria.clone())]),
        Line::from(vec![
            Span::styled("Votes: ", label),
            Span::raw(format!("↑{} ↓{} (yours: {})", m.upvotes, m.downvotes, m.viewer_vote)),
        ]),
    ];

    let consensus = match &detail.consensus {
        Some(c) if c.prediction_count > 0 => format!(
            "{} from {} predictions (yours: {})",
            format_percent(c.average_probability),
            c.prediction_count,
            format_percent(c.user_prediction),
        ),
        Some(_) => "No predictions yet".to_string(),
        None => "—".to_string(),
    };
    lines.push(Line::from(vec![Span::styled("Consensus: ", label), Span::raw(consensus)]));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("Comments", label)));
    let comments = comment_lines(&m.comments);
    if comments.is_empty() {
        lines.push(Line::from(Span::styled("none yet", Style::default().fg(Color::DarkGray))));
    }
    lines.extend(comments.into_iter().map(Line::from));

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: false }).block(block);
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let mut spans = vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("select  "),
        Span::styled("[enter/esc] ", Style::default().fg(Color::Yellow)),
        Span::raw("detail  "),
        Span::styled("[u/d] ", Style::default().fg(Color::Yellow)),
        Span::raw("vote  "),
    ];
    if let Some(flash) = &app.flash {
        spans.push(Span::styled(truncate(flash, 50), Style::default().fg(Color::DarkGray)));
    }
    let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
