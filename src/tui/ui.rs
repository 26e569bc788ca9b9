use ratatui::{
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::App;
use crate::models::ArticleRecord;

const KEY_HINTS: &str = "j/k:nav  h/l:category  /:search  b:bookmark  ?:help  q:quit";

const HELP_KEYS: &[(&str, &str)] = &[
    ("j / ↓", "Move down"),
    ("k / ↑", "Move up"),
    ("< / >", "First / last article"),
    ("h / l", "Previous / next category"),
    ("/", "Search titles and descriptions"),
    ("Esc", "Clear search"),
    ("b", "Toggle bookmark"),
    ("o", "Open in browser"),
    ("r", "Refresh all feeds"),
    ("?", "Toggle this help"),
    ("q", "Quit"),
];

pub fn draw(frame: &mut Frame, app: &App) {
    let [body, status] = Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());
    let [categories, articles, detail] = Layout::horizontal([
        Constraint::Length(category_width(app)),
        Constraint::Ratio(1, 2),
        Constraint::Ratio(1, 2),
    ])
    .areas(body);

    render_categories(frame, app, categories);
    render_article_list(frame, app, articles);
    render_detail(frame, app, detail);
    render_status(frame, app, status);

    if app.search_input_active {
        render_search_input(frame, app);
    }

    if app.show_help {
        render_help(frame);
    }
}

fn pane(title: String, color: Color) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

fn category_width(app: &App) -> u16 {
    let widest = app
        .categories
        .iter()
        .map(|filter| filter.label().chars().count())
        .max()
        .unwrap_or(0);
    // Border, highlight symbol and a little air.
    u16::try_from(widest + 6).unwrap_or(u16::MAX).clamp(16, 32)
}

fn render_categories(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .categories
        .iter()
        .map(|filter| ListItem::new(filter.label().to_string()))
        .collect();

    let list = List::new(items)
        .block(pane(" Feeds ".to_string(), Color::Cyan))
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut state = ListState::default().with_selected(Some(app.selected_category));
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_article_list(frame: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app.articles.iter().map(article_line).collect();

    let title = match &app.active_search {
        Some(query) => format!(" Search: {query} ({}) ", app.articles.len()),
        None => format!(" {} ({}) ", app.current_filter().label(), app.articles.len()),
    };

    let list = List::new(items)
        .block(pane(title, Color::Blue))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let selected = (!app.articles.is_empty()).then_some(app.selected_index);
    let mut state = ListState::default().with_selected(selected);
    frame.render_stateful_widget(list, area, &mut state);
}

fn article_line(article: &ArticleRecord) -> ListItem<'_> {
    let marker = if article.bookmarked { "★ " } else { "  " };
    ListItem::new(Line::from(vec![
        Span::styled(marker, Style::default().fg(Color::Yellow)),
        Span::styled(format!("[{}] ", article.category), Style::default().fg(Color::Blue)),
        Span::raw(article.title.as_str()),
    ]))
}

fn render_detail(frame: &mut Frame, app: &App, area: Rect) {
    let block = pane(" Article ".to_string(), Color::Green);

    let Some(article) = app.selected_article() else {
        frame.render_widget(Paragraph::new("No article selected").block(block), area);
        return;
    };

    let width = usize::from(area.width.saturating_sub(2)).max(20);
    let mut lines = vec![
        Line::from(Span::styled(
            article.title.as_str(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("{} | {}", article.category, display_date(&article.published_at)),
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(Span::styled(article.link.as_str(), Style::default().fg(Color::Blue))),
        Line::default(),
    ];
    lines.extend(description_text(article, width).lines().map(|l| Line::from(l.to_string())));

    let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
    let status = if app.is_refreshing {
        "Refreshing feeds..."
    } else {
        app.status_message.as_deref().unwrap_or(KEY_HINTS)
    };

    frame.render_widget(
        Paragraph::new(status).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}

fn render_search_input(frame: &mut Frame, app: &App) {
    let area = popup_area(frame.area(), 60, 3);
    let block = pane(
        " Search (title:, description:, \"phrase\", AND/OR) ".to_string(),
        Color::Yellow,
    );

    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(format!("> {}_", app.search_input)).block(block),
        area,
    );
}

fn render_help(frame: &mut Frame) {
    let mut lines: Vec<Line> = HELP_KEYS
        .iter()
        .map(|(keys, action)| {
            Line::from(vec![
                Span::styled(format!("  {keys:<8}"), Style::default().fg(Color::Cyan)),
                Span::raw(*action),
            ])
        })
        .collect();
    lines.push(Line::default());
    lines.push(Line::from("  Press any key to close"));

    let height = u16::try_from(lines.len() + 2).unwrap_or(u16::MAX);
    let area = popup_area(frame.area(), 50, height);

    frame.render_widget(Clear, area);
    frame.render_widget(Paragraph::new(lines).block(pane(" Help ".to_string(), Color::Cyan)), area);
}

fn popup_area(area: Rect, percent_x: u16, height: u16) -> Rect {
    let [row] = Layout::vertical([Constraint::Length(height)])
        .flex(Flex::Center)
        .areas(area);
    let [popup] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(row);
    popup
}

fn description_text(article: &ArticleRecord, width: usize) -> String {
    let html = if article.description.is_empty() {
        &article.content
    } else {
        &article.description
    };
    html2text::from_read(html.as_bytes(), width).unwrap_or_else(|_| html.clone())
}

/// RFC 3339 dates are shown as local "YYYY-MM-DD HH:MM"; anything else as-is.
fn display_date(published_at: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(published_at)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|_| published_at.to_string())
}
