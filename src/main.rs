use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use crossterm::event::KeyEventKind;
use ratatui::prelude::*;

mod app;
mod cache;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod search;
mod tui;

use app::App;
use cache::ArticleCache;
use config::Config;
use error::{AppError, Result};
use feed::FeedFetcher;
use models::{ArticleFilter, ArticleRecord};
use tui::{draw, handle_key_event};

const USAGE: &str = "Usage: news-cache [--refresh | --reindex | --list | --bookmarks | \
--category <name> | --search <query> | --bookmark <link> | --unbookmark <link>] [--json]";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Tui,
    Refresh,
    Reindex,
    List(ArticleFilter),
    Search(String),
    Bookmark { link: String, bookmarked: bool },
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    command: Command,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut command = Command::Tui;
    let mut json = false;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| AppError::Config(format!("{flag} needs a value\n{USAGE}")))
        };

        let next = match arg.as_str() {
            "--json" => {
                json = true;
                continue;
            }
            "--refresh" => Command::Refresh,
            "--reindex" => Command::Reindex,
            "--list" => Command::List(ArticleFilter::All),
            "--bookmarks" => Command::List(ArticleFilter::Bookmarked),
            "--category" => Command::List(ArticleFilter::Category(value("--category")?)),
            "--search" => Command::Search(value("--search")?),
            "--bookmark" => Command::Bookmark {
                link: value("--bookmark")?,
                bookmarked: true,
            },
            "--unbookmark" => Command::Bookmark {
                link: value("--unbookmark")?,
                bookmarked: false,
            },
            other => return Err(AppError::Config(format!("unknown argument '{other}'\n{USAGE}"))),
        };

        if command != Command::Tui {
            return Err(AppError::Config(format!("only one command may be given\n{USAGE}")));
        }
        command = next;
    }

    Ok(Cli { command, json })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config = Config::load()?;
    let cache = ArticleCache::open(&config.db_path, &config.index_dir).await?;

    if cli.command != Command::Reindex {
        if let Err(e) = cache.reconcile_index().await {
            tracing::warn!("Search index reconciliation failed: {}", e);
        }
    }

    match cli.command {
        Command::Tui => run_tui(&config, cache).await,
        Command::Refresh => {
            let fetcher = FeedFetcher::new(
                Duration::from_secs(config.request_timeout_secs),
                config.max_concurrent_fetches,
            )?;
            let articles = fetcher.fetch_all(&config.feeds).await;
            let report = cache.ingest_batch(articles).await;
            println!(
                "Refreshed {} feeds: {} articles persisted, {} indexed, {} rejected",
                config.feeds.len(),
                report.persisted,
                report.indexed,
                report.rejected
            );
            Ok(())
        }
        Command::Reindex => {
            let indexed = cache.rebuild_index().await?;
            println!("Indexed {indexed} articles");
            Ok(())
        }
        Command::List(filter) => {
            let articles = cache.query(&filter).await;
            print_articles(&articles, cli.json)
        }
        Command::Search(query) => {
            let articles = cache.full_text_search(&query).await?;
            print_articles(&articles, cli.json)
        }
        Command::Bookmark { link, bookmarked } => {
            if cache.toggle_bookmark(&link, bookmarked).await {
                println!("{} {}", if bookmarked { "Bookmarked" } else { "Unbookmarked" }, link);
            } else {
                println!("No article with link {link}");
            }
            Ok(())
        }
    }
}

fn print_articles(articles: &[ArticleRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(articles)?);
        return Ok(());
    }

    for article in articles {
        let marker = if article.bookmarked { "*" } else { " " };
        println!(
            "{marker} {} [{}] {}\n    {}",
            article.published_at, article.category, article.title, article.link
        );
    }
    Ok(())
}

async fn run_tui(config: &Config, cache: ArticleCache) -> Result<()> {
    let mut app = App::new(config, cache).await?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
    }

    Ok(())
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|frame| draw(frame, app))?;

        // Poll for completed refresh results
        app.poll_refresh_result().await;

        // Poll for events with timeout to allow async operations
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(action) =
                        handle_key_event(key, app.search_input_active, app.show_help)
                    {
                        let should_quit = app.handle_action(action).await?;
                        if should_quit {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
