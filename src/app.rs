use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{ArticleCache, IngestReport};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::feed::FeedFetcher;
use crate::models::{ArticleFilter, ArticleRecord};
use crate::tui::AppAction;

pub struct App {
    // Data
    pub categories: Vec<ArticleFilter>,
    pub articles: Vec<ArticleRecord>,

    // UI State
    pub selected_category: usize,
    pub selected_index: usize,
    pub show_help: bool,
    pub search_input_active: bool,
    pub search_input: String,
    pub active_search: Option<String>,
    pub status_message: Option<String>,

    // Async state
    pub is_refreshing: bool,
    refresh_rx: mpsc::Receiver<IngestReport>,
    refresh_tx: mpsc::Sender<IngestReport>,
    refresh_task: Option<JoinHandle<()>>,

    // Services
    cache: ArticleCache,
    fetcher: Arc<FeedFetcher>,
    feeds: Arc<BTreeMap<String, String>>,
}

impl App {
    pub async fn new(config: &Config, cache: ArticleCache) -> Result<Self> {
        let fetcher = FeedFetcher::new(
            Duration::from_secs(config.request_timeout_secs),
            config.max_concurrent_fetches,
        )?;

        let mut categories = vec![ArticleFilter::All, ArticleFilter::Bookmarked];
        categories.extend(
            config
                .categories()
                .map(|name| ArticleFilter::Category(name.to_string())),
        );

        let articles = cache.query(&ArticleFilter::All).await;
        let (refresh_tx, refresh_rx) = mpsc::channel(1);

        Ok(Self {
            categories,
            articles,
            selected_category: 0,
            selected_index: 0,
            show_help: false,
            search_input_active: false,
            search_input: String::new(),
            active_search: None,
            status_message: None,
            is_refreshing: false,
            refresh_rx,
            refresh_tx,
            refresh_task: None,
            cache,
            fetcher: Arc::new(fetcher),
            feeds: Arc::new(config.feeds.clone()),
        })
    }

    pub fn current_filter(&self) -> &ArticleFilter {
        self.categories
            .get(self.selected_category)
            .unwrap_or(&ArticleFilter::All)
    }

    pub fn selected_article(&self) -> Option<&ArticleRecord> {
        self.articles.get(self.selected_index)
    }

    pub async fn handle_action(&mut self, action: AppAction) -> Result<bool> {
        match action {
            AppAction::Quit => return Ok(true),

            AppAction::MoveUp => {
                self.selected_index = self.selected_index.saturating_sub(1);
            }

            AppAction::MoveDown => {
                if self.selected_index + 1 < self.articles.len() {
                    self.selected_index += 1;
                }
            }

            AppAction::MoveToTop => {
                self.selected_index = 0;
            }

            AppAction::MoveToBottom => {
                self.selected_index = self.articles.len().saturating_sub(1);
            }

            AppAction::NextCategory => {
                self.selected_category = (self.selected_category + 1) % self.categories.len();
                self.on_category_changed().await;
            }

            AppAction::PrevCategory => {
                self.selected_category = self
                    .selected_category
                    .checked_sub(1)
                    .unwrap_or(self.categories.len() - 1);
                self.on_category_changed().await;
            }

            AppAction::RefreshFeeds => {
                self.refresh_feeds();
            }

            AppAction::ToggleBookmark => {
                if let Some(article) = self.selected_article() {
                    let link = article.link.clone();
                    let bookmarked = !article.bookmarked;
                    if self.cache.toggle_bookmark(&link, bookmarked).await {
                        self.reload_articles().await;
                    }
                }
            }

            AppAction::OpenInBrowser => {
                if let Some(article) = self.selected_article() {
                    if let Err(e) = open::that(&article.link) {
                        tracing::warn!("Failed to open {}: {}", article.link, e);
                    }
                }
            }

            AppAction::ClearSearch => {
                if self.active_search.take().is_some() {
                    self.status_message = None;
                    self.selected_index = 0;
                    self.reload_articles().await;
                }
            }

            AppAction::ShowHelp => {
                self.show_help = true;
            }

            AppAction::HideHelp => {
                self.show_help = false;
            }

            AppAction::SearchStart => {
                self.search_input_active = true;
                self.search_input = self.active_search.clone().unwrap_or_default();
            }

            AppAction::SearchChar(c) => {
                self.search_input.push(c);
            }

            AppAction::SearchBackspace => {
                self.search_input.pop();
            }

            AppAction::SearchConfirm => {
                self.search_input_active = false;
                let query = self.search_input.trim().to_string();
                self.search_input.clear();
                self.selected_index = 0;
                self.active_search = (!query.is_empty()).then_some(query);
                self.status_message = None;
                self.reload_articles().await;
            }

            AppAction::SearchCancel => {
                self.search_input_active = false;
                self.search_input.clear();
            }
        }

        Ok(false)
    }

    async fn on_category_changed(&mut self) {
        self.active_search = None;
        self.status_message = None;
        self.selected_index = 0;
        self.reload_articles().await;
    }

    /// Re-run whatever produced the current list: the active search if there
    /// is one, otherwise the selected category.
    async fn reload_articles(&mut self) {
        self.articles = match &self.active_search {
            Some(query) => match self.cache.full_text_search(query).await {
                Ok(articles) => {
                    self.status_message = Some(format!("{} results for \"{query}\"", articles.len()));
                    articles
                }
                Err(CacheError::QuerySyntax(reason)) => {
                    self.status_message = Some(format!("Invalid search: {reason}"));
                    Vec::new()
                }
                Err(e) => {
                    self.status_message = Some(format!("Search failed: {e}"));
                    Vec::new()
                }
            },
            None => self.cache.query(self.current_filter()).await,
        };

        if self.selected_index >= self.articles.len() {
            self.selected_index = self.articles.len().saturating_sub(1);
        }
    }

    /// Fetch and ingest every feed on a background task. The result arrives
    /// through `poll_refresh_result`.
    pub fn refresh_feeds(&mut self) {
        if self.is_refreshing {
            return;
        }
        self.is_refreshing = true;

        let cache = self.cache.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let feeds = Arc::clone(&self.feeds);
        let tx = self.refresh_tx.clone();

        self.refresh_task = Some(tokio::spawn(async move {
            let report = refresh_all(cache, fetcher, feeds).await;
            let _ = tx.send(report).await;
        }));
    }

    /// Poll for completed refresh results (non-blocking)
    pub async fn poll_refresh_result(&mut self) {
        match self.refresh_rx.try_recv() {
            Ok(report) => {
                self.refresh_task = None;
                self.is_refreshing = false;
                self.status_message = Some(format!(
                    "Refreshed {} articles ({} rejected)",
                    report.persisted, report.rejected
                ));
                self.reload_articles().await;
            }
            Err(_) => {
                // Finished without sending a report: the task panicked.
                if self
                    .refresh_task
                    .as_ref()
                    .is_some_and(|task| task.is_finished())
                {
                    self.refresh_task = None;
                    self.is_refreshing = false;
                    self.status_message = Some("Refresh failed".to_string());
                    tracing::error!("feed refresh task ended without a report");
                }
            }
        }
    }
}

async fn refresh_all(
    cache: ArticleCache,
    fetcher: Arc<FeedFetcher>,
    feeds: Arc<BTreeMap<String, String>>,
) -> IngestReport {
    let articles = fetcher.fetch_all(&feeds).await;
    cache.ingest_batch(articles).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Repository;
    use crate::models::NewArticle;
    use crate::search::TextIndex;

    async fn test_app() -> App {
        let cache = ArticleCache::new(
            Repository::open_in_memory().await.unwrap(),
            TextIndex::in_memory().unwrap(),
        );
        cache
            .ingest(
                NewArticle::new("https://a/1", "Election results")
                    .with_category("politics")
                    .with_published_at("2024-01-01"),
            )
            .await
            .unwrap();
        cache
            .ingest(
                NewArticle::new("https://a/2", "Weather update")
                    .with_category("weather")
                    .with_published_at("2024-01-02"),
            )
            .await
            .unwrap();

        let mut config = Config::default();
        config.feeds = BTreeMap::from([
            ("politics".to_string(), "https://example.com/p.xml".to_string()),
            ("weather".to_string(), "https://example.com/w.xml".to_string()),
        ]);
        App::new(&config, cache).await.unwrap()
    }

    #[tokio::test]
    async fn test_category_cycle() {
        let mut app = test_app().await;
        assert_eq!(app.articles.len(), 2);
        assert_eq!(app.categories.len(), 4);

        app.handle_action(AppAction::NextCategory).await.unwrap();
        assert_eq!(app.current_filter(), &ArticleFilter::Bookmarked);
        assert!(app.articles.is_empty());

        app.handle_action(AppAction::NextCategory).await.unwrap();
        assert_eq!(app.articles.len(), 1);
        assert_eq!(app.articles[0].link, "https://a/1");

        app.handle_action(AppAction::PrevCategory).await.unwrap();
        app.handle_action(AppAction::PrevCategory).await.unwrap();
        app.handle_action(AppAction::PrevCategory).await.unwrap();
        assert_eq!(app.current_filter(), &ArticleFilter::Category("weather".to_string()));
    }

    #[tokio::test]
    async fn test_toggle_bookmark_updates_list() {
        let mut app = test_app().await;
        app.handle_action(AppAction::MoveDown).await.unwrap();
        assert_eq!(app.selected_article().unwrap().link, "https://a/1");

        app.handle_action(AppAction::ToggleBookmark).await.unwrap();
        assert!(app.articles[1].bookmarked);

        app.handle_action(AppAction::NextCategory).await.unwrap();
        assert_eq!(app.articles.len(), 1);
        app.handle_action(AppAction::ToggleBookmark).await.unwrap();
        assert!(app.articles.is_empty());
    }

    #[tokio::test]
    async fn test_search_and_syntax_errors() {
        let mut app = test_app().await;

        app.handle_action(AppAction::SearchStart).await.unwrap();
        for c in "weather".chars() {
            app.handle_action(AppAction::SearchChar(c)).await.unwrap();
        }
        app.handle_action(AppAction::SearchConfirm).await.unwrap();
        assert!(!app.search_input_active);
        assert_eq!(app.articles.len(), 1);
        assert_eq!(app.articles[0].link, "https://a/2");

        app.handle_action(AppAction::SearchStart).await.unwrap();
        app.search_input = "nosuchfield:x".to_string();
        app.handle_action(AppAction::SearchConfirm).await.unwrap();
        assert!(app.articles.is_empty());
        assert!(app
            .status_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Invalid search")));

        app.handle_action(AppAction::ClearSearch).await.unwrap();
        assert_eq!(app.articles.len(), 2);
        assert!(app.status_message.is_none());
    }

    #[tokio::test]
    async fn test_refresh_runs_on_a_spawned_task() {
        let app = test_app().await;
        let feeds = Arc::new(BTreeMap::new());

        let report = tokio::spawn(refresh_all(app.cache.clone(), Arc::clone(&app.fetcher), feeds))
            .await
            .unwrap();

        assert_eq!(report, IngestReport::default());
    }

    #[tokio::test]
    async fn test_refresh_that_never_reports_is_cleared() {
        let mut app = test_app().await;
        app.is_refreshing = true;
        app.refresh_task = Some(tokio::spawn(async {}));
        while !app.refresh_task.as_ref().unwrap().is_finished() {
            tokio::task::yield_now().await;
        }

        app.poll_refresh_result().await;

        assert!(!app.is_refreshing);
        assert!(app.refresh_task.is_none());
        assert_eq!(app.status_message.as_deref(), Some("Refresh failed"));
    }
}
