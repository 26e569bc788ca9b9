use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::Repository;
use crate::error::CacheError;
use crate::models::{ArticleFilter, ArticleRecord, NewArticle};
use crate::search::TextIndex;

/// Outcome of a bulk ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub received: usize,
    /// Articles the store accepted. A link repeated within the batch counts
    /// once per occurrence.
    pub persisted: usize,
    pub indexed: usize,
    pub rejected: usize,
}

/// Front door to the article cache.
///
/// Writes go to the record store first and the text index second; a record
/// that failed to persist is never indexed. Free-text searches run against
/// the index and are resolved back into stored records, so a link the store
/// does not know is never returned.
///
/// Writers take `writes` for both steps, so the store and the index apply
/// concurrent writes to one link in the same order. Readers never take it.
/// Clones share every handle; clone it freely into background tasks.
#[derive(Clone)]
pub struct ArticleCache {
    store: Repository,
    index: Arc<TextIndex>,
    writes: Arc<Mutex<()>>,
}

impl ArticleCache {
    pub fn new(store: Repository, index: TextIndex) -> Self {
        Self {
            store,
            index: Arc::new(index),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub async fn open(db_path: impl AsRef<Path>, index_dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let store = Repository::open(db_path).await?;
        let index_dir = index_dir.as_ref().to_path_buf();
        let index = tokio::task::spawn_blocking(move || TextIndex::open(index_dir)).await??;
        Ok(Self::new(store, index))
    }

    pub async fn ingest(&self, article: NewArticle) -> Result<(), CacheError> {
        let _writing = self.writes.lock().await;
        let stored = NewArticle::from(self.store.upsert_ignoring_duplicates(article).await?);

        let link = stored.link.clone();
        if let Err(e) = self
            .with_index(move |index| index.index_or_replace(&stored))
            .await
        {
            tracing::warn!(link = %link, error = %e, "article stored but not indexed");
        }
        Ok(())
    }

    /// Store every article, then index the rows as stored under a single
    /// index commit. Rejected articles are counted, never fatal.
    pub async fn ingest_batch(&self, articles: Vec<NewArticle>) -> IngestReport {
        let mut report = IngestReport {
            received: articles.len(),
            ..IngestReport::default()
        };

        let _writing = self.writes.lock().await;
        let mut persisted = Vec::with_capacity(articles.len());
        for article in articles {
            let link = article.link.clone();
            match self.store.upsert_ignoring_duplicates(article).await {
                Ok(stored) => persisted.push(NewArticle::from(stored)),
                Err(e) => {
                    tracing::debug!(link = %link, error = %e, "article rejected");
                    report.rejected += 1;
                }
            }
        }
        report.persisted = persisted.len();

        match self.with_index(move |index| index.index_batch(&persisted)).await {
            Ok(indexed) => report.indexed = indexed,
            Err(e) => tracing::warn!(error = %e, "stored batch could not be indexed"),
        }

        tracing::info!(
            received = report.received,
            persisted = report.persisted,
            indexed = report.indexed,
            rejected = report.rejected,
            "ingested batch"
        );
        report
    }

    pub async fn query(&self, filter: &ArticleFilter) -> Vec<ArticleRecord> {
        match filter {
            ArticleFilter::All => self.store.get_all().await,
            ArticleFilter::Bookmarked => self.store.get_bookmarked().await,
            ArticleFilter::Category(category) => self.store.get_by_category(category).await,
        }
    }

    /// Stored articles matching `text`, most relevant first.
    ///
    /// Only a malformed query is an error; an unreadable index yields no
    /// results.
    pub async fn full_text_search(&self, text: &str) -> Result<Vec<ArticleRecord>, CacheError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let query = text.to_string();
        let links = match self.with_index(move |index| index.search(&query)).await {
            Ok(links) => links,
            Err(e @ CacheError::QuerySyntax(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(query = text, error = %e, "search unavailable");
                return Ok(Vec::new());
            }
        };

        let mut articles = Vec::with_capacity(links.len());
        for link in links {
            match self.store.get_by_link(&link).await {
                Some(article) => articles.push(article),
                None => tracing::debug!(link = %link, "dropping search hit with no stored article"),
            }
        }
        Ok(articles)
    }

    pub async fn toggle_bookmark(&self, link: &str, bookmarked: bool) -> bool {
        self.store.set_bookmark(link, bookmarked).await
    }

    /// Replace the whole index with the stored articles.
    pub async fn rebuild_index(&self) -> Result<usize, CacheError> {
        let _writing = self.writes.lock().await;
        self.rebuild_from_store().await
    }

    /// Rebuild the index when its links differ from the stored links, e.g.
    /// after the index directory was removed or a write reached only the
    /// store. Returns how many documents were re-indexed.
    pub async fn reconcile_index(&self) -> Result<usize, CacheError> {
        let _writing = self.writes.lock().await;
        let stored: HashSet<String> = self.store.links().await.into_iter().collect();
        let indexed = self.with_index(|index| index.links()).await?;
        if stored == indexed {
            return Ok(0);
        }

        tracing::info!(
            missing = stored.difference(&indexed).count(),
            stale = indexed.difference(&stored).count(),
            "search index disagrees with the article store"
        );
        self.rebuild_from_store().await
    }

    // Callers hold `writes`.
    async fn rebuild_from_store(&self) -> Result<usize, CacheError> {
        let articles: Vec<NewArticle> = self
            .store
            .get_all()
            .await
            .into_iter()
            .map(NewArticle::from)
            .collect();

        let indexed = self
            .with_index(move |index| index.rebuild(&articles))
            .await?;
        tracing::info!(indexed, "rebuilt search index");
        Ok(indexed)
    }

    async fn with_index<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(&TextIndex) -> Result<T, CacheError> + Send + 'static,
        T: Send + 'static,
    {
        let index = Arc::clone(&self.index);
        tokio::task::spawn_blocking(move || f(&index)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_cache() -> ArticleCache {
        let store = Repository::open_in_memory().await.unwrap();
        let index = TextIndex::in_memory().unwrap();
        ArticleCache::new(store, index)
    }

    fn election() -> NewArticle {
        NewArticle::new("https://a/1", "Election results")
            .with_description("Votes counted")
            .with_category("politics")
            .with_published_at("2024-01-01")
    }

    fn weather() -> NewArticle {
        NewArticle::new("https://a/2", "Weather update")
            .with_description("Rain expected")
            .with_category("weather")
            .with_published_at("2024-01-02")
    }

    fn links(articles: &[ArticleRecord]) -> Vec<&str> {
        articles.iter().map(|a| a.link.as_str()).collect()
    }

    #[tokio::test]
    async fn test_two_feed_scenario() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        cache.ingest(weather()).await.unwrap();

        let all = cache.query(&ArticleFilter::All).await;
        assert_eq!(links(&all), vec!["https://a/2", "https://a/1"]);

        let found = cache.full_text_search("election").await.unwrap();
        assert_eq!(links(&found), vec!["https://a/1"]);

        let weather = cache
            .query(&ArticleFilter::Category("weather".to_string()))
            .await;
        assert_eq!(links(&weather), vec!["https://a/2"]);
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        assert!(cache.toggle_bookmark("https://a/1", true).await);

        cache.ingest(election()).await.unwrap();

        let all = cache.query(&ArticleFilter::All).await;
        assert_eq!(all.len(), 1);
        assert!(all[0].bookmarked);
        assert_eq!(cache.index.num_docs(), 1);
        assert_eq!(cache.full_text_search("votes").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reingest_refreshes_searchable_text() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        cache
            .ingest(election().with_description("Recount ordered"))
            .await
            .unwrap();

        assert!(cache.full_text_search("votes").await.unwrap().is_empty());
        let found = cache.full_text_search("recount").await.unwrap();
        assert_eq!(found[0].description, "Recount ordered");
    }

    #[tokio::test]
    async fn test_bookmark_round_trip() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        cache.ingest(weather()).await.unwrap();

        assert!(cache.toggle_bookmark("https://a/2", true).await);
        let bookmarked = cache.query(&ArticleFilter::Bookmarked).await;
        assert_eq!(links(&bookmarked), vec!["https://a/2"]);

        assert!(cache.toggle_bookmark("https://a/2", false).await);
        assert!(cache.query(&ArticleFilter::Bookmarked).await.is_empty());
        assert_eq!(cache.query(&ArticleFilter::All).await.len(), 2);

        assert!(!cache.toggle_bookmark("https://missing", true).await);
    }

    #[tokio::test]
    async fn test_stale_index_entries_are_dropped() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        cache
            .index
            .index_or_replace(&NewArticle::new("https://ghost", "Election ghost"))
            .unwrap();

        let found = cache.full_text_search("election").await.unwrap();
        assert_eq!(links(&found), vec!["https://a/1"]);
    }

    #[tokio::test]
    async fn test_malformed_query_is_distinct_from_no_results() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();

        let err = cache.full_text_search("nosuchfield:election").await.unwrap_err();
        assert!(matches!(err, CacheError::QuerySyntax(_)));

        assert!(cache.full_text_search("snow").await.unwrap().is_empty());
        assert!(cache.full_text_search("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_article_is_not_indexed() {
        let cache = test_cache().await;
        let err = cache
            .ingest(NewArticle::new("", "Election without a link"))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::InvalidRecord(_)));
        assert_eq!(cache.index.num_docs(), 0);
    }

    #[tokio::test]
    async fn test_batch_counts_rejections() {
        let cache = test_cache().await;
        let report = cache
            .ingest_batch(vec![
                election(),
                NewArticle::new("https://a/3", ""),
                weather(),
                election(),
            ])
            .await;

        assert_eq!(
            report,
            IngestReport {
                received: 4,
                persisted: 3,
                indexed: 3,
                rejected: 1,
            }
        );
        assert_eq!(cache.query(&ArticleFilter::All).await.len(), 2);
        assert_eq!(cache.index.num_docs(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_rebuilds_missing_index() {
        let store = Repository::open_in_memory().await.unwrap();
        let seeded = ArticleCache::new(store.clone(), TextIndex::in_memory().unwrap());
        seeded.ingest(election()).await.unwrap();
        seeded.ingest(weather()).await.unwrap();

        // Same store, empty index.
        let cache = ArticleCache::new(store, TextIndex::in_memory().unwrap());
        assert!(cache.full_text_search("election").await.unwrap().is_empty());

        assert_eq!(cache.reconcile_index().await.unwrap(), 2);
        assert_eq!(cache.reconcile_index().await.unwrap(), 0);
        let found = cache.full_text_search("rain").await.unwrap();
        assert_eq!(links(&found), vec!["https://a/2"]);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_stale_link_with_missing_one() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        cache
            .store
            .upsert_ignoring_duplicates(weather())
            .await
            .unwrap();
        cache
            .index
            .index_or_replace(&NewArticle::new("https://ghost", "Ghost story"))
            .unwrap();
        // Same number of documents on both sides, different links.
        assert_eq!(cache.index.num_docs(), 2);

        assert_eq!(cache.reconcile_index().await.unwrap(), 2);
        assert_eq!(cache.index.num_docs(), 2);
        let found = cache.full_text_search("rain").await.unwrap();
        assert_eq!(links(&found), vec!["https://a/2"]);
        assert!(cache.full_text_search("ghost").await.unwrap().is_empty());
        assert_eq!(cache.reconcile_index().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rebuild_drops_stale_documents() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        cache
            .index
            .index_or_replace(&NewArticle::new("https://ghost", "Election ghost"))
            .unwrap();

        assert_eq!(cache.rebuild_index().await.unwrap(), 1);
        assert_eq!(cache.index.num_docs(), 1);
        assert_eq!(
            cache.index.links().unwrap(),
            HashSet::from(["https://a/1".to_string()])
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingest() {
        let cache = test_cache().await;
        cache.ingest(election()).await.unwrap();
        cache.toggle_bookmark("https://a/1", true).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .ingest(election().with_description(format!("revision{i}")))
                    .await
                    .unwrap();
                cache
                    .ingest(
                        NewArticle::new(format!("https://b/{i}"), "Parallel story")
                            .with_category("misc"),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.query(&ArticleFilter::All).await.len(), 9);
        assert_eq!(cache.index.num_docs(), 9);
        let stored = cache.store.get_by_link("https://a/1").await.unwrap();
        assert!(stored.bookmarked);
        assert_eq!(cache.full_text_search("parallel").await.unwrap().len(), 8);

        // Whichever revision the store kept is the one the index holds.
        let found = cache.full_text_search(&stored.description).await.unwrap();
        assert_eq!(links(&found), vec!["https://a/1"]);
        for i in 0..8 {
            let revision = format!("revision{i}");
            if revision != stored.description {
                assert!(cache.full_text_search(&revision).await.unwrap().is_empty());
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_revisions_of_one_link_agree() {
        let cache = test_cache().await;

        for round in 0..20 {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let cache = cache.clone();
                    tokio::spawn(async move {
                        cache
                            .ingest(election().with_description(format!("round{round}take{i}")))
                            .await
                            .unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }

            let stored = cache.store.get_by_link("https://a/1").await.unwrap();
            let found = cache.full_text_search(&stored.description).await.unwrap();
            assert_eq!(links(&found), vec!["https://a/1"], "round {round}");
        }
        assert_eq!(cache.index.num_docs(), 1);
    }

    #[tokio::test]
    async fn test_open_on_disk_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cache.db");
        let index_dir = dir.path().join("index");

        {
            let cache = ArticleCache::open(&db_path, &index_dir).await.unwrap();
            cache.ingest(election()).await.unwrap();
        }

        let cache = ArticleCache::open(&db_path, &index_dir).await.unwrap();
        assert_eq!(cache.reconcile_index().await.unwrap(), 0);
        let found = cache.full_text_search("election").await.unwrap();
        assert_eq!(links(&found), vec!["https://a/1"]);
    }
}
