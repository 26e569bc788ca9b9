use std::path::Path;
use std::time::Duration;

use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::CacheError;
use crate::models::{ArticleFilter, ArticleRecord, NewArticle};

use super::schema::{ARTICLE_COLUMNS, SCHEMA};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// Bookmark state is never written here. Content only replaces stored content
// when the incoming item actually has some.
const UPSERT_ARTICLE: &str = r#"
INSERT INTO articles (link, title, description, content, pubDate, category)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(link) DO UPDATE SET
    title = excluded.title,
    description = excluded.description,
    content = COALESCE(NULLIF(excluded.content, ''), articles.content),
    pubDate = excluded.pubDate,
    category = excluded.category
RETURNING link, title, description, content, pubDate, category, isBookmarked"#;

/// Durable article storage keyed by link.
///
/// Cloning is cheap: clones share the same background connection thread, which
/// serializes every statement against the database file.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;
            }
        }

        let conn = Connection::open(db_path).await?;
        conn.call(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            let _mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %db_path.display(), "opened article store");
        Ok(Self { conn })
    }

    pub async fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // Writes

    /// Insert the article, or refresh the text fields of an existing row with
    /// the same link. Bookmark state of an existing row is left alone.
    ///
    /// Returns the row as stored after the write.
    pub async fn upsert_ignoring_duplicates(
        &self,
        article: NewArticle,
    ) -> Result<ArticleRecord, CacheError> {
        if article.link.trim().is_empty() {
            return Err(CacheError::InvalidRecord("article link is empty".to_string()));
        }
        if article.title.trim().is_empty() {
            return Err(CacheError::InvalidRecord(format!(
                "article {} has no title",
                article.link
            )));
        }

        let link = article.link.clone();
        self.conn
            .call(move |conn| {
                let stored = conn.query_row(
                    UPSERT_ARTICLE,
                    params![
                        article.link,
                        article.title,
                        article.description,
                        article.content,
                        article.published_at,
                        article.category,
                    ],
                    article_from_row,
                )?;
                Ok(stored)
            })
            .await
            .map_err(|e| {
                tracing::warn!(link = %link, error = %e, "failed to store article");
                CacheError::from(e)
            })
    }

    /// Returns whether a row was updated. A missing link is logged and ignored.
    pub async fn set_bookmark(&self, link: &str, bookmarked: bool) -> bool {
        let target = link.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE articles SET isBookmarked = ?1 WHERE link = ?2",
                    params![bookmarked, target],
                )?;
                Ok(updated)
            })
            .await;

        match result {
            Ok(0) => {
                tracing::warn!(link, "bookmark target not found");
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(link, error = %e, "failed to update bookmark");
                false
            }
        }
    }

    // Reads

    pub async fn get_all(&self) -> Vec<ArticleRecord> {
        self.select_articles(ArticleFilter::All).await
    }

    pub async fn get_by_category(&self, category: &str) -> Vec<ArticleRecord> {
        self.select_articles(ArticleFilter::Category(category.to_string()))
            .await
    }

    pub async fn get_bookmarked(&self) -> Vec<ArticleRecord> {
        self.select_articles(ArticleFilter::Bookmarked).await
    }

    pub async fn get_by_link(&self, link: &str) -> Option<ArticleRecord> {
        let target = link.to_string();
        let result = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE link = ?1");
                let article = conn
                    .query_row(&sql, params![target], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await;

        result.unwrap_or_else(|e| {
            tracing::warn!(link, error = %e, "failed to load article");
            None
        })
    }

    /// Every stored link, unordered.
    pub async fn links(&self) -> Vec<String> {
        let result = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT link FROM articles")?;
                let links = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(links)
            })
            .await;

        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to list article links");
            Vec::new()
        })
    }

    async fn select_articles(&self, filter: ArticleFilter) -> Vec<ArticleRecord> {
        let label = filter.label().to_string();
        let result = self
            .conn
            .call(move |conn| {
                let (clause, args): (&str, Vec<String>) = match filter {
                    ArticleFilter::All => ("", Vec::new()),
                    ArticleFilter::Bookmarked => ("WHERE isBookmarked = 1", Vec::new()),
                    ArticleFilter::Category(category) => ("WHERE category = ?1", vec![category]),
                };
                let sql = format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles {clause} ORDER BY pubDate DESC, link ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params_from_iter(args.iter()), article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await;

        result.unwrap_or_else(|e| {
            tracing::warn!(filter = %label, error = %e, "failed to query articles");
            Vec::new()
        })
    }
}

fn article_from_row(row: &Row) -> rusqlite::Result<ArticleRecord> {
    Ok(ArticleRecord {
        link: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        content: row.get(3)?,
        published_at: row.get(4)?,
        category: row.get(5)?,
        bookmarked: row.get::<_, i64>(6)? != 0,
    })
}
