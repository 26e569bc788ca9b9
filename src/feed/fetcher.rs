use std::collections::BTreeMap;
use std::time::Duration;

use chrono::SecondsFormat;
use feed_rs::model::Feed;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::error::Result;
use crate::models::NewArticle;

const USER_AGENT: &str = concat!("news-cache/", env!("CARGO_PKG_VERSION"));

pub struct FeedFetcher {
    client: Client,
    max_concurrent: usize,
}

impl FeedFetcher {
    pub fn new(timeout: Duration, max_concurrent: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            max_concurrent: max_concurrent.max(1),
        })
    }

    pub async fn fetch_category(&self, category: &str, url: &str) -> Result<Vec<NewArticle>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;

        Ok(articles_from_feed(category, feed))
    }

    /// Fetch every configured feed concurrently. A feed that cannot be fetched
    /// or parsed is logged and contributes nothing.
    pub async fn fetch_all(&self, feeds: &BTreeMap<String, String>) -> Vec<NewArticle> {
        let sources: Vec<(String, String)> = feeds
            .iter()
            .map(|(category, url)| (category.clone(), url.clone()))
            .collect();

        let batches: Vec<Vec<NewArticle>> = stream::iter(sources)
            .map(|(category, url)| async move {
                match self.fetch_category(&category, &url).await {
                    Ok(articles) => {
                        tracing::debug!("Fetched {} articles for {}", articles.len(), category);
                        articles
                    }
                    Err(e) => {
                        tracing::warn!("Failed to fetch {} ({}): {}", category, url, e);
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let articles: Vec<NewArticle> = batches.into_iter().flatten().collect();
        tracing::info!("Fetched {} articles from {} feeds", articles.len(), feeds.len());
        articles
    }
}

/// Convert parsed feed entries into articles of `category`. Entries without a
/// title or an absolute link are skipped.
pub fn articles_from_feed(category: &str, feed: Feed) -> Vec<NewArticle> {
    feed.entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())?;
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|href| url::Url::parse(href).is_ok())?;

            let content = entry.content.and_then(|c| c.body).unwrap_or_default();
            // Prefer the summary; fall back to the body when a feed only ships content.
            let description = entry
                .summary
                .map(|s| s.content)
                .unwrap_or_else(|| content.clone());
            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default();

            Some(
                NewArticle::new(link, title)
                    .with_description(description)
                    .with_content(content)
                    .with_published_at(published_at)
                    .with_category(category),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://example.com</link>
    <description>Example</description>
    <item>
      <title>Election results</title>
      <link>https://example.com/1</link>
      <description>&lt;p&gt;Votes counted&lt;/p&gt;</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Weather update</title>
      <link>https://example.com/2</link>
    </item>
    <item>
      <title>No link here</title>
      <description>Dropped</description>
    </item>
    <item>
      <link>https://example.com/4</link>
      <description>Untitled entries are dropped</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_articles_from_feed() {
        let feed = parser::parse(RSS.as_bytes()).unwrap();
        let articles = articles_from_feed("politics", feed);

        assert_eq!(articles.len(), 2);

        let first = &articles[0];
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(first.title, "Election results");
        assert_eq!(first.category, "politics");
        assert!(first.description.contains("Votes counted"));
        assert_eq!(first.published_at, "2024-01-01T10:00:00Z");

        let second = &articles[1];
        assert_eq!(second.link, "https://example.com/2");
        assert!(second.description.is_empty());
        assert!(second.published_at.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_feed_is_isolated() {
        let fetcher = FeedFetcher::new(Duration::from_secs(2), 2).unwrap();
        let mut feeds = BTreeMap::new();
        feeds.insert("broken".to_string(), "http://127.0.0.1:9/feed.xml".to_string());
        feeds.insert("invalid".to_string(), "not a url".to_string());

        assert!(fetcher.fetch_all(&feeds).await.is_empty());
    }
}
