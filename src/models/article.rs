use serde::{Deserialize, Serialize};

/// A cached article, as persisted in the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub link: String,
    pub title: String,
    /// HTML fragment as delivered by the feed.
    pub description: String,
    pub content: String,
    /// RFC 3339 when it came from the fetcher; compared lexically.
    pub published_at: String,
    pub category: String,
    pub bookmarked: bool,
}

/// An item handed to the cache for ingest. Bookmark state is not part of it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewArticle {
    pub link: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub published_at: String,
    pub category: String,
}

impl NewArticle {
    pub fn new(link: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_published_at(mut self, published_at: impl Into<String>) -> Self {
        self.published_at = published_at.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }
}

impl From<ArticleRecord> for NewArticle {
    fn from(record: ArticleRecord) -> Self {
        Self {
            link: record.link,
            title: record.title,
            description: record.description,
            content: record.content,
            published_at: record.published_at,
            category: record.category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ArticleFilter {
    #[default]
    All,
    Bookmarked,
    Category(String),
}

impl ArticleFilter {
    pub fn label(&self) -> &str {
        match self {
            ArticleFilter::All => "All Articles",
            ArticleFilter::Bookmarked => "Bookmarked",
            ArticleFilter::Category(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_empty_optional_fields() {
        let article = NewArticle::new("https://a/1", "Title").with_category("news");
        assert_eq!(article.link, "https://a/1");
        assert_eq!(article.category, "news");
        assert!(article.description.is_empty());
        assert!(article.published_at.is_empty());
    }

    #[test]
    fn test_filter_labels() {
        assert_eq!(ArticleFilter::All.label(), "All Articles");
        assert_eq!(ArticleFilter::Bookmarked.label(), "Bookmarked");
        assert_eq!(ArticleFilter::Category("weather".into()).label(), "weather");
    }
}
