pub const SCHEMA: &str = r#"
-- articles table
CREATE TABLE IF NOT EXISTS articles (
    link TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    pubDate TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL DEFAULT '',
    isBookmarked INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_articles_pub_date ON articles(pubDate DESC);
CREATE INDEX IF NOT EXISTS idx_articles_category ON articles(category);
CREATE INDEX IF NOT EXISTS idx_articles_is_bookmarked ON articles(isBookmarked);
"#;

/// Column order read by `article_from_row`.
pub const ARTICLE_COLUMNS: &str =
    "link, title, description, content, pubDate, category, isBookmarked";
