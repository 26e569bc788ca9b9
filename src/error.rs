use thiserror::Error;

/// Failures surfaced by the article cache (record store, text index and the
/// coordinator in front of them). Raw engine errors are converted into one of
/// these before they leave `db` or `search`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("invalid search query: {0}")]
    QuerySyntax(String),

    #[error("invalid article: {0}")]
    InvalidRecord(String),
}

impl From<tokio_rusqlite::Error> for CacheError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        CacheError::StorageUnavailable(e.to_string())
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::StorageUnavailable(e.to_string())
    }
}

impl From<tantivy::TantivyError> for CacheError {
    fn from(e: tantivy::TantivyError) -> Self {
        CacheError::StorageUnavailable(e.to_string())
    }
}

impl From<tantivy::directory::error::OpenDirectoryError> for CacheError {
    fn from(e: tantivy::directory::error::OpenDirectoryError) -> Self {
        CacheError::StorageUnavailable(e.to_string())
    }
}

impl From<tantivy::query::QueryParserError> for CacheError {
    fn from(e: tantivy::query::QueryParserError) -> Self {
        CacheError::QuerySyntax(e.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        CacheError::StorageUnavailable(format!("index task failed: {e}"))
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
