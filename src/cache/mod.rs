mod coordinator;

pub use coordinator::{ArticleCache, IngestReport};
