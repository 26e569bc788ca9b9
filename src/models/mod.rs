mod article;

pub use article::{ArticleFilter, ArticleRecord, NewArticle};
