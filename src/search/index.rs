use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, QueryParser};
use tantivy::schema::{Field, Schema, Term, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use crate::error::CacheError;
use crate::models::NewArticle;

/// Maximum number of links returned by a single search.
pub const SEARCH_LIMIT: usize = 100;

const WRITER_HEAP_BYTES: usize = 50_000_000;
const TITLE_BOOST: f32 = 2.0;
// Wide enough that html2text does not refuse narrow layouts.
const TEXT_RENDER_WIDTH: usize = 200;

#[derive(Clone, Copy)]
struct Fields {
    link: Field,
    title: Field,
    description: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let link = builder.add_text_field("link", STRING | STORED);
    let title = builder.add_text_field("title", TEXT);
    let description = builder.add_text_field("description", TEXT);
    (
        builder.build(),
        Fields {
            link,
            title,
            description,
        },
    )
}

/// Full-text index over article titles and descriptions.
///
/// Documents are keyed by the untokenized `link` field, which is the only
/// stored field: a search yields links, not articles.
pub struct TextIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl TextIndex {
    /// Open the index in `dir`, creating the directory and an empty index if
    /// they do not exist yet.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| CacheError::StorageUnavailable(e.to_string()))?;

        let (schema, fields) = build_schema();
        let directory = MmapDirectory::open(dir)?;
        let index = Index::open_or_create(directory, schema)?;

        tracing::debug!(path = %dir.display(), "opened search index");
        Self::from_index(index, fields)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        let (schema, fields) = build_schema();
        Self::from_index(Index::create_in_ram(schema), fields)
    }

    fn from_index(index: Index, fields: Fields) -> Result<Self, CacheError> {
        let writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    /// Replace whatever is indexed under `article.link` with the article's
    /// current text. Visible to searches once this returns.
    pub fn index_or_replace(&self, article: &NewArticle) -> Result<(), CacheError> {
        self.index_batch(std::slice::from_ref(article)).map(|_| ())
    }

    /// Replace many documents under a single commit. Either every document in
    /// the batch becomes visible or none does.
    pub fn index_batch(&self, articles: &[NewArticle]) -> Result<usize, CacheError> {
        if articles.is_empty() {
            return Ok(0);
        }
        self.commit_batch(articles, false)
    }

    /// Drop every document and index `articles` in their place, under one
    /// commit.
    pub fn rebuild(&self, articles: &[NewArticle]) -> Result<usize, CacheError> {
        self.commit_batch(articles, true)
    }

    fn commit_batch(&self, articles: &[NewArticle], clear: bool) -> Result<usize, CacheError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CacheError::StorageUnavailable("index writer lock poisoned".to_string()))?;

        let staged = if clear {
            writer
                .delete_all_documents()
                .map_err(CacheError::from)
                .and_then(|_| self.stage(&writer, articles))
        } else {
            self.stage(&writer, articles)
        };
        if let Err(e) = staged {
            rollback(&mut writer);
            return Err(e);
        }
        if let Err(e) = writer.commit() {
            rollback(&mut writer);
            return Err(e.into());
        }
        drop(writer);

        self.reader.reload()?;
        tracing::debug!(count = articles.len(), clear, "committed search index batch");
        Ok(articles.len())
    }

    fn stage(&self, writer: &IndexWriter, articles: &[NewArticle]) -> Result<(), CacheError> {
        for article in articles {
            writer.delete_term(Term::from_field_text(self.fields.link, &article.link));
            writer.add_document(doc!(
                self.fields.link => article.link.as_str(),
                self.fields.title => article.title.as_str(),
                self.fields.description => plain_text(&article.description),
            ))?;
        }
        Ok(())
    }

    /// Ranked links for `query_text`, best match first.
    ///
    /// Bare terms match title or description; `title:` and `description:`
    /// restrict a term to one field; quoted text is a phrase.
    pub fn search(&self, query_text: &str) -> Result<Vec<String>, CacheError> {
        let mut parser =
            QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.description]);
        parser.set_field_boost(self.fields.title, TITLE_BOOST);
        let query = parser.parse_query(query_text)?;

        let searcher = self.reader.searcher();
        let hits = match searcher.search(&query, &TopDocs::with_limit(SEARCH_LIMIT)) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(query = query_text, error = %e, "search failed");
                return Ok(Vec::new());
            }
        };

        let mut links = Vec::with_capacity(hits.len());
        for (_score, address) in hits {
            match searcher.doc::<TantivyDocument>(address) {
                Ok(document) => {
                    if let Some(link) = document
                        .get_first(self.fields.link)
                        .and_then(|value| value.as_str())
                    {
                        links.push(link.to_string());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to load search hit"),
            }
        }
        Ok(links)
    }

    /// Every indexed link.
    pub fn links(&self) -> Result<HashSet<String>, CacheError> {
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;

        let mut links = HashSet::with_capacity(addresses.len());
        for address in addresses {
            let document: TantivyDocument = searcher.doc(address)?;
            if let Some(link) = document
                .get_first(self.fields.link)
                .and_then(|value| value.as_str())
            {
                links.insert(link.to_string());
            }
        }
        Ok(links)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

fn rollback(writer: &mut IndexWriter) {
    if let Err(e) = writer.rollback() {
        tracing::error!(error = %e, "failed to roll back search index writer");
    }
}

/// Descriptions arrive as HTML fragments; index what a reader would see.
fn plain_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    html2text::from_read(html.as_bytes(), TEXT_RENDER_WIDTH).unwrap_or_else(|_| html.to_string())
}
