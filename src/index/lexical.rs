use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexWriter, ReloadPolicy};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{SearchFilters, Visibility};

/// Document projection handed to the lexical index.
#[derive(Debug, Clone)]
pub struct LexicalDoc {
    pub id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub hashtags: BTreeSet<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LexicalMatch {
    pub id: Uuid,
    pub score: f32,
}

/// Token/prefix based text lookup. Written only through the indexing paths;
/// queries rank by term relevance (BM25).
pub trait LexicalIndex: Send + Sync {
    fn index_content(&self, doc: LexicalDoc) -> Result<(), CoreError>;
    fn delete(&self, id: Uuid) -> Result<(), CoreError>;
    fn query(
        &self,
        text: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<LexicalMatch>, CoreError>;
}

/// BM25 lexical index built on tantivy.
pub struct TantivyLexicalIndex {
    index: Index,
    f_content_id: Field,
    f_author_id: Field,
    f_body: Field,
    f_hashtags: Field,
    f_visibility: Field,
    f_created_at: Field,
}

impl TantivyLexicalIndex {
    /// Create or open the index at the given directory.
    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let mut schema_builder = Schema::builder();
        let f_content_id = schema_builder.add_text_field("content_id", STRING | STORED);
        let f_author_id = schema_builder.add_text_field("author_id", STRING | STORED);
        let f_body = schema_builder.add_text_field("body", TEXT);
        let f_hashtags = schema_builder.add_text_field("hashtags", TEXT | STORED);
        let f_visibility = schema_builder.add_text_field("visibility", STRING | STORED);
        let f_created_at = schema_builder.add_i64_field("created_at", STORED);

        let schema = schema_builder.build();

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir).context("Failed to open existing tantivy index")?
        } else {
            Index::create_in_dir(index_dir, schema).context("Failed to create tantivy index")?
        };

        Ok(Self {
            index,
            f_content_id,
            f_author_id,
            f_body,
            f_hashtags,
            f_visibility,
            f_created_at,
        })
    }

    fn writer(&self) -> Result<IndexWriter, CoreError> {
        self.index
            .writer(50_000_000)
            .map_err(|e| CoreError::TransientIndex(format!("index writer: {e}")))
    }
}

fn visibility_str(v: Visibility) -> &'static str {
    match v {
        Visibility::Public => "public",
        Visibility::Followers => "followers",
        Visibility::Private => "private",
    }
}

impl LexicalIndex for TantivyLexicalIndex {
    /// Replace the entry for `doc.id`. A mutation invalidates the previous
    /// lexical entry, so delete-then-add runs inside one commit.
    fn index_content(&self, content: LexicalDoc) -> Result<(), CoreError> {
        let mut writer = self.writer()?;

        let term = tantivy::Term::from_field_text(self.f_content_id, &content.id.to_string());
        writer.delete_term(term);

        let hashtags = content
            .hashtags
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        writer
            .add_document(doc!(
                self.f_content_id => content.id.to_string(),
                self.f_author_id => content.author_id.to_string(),
                self.f_body => content.body,
                self.f_hashtags => hashtags,
                self.f_visibility => visibility_str(content.visibility).to_string(),
                self.f_created_at => content.created_at.timestamp(),
            ))
            .map_err(|e| CoreError::TransientIndex(format!("index write: {e}")))?;

        writer
            .commit()
            .map_err(|e| CoreError::TransientIndex(format!("index commit: {e}")))?;
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        let mut writer = self.writer()?;
        let term = tantivy::Term::from_field_text(self.f_content_id, &id.to_string());
        writer.delete_term(term);
        writer
            .commit()
            .map_err(|e| CoreError::TransientIndex(format!("delete commit: {e}")))?;
        Ok(())
    }

    fn query(
        &self,
        text: &str,
        filters: &SearchFilters,
        top_k: usize,
    ) -> Result<Vec<LexicalMatch>, CoreError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| CoreError::TransientIndex(format!("index reader: {e}")))?;

        let searcher = reader.searcher();

        let query_parser =
            QueryParser::for_index(&self.index, vec![self.f_body, self.f_hashtags]);
        // Lenient parse: free text from users may carry query-syntax
        // characters, which must not fail the request.
        let (query, _errors) = query_parser.parse_query_lenient(text);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(top_k * 2))
            .map_err(|e| CoreError::TransientIndex(format!("lexical search: {e}")))?;

        let mut hits = Vec::new();

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| CoreError::TransientIndex(format!("doc fetch: {e}")))?;

            let id_str = doc
                .get_first(self.f_content_id)
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let id = match Uuid::parse_str(id_str) {
                Ok(id) => id,
                Err(_) => continue,
            };

            if let Some(author_id) = filters.author_id {
                let stored = doc
                    .get_first(self.f_author_id)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if stored != author_id.to_string() {
                    continue;
                }
            }

            if let Some(visibility) = filters.visibility {
                let stored = doc
                    .get_first(self.f_visibility)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if stored != visibility_str(visibility) {
                    continue;
                }
            }

            if filters.after.is_some() || filters.before.is_some() {
                let ts = doc
                    .get_first(self.f_created_at)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                let created_at = Utc
                    .timestamp_opt(ts, 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                if filters.after.map(|t| created_at < t).unwrap_or(false) {
                    continue;
                }
                if filters.before.map(|t| created_at > t).unwrap_or(false) {
                    continue;
                }
            }

            if let Some(hashtag) = &filters.hashtag {
                let stored = doc
                    .get_first(self.f_hashtags)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if !stored.split_whitespace().any(|tag| tag == hashtag) {
                    continue;
                }
            }

            hits.push(LexicalMatch { id, score });
            if hits.len() >= top_k {
                break;
            }
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_doc(body: &str, hashtags: &[&str], visibility: Visibility) -> LexicalDoc {
        LexicalDoc {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            body: body.to_string(),
            hashtags: hashtags.iter().map(|t| t.to_string()).collect(),
            visibility,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_index_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let index = TantivyLexicalIndex::open_or_create(dir.path()).unwrap();

        let news = make_doc("breaking news about elections", &["news"], Visibility::Public);
        let pasta = make_doc("cooking pasta at home", &["food"], Visibility::Public);
        index.index_content(news.clone()).unwrap();
        index.index_content(pasta).unwrap();

        let hits = index
            .query("breaking", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, news.id);
    }

    #[test]
    fn test_reindex_replaces_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = TantivyLexicalIndex::open_or_create(dir.path()).unwrap();

        let mut content = make_doc("original wording", &[], Visibility::Public);
        index.index_content(content.clone()).unwrap();

        content.body = "revised wording".to_string();
        index.index_content(content.clone()).unwrap();

        assert!(index
            .query("original", &SearchFilters::default(), 10)
            .unwrap()
            .is_empty());
        let hits = index
            .query("revised", &SearchFilters::default(), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, content.id);
    }

    #[test]
    fn test_delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let index = TantivyLexicalIndex::open_or_create(dir.path()).unwrap();

        let content = make_doc("ephemeral thought", &[], Visibility::Public);
        index.index_content(content.clone()).unwrap();
        index.delete(content.id).unwrap();

        assert!(index
            .query("ephemeral", &SearchFilters::default(), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_visibility_filter() {
        let dir = tempfile::tempdir().unwrap();
        let index = TantivyLexicalIndex::open_or_create(dir.path()).unwrap();

        let public = make_doc("shared update", &[], Visibility::Public);
        let private = make_doc("shared secret update", &[], Visibility::Private);
        index.index_content(public.clone()).unwrap();
        index.index_content(private).unwrap();

        let filters = SearchFilters {
            visibility: Some(Visibility::Public),
            ..Default::default()
        };
        let hits = index.query("shared", &filters, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, public.id);
    }

    #[test]
    fn test_query_syntax_characters_do_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = TantivyLexicalIndex::open_or_create(dir.path()).unwrap();
        index
            .index_content(make_doc("plain text", &[], Visibility::Public))
            .unwrap();

        // Unbalanced quotes and operators from raw user input.
        assert!(index
            .query("\"unbalanced AND (", &SearchFilters::default(), 10)
            .is_ok());
    }
}
