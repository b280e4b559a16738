//! Tantivy index over missions.
//!
//! Powers the `q` filter of the mission list: the whole query, lowercased, must appear somewhere
//! in a mission's title, location or description. Each field is stored as one lowercased term
//! and matched with a regex, so partial words match and extra words narrow the result.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, RegexQuery};
use tantivy::schema::{Field, Schema, Value, STORED, STRING};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Mission;

const BOOST_TITLE: f32 = 10.0;
const BOOST_LOCATION: f32 = 6.0;
const BOOST_DESCRIPTION: f32 = 4.0;

/// A matching mission and its relevance.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub mission_id: String,
    pub score: f32,
}

struct SearchFields {
    mission_id: Field,
    title: Field,
    location: Field,
    description: Field,
}

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

/// Lowercased single-line form of `text`, as indexed and as searched.
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\n', '\r'], " ")
}

/// `text` as a regex literal.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let mission_id = schema_builder.add_text_field("mission_id", STRING | STORED);
        let title = schema_builder.add_text_field("title", STRING);
        let location = schema_builder.add_text_field("location", STRING);
        let description = schema_builder.add_text_field("description", STRING);
        let schema = schema_builder.build();

        let fields = SearchFields {
            mission_id,
            title,
            location,
            description,
        };

        let index = match Index::open_in_dir(index_path) {
            Ok(index) if index.schema() == schema => Ok(index),
            Ok(_) => {
                tracing::warn!("Search index layout changed, recreating it");
                std::fs::remove_dir_all(index_path)
                    .and_then(|_| std::fs::create_dir_all(index_path))
                    .map_err(|e| AppError::Search(format!("Failed to reset index: {}", e)))?;
                Index::create_in_dir(index_path, schema)
            }
            Err(_) => Index::create_in_dir(index_path, schema),
        }
        .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000)
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Replace the whole index with `missions`.
    pub async fn rebuild(&self, missions: &[Mission]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for mission in missions {
            writer.add_document(self.document(mission))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} missions", missions.len());
        Ok(())
    }

    /// Index or re-index one mission.
    pub async fn index_mission(&self, mission: &Mission) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.mission_id, &mission.id));
        writer.add_document(self.document(mission))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Every mission containing `query_str`, best first.
    pub fn search_all(&self, query_str: &str) -> Result<Vec<SearchHit>, AppError> {
        self.search(query_str, usize::MAX)
    }

    /// Up to `limit` missions containing `query_str`, best first. Title matches rank highest.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<SearchHit>, AppError> {
        let needle = normalize(query_str.trim());
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let limit = limit.min(searcher.num_docs() as usize);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let pattern = format!(".*{}.*", escape(&needle));
        let weighted = [
            (self.fields.title, BOOST_TITLE),
            (self.fields.location, BOOST_LOCATION),
            (self.fields.description, BOOST_DESCRIPTION),
        ];

        let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in weighted {
            let field_query = RegexQuery::from_pattern(&pattern, field)
                .map_err(|e| AppError::Search(format!("Invalid search text: {}", e)))?;
            subqueries.push((
                Occur::Should,
                Box::new(BoostQuery::new(Box::new(field_query), boost)),
            ));
        }
        let combined = BooleanQuery::new(subqueries);

        let top_docs = searcher
            .search(&combined, &TopDocs::with_limit(limit))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let hits = top_docs
            .into_iter()
            .filter_map(|(score, address)| {
                let doc: TantivyDocument = searcher.doc(address).ok()?;
                let mission_id = doc.get_first(self.fields.mission_id)?.as_str()?.to_string();
                Some(SearchHit { mission_id, score })
            })
            .collect();

        Ok(hits)
    }

    fn document(&self, mission: &Mission) -> TantivyDocument {
        doc!(
            self.fields.mission_id => mission.id.clone(),
            self.fields.title => normalize(&mission.title),
            self.fields.location => normalize(&mission.location),
            self.fields.description => normalize(&mission.description)
        )
    }
}
