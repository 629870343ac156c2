//! Dense (semantic) search: query embedding + nearest-neighbour lookup

use super::{guarded, validate_search, Backend, SearchFilter, SearchOutcome};
use async_trait::async_trait;
use chrono::NaiveDate;
use lexforge_common::db::DbPool;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::{Document, Embedder};
use sea_orm::{DbBackend, FromQueryResult, Statement};
use std::sync::Arc;
use std::time::Duration;

/// Nearest-neighbour index over passage embeddings
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Up to `k` documents closest to `vector`, best first, with similarity scores
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(Document, f32)>>;
}

/// Embeds the query, then asks the vector store for neighbours
pub struct DenseSearch {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    filter: SearchFilter,
    timeout: Duration,
}

impl DenseSearch {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        filter: SearchFilter,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            filter,
            timeout,
        }
    }

    /// Ranked candidates for `query`; embedding or store failures degrade.
    ///
    /// The timeout covers both the embedding call and the lookup.
    pub async fn search(&self, query: &str, k: usize) -> Result<SearchOutcome> {
        validate_search(query, k)?;

        let call = async {
            let vector = self.embedder.embed(query).await?;
            self.store.nearest(&vector, k, &self.filter).await
        };

        Ok(guarded(Backend::Dense, self.timeout, k, call).await)
    }
}

/// pgvector-backed store reading the ingestion job's passage table
pub struct PgVectorStore {
    db: Arc<DbPool>,
    table: String,
}

/// Query result row
#[derive(Debug, FromQueryResult)]
struct PassageRow {
    id: String,
    content: String,
    source_name: String,
    chapter: Option<String>,
    section: Option<String>,
    is_effective: bool,
    effective_date: Option<NaiveDate>,
    score: f64,
}

impl PgVectorStore {
    pub fn new(db: Arc<DbPool>, table: &str) -> Result<Self> {
        if !valid_table_name(table) {
            return Err(AppError::Configuration {
                message: format!("Invalid passage table name '{}'", table),
            });
        }

        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    /// Build the nearest-neighbour SQL; `$1` is the query vector, `$2` the limit
    fn build_query(&self, filter: &SearchFilter) -> String {
        let where_clause = if filter.effective_only {
            "WHERE is_effective = TRUE"
        } else {
            ""
        };

        format!(
            r#"
            SELECT
                id,
                content,
                source_name,
                chapter,
                section,
                is_effective,
                effective_date,
                1 - (embedding <=> $1::vector) AS score
            FROM {table}
            {where_clause}
            ORDER BY embedding <=> $1::vector
            LIMIT $2
            "#,
            table = self.table,
            where_clause = where_clause,
        )
    }
}

/// Plain or schema-qualified identifier; the name is interpolated into SQL
fn valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// pgvector text literal, e.g. `[0.1,0.2,0.3]`
fn vector_literal(vector: &[f32]) -> String {
    format!(
        "[{}]",
        vector
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(Document, f32)>> {
        let sql = self.build_query(filter);

        let rows = PassageRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            &sql,
            vec![vector_literal(vector).into(), (k as i64).into()],
        ))
        .all(self.db.read())
        .await
        .map_err(|e| AppError::SearchBackend {
            backend: "pgvector".to_string(),
            message: format!("Vector search failed: {}", e),
        })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let document = Document {
                    id: row.id,
                    content: row.content,
                    source_name: row.source_name,
                    chapter: row.chapter,
                    section: row.section,
                    is_effective: row.is_effective,
                    effective_date: row.effective_date,
                };
                (document, row.score as f32)
            })
            .collect())
    }
}
