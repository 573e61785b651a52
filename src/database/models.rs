//! Database row shapes. The core's domain types (`crate::models::domain`)
//! double as the row types for the common case (`FromRow` derived there);
//! this module adds the handful of query-specific projections that don't
//! map onto a single domain struct.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub use crate::models::domain::{Document, KnowledgeBase, Message, Question};

/// Row shape for document preselection (spec.md §4.12 step 1): title and
/// the stored document summary, truncated by the caller before prompting.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocumentSummaryRow {
    pub document_id: i64,
    pub title: String,
    pub summary: String,
}

/// Row shape used when listing a knowledge base's curated questions for
/// cascade deletion / reindexing.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionRow {
    pub id: i64,
    pub knowledge_base_id: i64,
    pub question: String,
    pub answer: String,
    pub answer_kind: String,
    pub status: String,
}
