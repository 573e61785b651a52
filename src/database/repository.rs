use super::models::{DocumentSummaryRow, QuestionRow};
use super::DbPool;
use crate::models::domain::{Document, KnowledgeBase, Message, Question};
use crate::utils::error::CoreError;
use tracing::debug;

/// The metadata store the core requires: transactional insert / get-by-id /
/// list-by-parent / update-subset-of-columns / delete-by-id / delete-by-filter
/// per entity (spec.md §6), implemented here against PostgreSQL. Status
/// transitions are precondition-guarded rather than locked (spec.md §9).
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_document(&self, document_id: i64) -> Result<Option<Document>, CoreError> {
        sqlx::query_as::<_, Document>(
            r#"SELECT id, knowledge_base_id, title, content_type, status,
                      processed_chunk_count, summary, error_message, created_at
               FROM documents WHERE id = $1"#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))
    }

    /// Atomically transition `PENDING -> PROCESSING`. Returns `false`
    /// (PreconditionFailed semantics, no state change) if the document was
    /// not in PENDING — either already claimed by another worker or not in
    /// a startable state. This is the idempotent re-entry guard spec.md
    /// §4.9 step 2 requires.
    pub async fn claim_document_for_processing(&self, document_id: i64) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'PROCESSING' WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(document_id)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_document_processed(
        &self,
        document_id: i64,
        chunk_count: i32,
        summary: &str,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE documents SET status = 'PROCESSED', processed_chunk_count = $2,
                      summary = $3, error_message = NULL
               WHERE id = $1 AND status = 'PROCESSING'"#,
        )
        .bind(document_id)
        .bind(chunk_count)
        .bind(summary)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        debug!(document_id, chunk_count, "document marked PROCESSED");
        Ok(())
    }

    pub async fn mark_document_failed(&self, document_id: i64, error_message: &str) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE documents SET status = 'FAILED', error_message = $2 WHERE id = $1",
        )
        .bind(document_id)
        .bind(error_message)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Operator-only reset used to re-run ingestion after a FAILED
    /// terminal state (spec.md §4.9 "Idempotence").
    pub async fn reset_document_to_pending(&self, document_id: i64) -> Result<(), CoreError> {
        sqlx::query("UPDATE documents SET status = 'PENDING', error_message = NULL WHERE id = $1")
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn get_question(&self, question_id: i64) -> Result<Option<Question>, CoreError> {
        sqlx::query_as::<_, Question>(
            "SELECT id, knowledge_base_id, question, answer, answer_kind, status FROM questions WHERE id = $1",
        )
        .bind(question_id)
        .fetch_optional(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))
    }

    pub async fn claim_question_for_ingesting(&self, question_id: i64) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE questions SET status = 'INGESTING' WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(question_id)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_question_completed(&self, question_id: i64) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE questions SET status = 'COMPLETED' WHERE id = $1 AND status = 'INGESTING'",
        )
        .bind(question_id)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn mark_question_failed(&self, question_id: i64) -> Result<(), CoreError> {
        sqlx::query("UPDATE questions SET status = 'FAILED' WHERE id = $1")
            .bind(question_id)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    pub async fn list_document_summaries(
        &self,
        knowledge_base_id: i64,
        limit: i64,
    ) -> Result<Vec<DocumentSummaryRow>, CoreError> {
        sqlx::query_as::<_, DocumentSummaryRow>(
            r#"SELECT id AS document_id, title, COALESCE(summary, '') AS summary
               FROM documents
               WHERE knowledge_base_id = $1 AND status = 'PROCESSED'
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(knowledge_base_id)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))
    }

    pub async fn list_questions(&self, knowledge_base_id: i64) -> Result<Vec<QuestionRow>, CoreError> {
        sqlx::query_as::<_, QuestionRow>(
            "SELECT id, knowledge_base_id, question, answer, answer_kind, status FROM questions WHERE knowledge_base_id = $1",
        )
        .bind(knowledge_base_id)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))
    }

    pub async fn get_message(&self, message_id: i64) -> Result<Option<Message>, CoreError> {
        sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, status, content, sources, metadata FROM messages WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))
    }

    pub async fn write_message_result(
        &self,
        message_id: i64,
        status: &str,
        content: &str,
        sources: serde_json::Value,
        metadata: serde_json::Value,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE messages SET status = $2, content = $3, sources = $4, metadata = $5
               WHERE id = $1"#,
        )
        .bind(message_id)
        .bind(status)
        .bind(content)
        .bind(sources)
        .bind(metadata)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Cascading deletion of a knowledge base, in the order spec.md §5
    /// mandates: messages -> conversations -> documents (vector deletion is
    /// enqueued by the caller per document, not performed here) -> curated
    /// questions -> the knowledge base row itself. Each step is its own
    /// statement rather than one giant transaction, so a partial failure
    /// leaves a consistent, orphan-tolerant state (spec.md §5).
    pub async fn delete_knowledge_base_cascade(&self, knowledge_base_id: i64) -> Result<Vec<i64>, CoreError> {
        let document_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE knowledge_base_id = $1",
        )
        .bind(knowledge_base_id)
        .fetch_all(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query(
            r#"DELETE FROM messages WHERE conversation_id IN
               (SELECT id FROM conversations WHERE knowledge_base_id = $1)"#,
        )
        .bind(knowledge_base_id)
        .execute(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query("DELETE FROM conversations WHERE knowledge_base_id = $1")
            .bind(knowledge_base_id)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query("DELETE FROM documents WHERE knowledge_base_id = $1")
            .bind(knowledge_base_id)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query("DELETE FROM questions WHERE knowledge_base_id = $1")
            .bind(knowledge_base_id)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        sqlx::query("DELETE FROM knowledge_bases WHERE id = $1")
            .bind(knowledge_base_id)
            .execute(self.pool.get_pool())
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        debug!(knowledge_base_id, documents = document_ids.len(), "cascade deletion complete");
        Ok(document_ids)
    }

    pub async fn get_knowledge_base(&self, id: i64) -> Result<Option<KnowledgeBase>, CoreError> {
        sqlx::query_as::<_, KnowledgeBase>(
            "SELECT id, owner_id, name, created_at FROM knowledge_bases WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.get_pool())
        .await
        .map_err(|e| CoreError::Internal(e.into()))
    }
}
