//! Curated-question ingestion (spec.md §4.9 variant for the Q&A shortcut
//! path): embed the question text once and upsert it into the
//! `kb_{id}_questions` namespace the router's curated-match probe reads
//! from. No chunking — a curated question is always a single vector.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::database::Repository;
use crate::models::domain::VectorRecord;
use crate::services::embedding_service::EmbeddingService;
use crate::utils::error::CoreError;
use crate::vector::VectorIndex;

pub struct QuestionIngestionPipeline {
    repository: Arc<Repository>,
    embedding: Arc<EmbeddingService>,
    vector_index: Arc<dyn VectorIndex>,
}

impl QuestionIngestionPipeline {
    pub fn new(repository: Arc<Repository>, embedding: Arc<EmbeddingService>, vector_index: Arc<dyn VectorIndex>) -> Self {
        Self { repository, embedding, vector_index }
    }

    pub async fn run(&self, question_id: i64) -> Result<(), CoreError> {
        let question = self
            .repository
            .get_question(question_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("question {}", question_id)))?;

        if !self.repository.claim_question_for_ingesting(question_id).await? {
            info!(question_id, "question already claimed, skipping");
            return Ok(());
        }

        match self.ingest(&question).await {
            Ok(()) => {
                self.repository.mark_question_completed(question_id).await?;
                info!(question_id, "question ingestion complete");
                Ok(())
            }
            Err(e) => {
                warn!(question_id, error = %e, "question ingestion failed");
                self.repository.mark_question_failed(question_id).await?;
                Err(e)
            }
        }
    }

    async fn ingest(&self, question: &crate::models::domain::Question) -> Result<(), CoreError> {
        let embedded_text = format!("Question: {}\nAnswer: {}", question.question, question.answer);
        let vector = self.embedding.embed(&embedded_text).await?;

        let knowledge_base = self.repository.get_knowledge_base(question.knowledge_base_id).await?;
        let user_id = knowledge_base.map(|kb| kb.owner_id.to_string()).unwrap_or_default();

        let mut metadata = HashMap::new();
        metadata.insert("question_id".to_string(), question.id.to_string());
        metadata.insert("knowledge_base_id".to_string(), question.knowledge_base_id.to_string());
        metadata.insert("answer_type".to_string(), question.answer_kind.clone());
        metadata.insert("question".to_string(), question.question.clone());
        metadata.insert("answer".to_string(), question.answer.clone());
        metadata.insert("user_id".to_string(), user_id);

        let namespace = format!("kb_{}_questions", question.knowledge_base_id);
        let record = VectorRecord { id: format!("question:{}", question.id), vector, metadata };

        self.vector_index.upsert(&namespace, vec![record]).await
    }
}
