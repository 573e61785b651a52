//! Document ingestion (spec.md §4.9): extract -> chunk -> embed -> upsert ->
//! summarize -> mark processed. The `PENDING -> PROCESSING` claim is the
//! idempotent re-entry guard: a job retried after a crash mid-run finds the
//! document already claimed by its first attempt and exits cleanly instead
//! of double-processing it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::database::Repository;
use crate::document::{ContentExtractor, Chunker};
use crate::models::domain::VectorRecord;
use crate::services::embedding_service::EmbeddingService;
use crate::services::llm_service::{ChatMessage, CompletionOptions, LlmClient};
use crate::services::prompt_registry::PromptRegistry;
use crate::utils::error::CoreError;
use crate::vector::VectorIndex;

pub struct DocumentIngestionPipeline {
    repository: Arc<Repository>,
    embedding: Arc<EmbeddingService>,
    vector_index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptRegistry>,
}

impl DocumentIngestionPipeline {
    pub fn new(
        repository: Arc<Repository>,
        embedding: Arc<EmbeddingService>,
        vector_index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmClient>,
        prompts: Arc<PromptRegistry>,
    ) -> Self {
        Self { repository, embedding, vector_index, llm, prompts }
    }

    pub async fn run(&self, document_id: i64, file_path: PathBuf) -> Result<(), CoreError> {
        let document = self
            .repository
            .get_document(document_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("document {}", document_id)))?;

        if !self.repository.claim_document_for_processing(document_id).await? {
            info!(document_id, "document already claimed, skipping");
            return Ok(());
        }

        let result = self.ingest(document_id, &document, &file_path).await;

        match result {
            Ok((chunk_count, summary)) => {
                self.repository.mark_document_processed(document_id, chunk_count as i32, &summary).await?;
                info!(document_id, chunk_count, "document ingestion complete");
                Ok(())
            }
            Err(e) => {
                warn!(document_id, error = %e, "document ingestion failed");
                self.repository.mark_document_failed(document_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn ingest(
        &self,
        document_id: i64,
        document: &crate::models::domain::Document,
        file_path: &PathBuf,
    ) -> Result<(usize, String), CoreError> {
        let content_type = document.detect_content_type(file_path);
        let file_path = file_path.clone();

        let extracted = tokio::task::spawn_blocking(move || ContentExtractor::extract(document_id, &file_path, content_type))
            .await
            .map_err(|e| CoreError::Internal(e.into()))??;

        let title = document.title.clone();
        let content = extracted.content.clone();
        let chunks = tokio::task::spawn_blocking(move || Chunker::chunk(document_id, &title, content_type, &content))
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        if chunks.is_empty() {
            return Err(CoreError::ExtractionFailed {
                document_id,
                message: "chunking produced zero chunks from extracted content".to_string(),
            });
        }

        let estimated_tokens = crate::utils::token_estimator::estimate_chunks_tokens(&chunks);
        info!(document_id, chunk_count = chunks.len(), estimated_tokens, "chunking complete");

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedding.embed_batch(texts).await?;

        let namespace = format!("kb_{}", document.knowledge_base_id);
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.vector_id(),
                vector,
                metadata: chunk_metadata(chunk, document_id),
            })
            .collect();

        self.vector_index.upsert(&namespace, records).await?;

        let summary = self.summarize(&document.title, &extracted.content).await?;

        let summary_vector = self.embedding.embed(&summary).await?;
        let mut summary_metadata = HashMap::new();
        summary_metadata.insert("document_id".to_string(), document_id.to_string());
        summary_metadata.insert("knowledge_base_id".to_string(), document.knowledge_base_id.to_string());
        summary_metadata.insert("doc_title".to_string(), document.title.clone());
        summary_metadata.insert("doc_type".to_string(), content_type.as_str().to_string());
        summary_metadata.insert("summary".to_string(), summary.clone());

        self.vector_index
            .upsert(
                "summaries",
                vec![VectorRecord { id: document_id.to_string(), vector: summary_vector, metadata: summary_metadata }],
            )
            .await?;

        Ok((chunks.len(), summary))
    }

    async fn summarize(&self, title: &str, content: &str) -> Result<String, CoreError> {
        const MAX_SUMMARY_INPUT_CHARS: usize = 6000;
        let truncated: String = content.chars().take(MAX_SUMMARY_INPUT_CHARS).collect();

        let mut vars = HashMap::new();
        vars.insert("title", title);
        vars.insert("content", truncated.as_str());
        let prompt = self.prompts.get("document", "summarize", &vars);

        if prompt.is_empty() {
            return Ok(truncated.chars().take(280).collect());
        }

        self.llm.complete(vec![ChatMessage::user(prompt)], CompletionOptions::default()).await
    }
}

fn chunk_metadata(chunk: &crate::models::domain::Chunk, document_id: i64) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("document_id".to_string(), document_id.to_string());
    metadata.insert("document_title".to_string(), chunk.document_title.clone());
    metadata.insert("chunk_index".to_string(), chunk.chunk_index.to_string());
    metadata.insert("size_class".to_string(), chunk.size_class.as_str().to_string());
    metadata.insert("content_type".to_string(), chunk.content_type.as_str().to_string());
    metadata.insert("nearest_header".to_string(), chunk.nearest_header.clone());
    metadata.insert("section_path".to_string(), chunk.section_path.join("/"));
    metadata.insert("content".to_string(), chunk.content.clone());
    metadata
}
