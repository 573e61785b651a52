//! Knowledge base deletion (spec.md §5, SUPPLEMENTED FEATURES item 5): the
//! metadata-store cascade removes the SQL rows synchronously; vector
//! cleanup is enqueued per document/question rather than performed inline,
//! so a single unreachable vector-index call can't block or fail the
//! cascade — spec.md §5 explicitly tolerates orphaned vector records, never
//! orphaned rows. The enqueued jobs run `delete_document_vectors` /
//! `delete_question_vector`, retried independently by the JobQueue.

use std::sync::Arc;

use tracing::{info, warn};

use crate::database::Repository;
use crate::jobs::JobQueue;
use crate::utils::error::CoreError;
use crate::vector::{DeleteSelector, Filter, VectorIndex};

pub struct DeletionPipeline {
    repository: Arc<Repository>,
    jobs: Arc<JobQueue>,
}

impl DeletionPipeline {
    pub fn new(repository: Arc<Repository>, jobs: Arc<JobQueue>) -> Self {
        Self { repository, jobs }
    }

    pub async fn run(&self, knowledge_base_id: i64) -> Result<(), CoreError> {
        let question_ids: Vec<i64> = self
            .repository
            .list_questions(knowledge_base_id)
            .await?
            .into_iter()
            .map(|q| q.id)
            .collect();

        let document_ids = self.repository.delete_knowledge_base_cascade(knowledge_base_id).await?;

        for document_id in &document_ids {
            let args = serde_json::json!({ "knowledge_base_id": knowledge_base_id, "document_id": document_id });
            if let Err(e) = self.jobs.enqueue("delete_document_vectors", args).await {
                warn!(knowledge_base_id, document_id, error = %e, "failed to enqueue vector deletion");
            }
        }

        for question_id in &question_ids {
            let args = serde_json::json!({ "knowledge_base_id": knowledge_base_id, "question_id": question_id });
            if let Err(e) = self.jobs.enqueue("delete_question_vector", args).await {
                warn!(knowledge_base_id, question_id, error = %e, "failed to enqueue vector deletion");
            }
        }

        info!(knowledge_base_id, documents = document_ids.len(), questions = question_ids.len(), "knowledge base rows deleted, vector cleanup enqueued");
        Ok(())
    }
}

/// Worker-bound handler: delete every vector record tagged with
/// `document_id` (chunks across all size classes plus the summary record).
pub async fn delete_document_vectors(vector_index: Arc<dyn VectorIndex>, knowledge_base_id: i64, document_id: i64) -> Result<(), CoreError> {
    let namespace = format!("kb_{}", knowledge_base_id);
    let selector = DeleteSelector::Filter(Filter::new().eq("document_id", document_id.to_string()));
    vector_index.delete(&namespace, selector).await
}

/// Worker-bound handler: delete a single curated question's vector record.
pub async fn delete_question_vector(vector_index: Arc<dyn VectorIndex>, knowledge_base_id: i64, question_id: i64) -> Result<(), CoreError> {
    let namespace = format!("kb_{}_questions", knowledge_base_id);
    vector_index.delete(&namespace, DeleteSelector::Ids(vec![format!("question:{}", question_id)])).await
}
