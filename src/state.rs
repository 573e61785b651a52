//! Shared service graph construction. Both binaries (API plane and worker
//! plane) build the same set of services from `Settings`; this module is
//! the single place that wires them together so the two processes never
//! drift apart on how a dependency is constructed.

use std::sync::Arc;

use crate::config::Settings;
use crate::database::{DbPool, Repository};
use crate::jobs::JobQueue;
use crate::retrieval::RagRetriever;
use crate::router::QueryRouter;
use crate::services::embedding_service::EmbeddingService;
use crate::services::llm_service::{build_llm_client, LlmClient};
use crate::services::reranker::{build_reranker, Reranker};
use crate::services::tag::{PgTagExecutor, TagExecutor};
use crate::services::PromptRegistry;
use crate::utils::limiters::Limiters;
use crate::vector::{RestVectorIndex, VectorIndex};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub db_pool: DbPool,
    pub repository: Arc<Repository>,
    pub embedding: Arc<EmbeddingService>,
    pub llm: Arc<dyn LlmClient>,
    pub vector_index: Arc<dyn VectorIndex>,
    pub reranker: Arc<dyn Reranker>,
    pub prompts: Arc<PromptRegistry>,
    pub tag_executor: Arc<dyn TagExecutor>,
    pub rag_retriever: Arc<RagRetriever>,
    pub query_router: Arc<QueryRouter>,
    pub jobs: Arc<JobQueue>,
}

impl AppState {
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let db_pool = DbPool::new(&settings.database).await?;
        let repository = Arc::new(Repository::new(db_pool.clone()));

        let limiters = Arc::new(Limiters::new(&settings.worker));
        let embedding = Arc::new(EmbeddingService::new(settings.embedding.clone(), limiters.clone()));
        let llm: Arc<dyn LlmClient> = Arc::from(build_llm_client(&settings.llm));
        let vector_index: Arc<dyn VectorIndex> = Arc::new(RestVectorIndex::new(&settings.vector_index));
        let reranker: Arc<dyn Reranker> = Arc::from(build_reranker(&settings.reranker));
        let prompts = Arc::new(PromptRegistry::seed(&settings.prompts.seed_path)?);
        let tag_executor: Arc<dyn TagExecutor> = Arc::new(PgTagExecutor::new(db_pool.clone()));

        let rag_retriever = Arc::new(RagRetriever::new(
            repository.clone(),
            embedding.clone(),
            vector_index.clone(),
            llm.clone(),
            reranker.clone(),
            prompts.clone(),
            settings.vector_index.clone(),
        ));

        let query_router = Arc::new(QueryRouter::new(
            embedding.clone(),
            vector_index.clone(),
            llm.clone(),
            prompts.clone(),
            rag_retriever.clone(),
            tag_executor.clone(),
            settings.vector_index.clone(),
        ));

        let jobs = Arc::new(JobQueue::new(db_pool.clone(), settings.worker.clone()));

        Ok(Self {
            settings,
            db_pool,
            repository,
            embedding,
            llm,
            vector_index,
            reranker,
            prompts,
            tag_executor,
            rag_retriever,
            query_router,
            jobs,
        })
    }
}
