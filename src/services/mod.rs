pub mod embedding_service;
pub mod llm_service;
pub mod prompt_registry;
pub mod query_analyzer;
pub mod reranker;
pub mod tag;

pub use embedding_service::EmbeddingService;
pub use llm_service::{build_llm_client, ChatMessage, CompletionOptions, LlmClient};
pub use prompt_registry::PromptRegistry;
pub use query_analyzer::{QueryAnalyzer, QueryIntent};
pub use reranker::{build_reranker, Reranker, RerankCandidate, RerankedCandidate};
pub use tag::{PgTagExecutor, TagExecutor, TagResult};
