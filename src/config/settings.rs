use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub vector_index: VectorIndexConfig,
    pub reranker: RerankerConfig,
    pub worker: WorkerConfig,
    pub prompts: PromptsConfig,
}

/// API-plane bind address. The only HTTP surface this core exposes is
/// health checks and an internal enqueue endpoint used by operators/tests;
/// the full CRUD/auth surface is an external collaborator (spec.md §1).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "openai" | "anthropic" | "gemini"
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorIndexConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub upsert_batch_size: usize,
    pub default_top_k: usize,
    pub similarity_threshold: f32,
    pub curated_threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub variant: String, // "cross_encoder" | "cohere" | "flag_embedding"
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub min_score: Option<f32>,
    pub normalize: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_fraction: f64,
    pub task_time_limit_secs: u64,
    pub recycle_after_n_tasks: u64,
    pub embedding_concurrency: usize,
    pub vector_search_concurrency: usize,
    pub llm_concurrency: usize,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub seed_path: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
