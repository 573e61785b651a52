//! Worker plane (spec.md §5, SPEC_FULL.md §E): binds every background task
//! the core performs to the durable JobQueue and runs the poll loop
//! forever. The API plane only ever enqueues; every side effect happens
//! here.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info};

use docbrain_core::config::Settings;
use docbrain_core::jobs::TaskHandler;
use docbrain_core::pipelines::deletion_pipeline;
use docbrain_core::pipelines::{DeletionPipeline, DocumentIngestionPipeline, QuestionIngestionPipeline};
use docbrain_core::state::AppState;
use docbrain_core::utils::error::CoreError;

#[derive(Deserialize)]
struct IngestDocumentArgs {
    document_id: i64,
    file_path: String,
}

#[derive(Deserialize)]
struct IngestQuestionArgs {
    question_id: i64,
}

#[derive(Deserialize)]
struct AnswerQueryArgs {
    message_id: i64,
    knowledge_base_id: i64,
    query: String,
}

#[derive(Deserialize)]
struct DeleteKnowledgeBaseArgs {
    knowledge_base_id: i64,
}

#[derive(Deserialize)]
struct DeleteDocumentVectorsArgs {
    knowledge_base_id: i64,
    document_id: i64,
}

#[derive(Deserialize)]
struct DeleteQuestionVectorArgs {
    knowledge_base_id: i64,
    question_id: i64,
}

fn bad_args(e: serde_json::Error) -> CoreError {
    CoreError::Internal(anyhow::anyhow!("malformed job arguments: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info,docbrain_core=debug".to_string()))
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("starting docbrain worker plane");

    let settings = Settings::load()?;
    let state = AppState::build(settings).await?;
    info!("service graph initialized");

    let document_pipeline = Arc::new(DocumentIngestionPipeline::new(
        state.repository.clone(),
        state.embedding.clone(),
        state.vector_index.clone(),
        state.llm.clone(),
        state.prompts.clone(),
    ));

    let question_pipeline = Arc::new(QuestionIngestionPipeline::new(
        state.repository.clone(),
        state.embedding.clone(),
        state.vector_index.clone(),
    ));

    let deletion_pipeline_svc = Arc::new(DeletionPipeline::new(state.repository.clone(), state.jobs.clone()));

    {
        let pipeline = document_pipeline.clone();
        let handler: TaskHandler = Arc::new(move |args| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                let parsed: IngestDocumentArgs = serde_json::from_value(args).map_err(bad_args)?;
                pipeline.run(parsed.document_id, parsed.file_path.into()).await
            })
        });
        state.jobs.bind("ingest_document", handler);
    }

    {
        let pipeline = question_pipeline.clone();
        let handler: TaskHandler = Arc::new(move |args| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                let parsed: IngestQuestionArgs = serde_json::from_value(args).map_err(bad_args)?;
                pipeline.run(parsed.question_id).await
            })
        });
        state.jobs.bind("ingest_question", handler);
    }

    {
        let router = state.query_router.clone();
        let repository = state.repository.clone();
        let handler: TaskHandler = Arc::new(move |args| {
            let router = router.clone();
            let repository = repository.clone();
            Box::pin(async move {
                let parsed: AnswerQueryArgs = serde_json::from_value(args).map_err(bad_args)?;
                let result = router.route_and_dispatch(parsed.knowledge_base_id, &parsed.query).await;
                let sources = serde_json::to_value(&result.sources).unwrap_or(serde_json::json!([]));
                repository
                    .write_message_result(parsed.message_id, "PROCESSED", &result.answer, sources, result.routing_info)
                    .await
            })
        });
        state.jobs.bind("answer_query", handler);
    }

    {
        let pipeline = deletion_pipeline_svc.clone();
        let handler: TaskHandler = Arc::new(move |args| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                let parsed: DeleteKnowledgeBaseArgs = serde_json::from_value(args).map_err(bad_args)?;
                pipeline.run(parsed.knowledge_base_id).await
            })
        });
        state.jobs.bind("delete_knowledge_base", handler);
    }

    {
        let vector_index = state.vector_index.clone();
        let handler: TaskHandler = Arc::new(move |args| {
            let vector_index = vector_index.clone();
            Box::pin(async move {
                let parsed: DeleteDocumentVectorsArgs = serde_json::from_value(args).map_err(bad_args)?;
                deletion_pipeline::delete_document_vectors(vector_index, parsed.knowledge_base_id, parsed.document_id).await
            })
        });
        state.jobs.bind("delete_document_vectors", handler);
    }

    {
        let vector_index = state.vector_index.clone();
        let handler: TaskHandler = Arc::new(move |args| {
            let vector_index = vector_index.clone();
            Box::pin(async move {
                let parsed: DeleteQuestionVectorArgs = serde_json::from_value(args).map_err(bad_args)?;
                deletion_pipeline::delete_question_vector(vector_index, parsed.knowledge_base_id, parsed.question_id).await
            })
        });
        state.jobs.bind("delete_question_vector", handler);
    }

    info!("handlers bound, entering poll loop");

    state.jobs.clone().run().await;

    error!("job queue poll loop exited unexpectedly");
    Ok(())
}
