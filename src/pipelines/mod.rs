pub mod deletion_pipeline;
pub mod document_pipeline;
pub mod question_pipeline;

pub use deletion_pipeline::DeletionPipeline;
pub use document_pipeline::DocumentIngestionPipeline;
pub use question_pipeline::QuestionIngestionPipeline;
