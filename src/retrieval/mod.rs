pub mod rag_retriever;

pub use rag_retriever::{RagRetriever, RetrievalResult};
