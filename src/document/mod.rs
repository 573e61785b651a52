pub mod chunker;
pub mod extractor;

pub use chunker::Chunker;
pub use extractor::{ContentExtractor, ExtractedDocument};
