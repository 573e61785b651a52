use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// MIME/extension-derived content type, closed set per the ContentExtractor
/// dispatch table. Mirrors the document_type column stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Pdf,
    Docx,
    Pptx,
    Html,
    Markdown,
    Csv,
    Text,
    Image,
}

impl ContentType {
    pub fn from_mime_or_ext(mime: &str, extension: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_lowercase();
        match mime {
            "application/pdf" => return ContentType::Pdf,
            "text/csv" => return ContentType::Csv,
            "text/html" => return ContentType::Html,
            "text/markdown" => return ContentType::Markdown,
            m if m.starts_with("image/") => return ContentType::Image,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                return ContentType::Docx
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                return ContentType::Pptx
            }
            _ => {}
        }
        match ext.as_str() {
            "pdf" => ContentType::Pdf,
            "docx" | "doc" => ContentType::Docx,
            "pptx" | "ppt" => ContentType::Pptx,
            "html" | "htm" => ContentType::Html,
            "md" | "markdown" => ContentType::Markdown,
            "csv" => ContentType::Csv,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" => ContentType::Image,
            _ => ContentType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Pdf => "pdf",
            ContentType::Docx => "docx",
            ContentType::Pptx => "pptx",
            ContentType::Html => "html",
            ContentType::Markdown => "markdown",
            ContentType::Csv => "csv",
            ContentType::Text => "text",
            ContentType::Image => "image",
        }
    }

    /// Document types that select the Chunker's multi-level strategy.
    /// Structured/technical/code-shaped content gets header-aware chunking;
    /// everything else gets the flat paragraph-packing strategy.
    pub fn uses_multilevel_chunking(&self) -> bool {
        matches!(self, ContentType::Markdown | ContentType::Html | ContentType::Docx | ContentType::Pptx)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Processed => "PROCESSED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(DocumentStatus::Pending),
            "PROCESSING" => Some(DocumentStatus::Processing),
            "PROCESSED" => Some(DocumentStatus::Processed),
            "FAILED" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    /// Whether `self -> next` is one of the monotonic transitions the
    /// state machine allows. PROCESSING -> PENDING is explicitly forbidden.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Processing)
                | (DocumentStatus::Processing, DocumentStatus::Processed)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    Pending,
    Ingesting,
    Completed,
    Failed,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Pending => "PENDING",
            QuestionStatus::Ingesting => "INGESTING",
            QuestionStatus::Completed => "COMPLETED",
            QuestionStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QuestionStatus::Pending),
            "INGESTING" => Some(QuestionStatus::Ingesting),
            "COMPLETED" => Some(QuestionStatus::Completed),
            "FAILED" => Some(QuestionStatus::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: QuestionStatus) -> bool {
        matches!(
            (self, next),
            (QuestionStatus::Pending, QuestionStatus::Ingesting)
                | (QuestionStatus::Ingesting, QuestionStatus::Completed)
                | (QuestionStatus::Ingesting, QuestionStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Received,
    Processing,
    Processed,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "RECEIVED",
            MessageStatus::Processing => "PROCESSING",
            MessageStatus::Processed => "PROCESSED",
            MessageStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Direct,
    SqlQuery,
}

impl AnswerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerKind::Direct => "DIRECT",
            AnswerKind::SqlQuery => "SQL_QUERY",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "SQL_QUERY" => AnswerKind::SqlQuery,
            _ => AnswerKind::Direct,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KnowledgeBase {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Document {
    pub id: i64,
    pub knowledge_base_id: i64,
    pub title: String,
    pub content_type: String,
    pub status: String,
    pub processed_chunk_count: i32,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn status(&self) -> DocumentStatus {
        DocumentStatus::from_str(&self.status).unwrap_or(DocumentStatus::Pending)
    }

    pub fn content_type(&self) -> ContentType {
        ContentType::from_mime_or_ext(&self.content_type, &self.content_type)
    }

    /// Sniff the content type from the file's magic bytes first (`infer`),
    /// since an uploader's declared MIME/extension is untrusted input; fall
    /// back to an extension guess (`mime_guess`) for formats `infer` doesn't
    /// recognize (markdown, csv, plain text have no reliable magic bytes),
    /// and finally to the declared `content_type` column (spec.md §4.1
    /// "Dispatch by MIME / extension").
    pub fn detect_content_type(&self, file_path: &std::path::Path) -> ContentType {
        if let Ok(Some(kind)) = infer::get_from_path(file_path) {
            let detected = ContentType::from_mime_or_ext(kind.mime_type(), kind.extension());
            if detected != ContentType::Text {
                return detected;
            }
        }

        let ext = file_path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if let Some(mime) = mime_guess::from_path(file_path).first() {
            let detected = ContentType::from_mime_or_ext(mime.as_ref(), ext);
            if detected != ContentType::Text {
                return detected;
            }
        }

        self.content_type()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Question {
    pub id: i64,
    pub knowledge_base_id: i64,
    pub question: String,
    pub answer: String,
    pub answer_kind: String,
    pub status: String,
}

impl Question {
    pub fn status(&self) -> QuestionStatus {
        QuestionStatus::from_str(&self.status).unwrap_or(QuestionStatus::Pending)
    }

    pub fn answer_kind(&self) -> AnswerKind {
        AnswerKind::from_str(&self.answer_kind)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub status: String,
    pub content: String,
    /// JSON-encoded `Vec<Source>`.
    pub sources: serde_json::Value,
    /// JSON-encoded routing metadata.
    pub metadata: serde_json::Value,
}

/// Size class a chunk belongs to. A document is simultaneously indexed at
/// all three size classes by the multi-level chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub const ALL: [SizeClass; 3] = [SizeClass::Small, SizeClass::Medium, SizeClass::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "SMALL",
            SizeClass::Medium => "MEDIUM",
            SizeClass::Large => "LARGE",
        }
    }

    /// Target chunk length in characters for the flat strategy, and the
    /// baseline for multi-level packing before per-class overlap is applied.
    pub fn target_chars(&self) -> usize {
        match self {
            SizeClass::Small => 1000,
            SizeClass::Medium => 2000,
            SizeClass::Large => 4000,
        }
    }

    /// Overlap in characters used by the multi-level packing strategy.
    pub fn overlap_chars(&self) -> usize {
        match self {
            SizeClass::Small => 50,
            SizeClass::Medium => 100,
            SizeClass::Large => 200,
        }
    }
}

/// A chunk produced by the Chunker. Transient: handed by value from chunking
/// to embedding to vector upsert, never persisted in the metadata store.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub document_id: i64,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub size_class: SizeClass,
    pub content_type: ContentType,
    pub document_title: String,
    pub content: String,
    pub section_path: Vec<String>,
    pub nearest_header: String,
    pub word_count: usize,
}

impl Chunk {
    /// Deterministic record id: re-ingesting identical bytes produces the
    /// same ids, making upsert idempotent.
    pub fn vector_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.document_id,
            self.chunk_index,
            self.size_class.as_str()
        )
    }
}

/// A single vector-index record: (id, vector, flat string-keyed metadata).
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: std::collections::HashMap<String, String>,
}

/// A retrieval result returned by RagRetriever / QueryRouter, carrying
/// enough fields to populate the assistant-message schema regardless of
/// which service produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub score: f32,
    pub content: String,
    pub service: String,
    pub document_id: Option<i64>,
    pub title: Option<String>,
    pub chunk_index: Option<usize>,
    pub question_id: Option<i64>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub answer_type: Option<String>,
}
