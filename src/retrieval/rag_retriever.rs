//! RAG retrieval (spec.md §4.12): document preselection narrows the vector
//! search when the knowledge base is large, two fallback tiers widen the
//! search when the primary pass comes back empty, and metadata-aware score
//! boosting nudges matches whose size class or section heading line up with
//! the classified query intent before the top candidates are synthesized
//! into a cited answer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::VectorIndexConfig;
use crate::database::Repository;
use crate::models::domain::Source;
use crate::services::embedding_service::EmbeddingService;
use crate::services::llm_service::{ChatMessage, CompletionOptions, LlmClient};
use crate::services::prompt_registry::PromptRegistry;
use crate::services::query_analyzer::{QueryAnalyzer, QueryIntent};
use crate::services::reranker::{RerankCandidate, Reranker};
use crate::utils::error::CoreError;
use crate::vector::{Filter, QueryMatch, VectorIndex};

const EMPTY_RESULT_ANSWER: &str =
    "I couldn't find anything in this knowledge base that answers that question.";

pub struct RetrievalResult {
    pub answer: String,
    pub sources: Vec<Source>,
}

pub struct RagRetriever {
    repository: Arc<Repository>,
    embedding: Arc<EmbeddingService>,
    vector_index: Arc<dyn VectorIndex>,
    llm: Arc<dyn LlmClient>,
    reranker: Arc<dyn Reranker>,
    prompts: Arc<PromptRegistry>,
    config: VectorIndexConfig,
}

impl RagRetriever {
    pub fn new(
        repository: Arc<Repository>,
        embedding: Arc<EmbeddingService>,
        vector_index: Arc<dyn VectorIndex>,
        llm: Arc<dyn LlmClient>,
        reranker: Arc<dyn Reranker>,
        prompts: Arc<PromptRegistry>,
        config: VectorIndexConfig,
    ) -> Self {
        Self { repository, embedding, vector_index, llm, reranker, prompts, config }
    }

    pub async fn retrieve(&self, knowledge_base_id: i64, query: &str) -> Result<RetrievalResult, CoreError> {
        let namespace = format!("kb_{}", knowledge_base_id);
        let document_filter = self.preselect_documents(knowledge_base_id, query).await;

        let query_vector = self.embedding.embed(query).await?;

        let mut matches = self.primary_retrieve(&namespace, &query_vector, document_filter.as_ref()).await?;

        if matches.is_empty() {
            debug!(knowledge_base_id, "primary retrieval empty, trying sub-question fallback");
            matches = self.subquestion_fallback(&namespace, query).await?;
        }

        if matches.is_empty() {
            debug!(knowledge_base_id, "sub-question fallback empty, trying query-variation fallback");
            matches = self.query_variation_fallback(&namespace, query).await?;
        }

        if matches.is_empty() {
            return Ok(RetrievalResult { answer: EMPTY_RESULT_ANSWER.to_string(), sources: Vec::new() });
        }

        let intent = QueryAnalyzer::classify(query, self.llm.as_ref(), &self.prompts).await;
        let boosted = apply_metadata_boost(matches, intent);

        let candidates: Vec<RerankCandidate> = boosted
            .iter()
            .map(|m| RerankCandidate {
                id: m.id.clone(),
                text: m.metadata.get("content").cloned().unwrap_or_default(),
                original_score: m.score,
            })
            .collect();

        let reranked = self.reranker.rerank(query, candidates).await;
        let metadata_by_id: HashMap<String, HashMap<String, String>> =
            boosted.into_iter().map(|m| (m.id, m.metadata)).collect();

        let mut top: Vec<_> = reranked.into_iter().collect();
        top.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        top.truncate(3);

        let sources: Vec<Source> = top
            .iter()
            .map(|c| {
                let metadata = metadata_by_id.get(&c.id).cloned().unwrap_or_default();
                Source {
                    score: c.score,
                    content: metadata.get("content").cloned().unwrap_or_default(),
                    service: "rag".to_string(),
                    document_id: metadata.get("document_id").and_then(|v| v.parse().ok()),
                    title: metadata.get("document_title").cloned(),
                    chunk_index: metadata.get("chunk_index").and_then(|v| v.parse().ok()),
                    question_id: None,
                    question: None,
                    answer: None,
                    answer_type: None,
                }
            })
            .collect();

        let answer = self.synthesize(query, &sources).await?;

        Ok(RetrievalResult { answer, sources })
    }

    /// Ask the LLM which documents are worth searching, parsing the single
    /// `RELEVANT_DOCUMENTS: id, id, id` line it's instructed to respond
    /// with. A missing, empty, or unparseable response means "search every
    /// document" rather than failing the query.
    async fn preselect_documents(&self, knowledge_base_id: i64, query: &str) -> Option<Filter> {
        let summaries = self.repository.list_document_summaries(knowledge_base_id, 50).await.ok()?;
        if summaries.is_empty() {
            return None;
        }

        let document_list = summaries
            .iter()
            .map(|s| format!("{}: {} — {}", s.document_id, s.title, s.summary))
            .collect::<Vec<_>>()
            .join("\n");

        let mut vars = HashMap::new();
        vars.insert("document_list", document_list.as_str());
        vars.insert("query", query);
        let prompt = self.prompts.get("rag", "preselect_documents", &vars);
        if prompt.is_empty() {
            return None;
        }

        let response = self
            .llm
            .complete(vec![ChatMessage::user(prompt)], CompletionOptions::default())
            .await
            .ok()?;

        let line = response.lines().find(|l| l.trim_start().starts_with("RELEVANT_DOCUMENTS:"))?;
        let ids_part = line.splitn(2, ':').nth(1)?;
        let ids: Vec<String> = ids_part
            .split(',')
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .map(|id| id.to_string())
            .collect();

        if ids.is_empty() {
            None
        } else {
            Some(Filter::new().is_in("document_id", ids))
        }
    }

    /// Query with the preselection filter; if it comes back empty and a
    /// filter was applied, retry unfiltered rather than assuming there's
    /// truly nothing in the knowledge base.
    async fn primary_retrieve(
        &self,
        namespace: &str,
        query_vector: &[f32],
        filter: Option<&Filter>,
    ) -> Result<Vec<QueryMatch>, CoreError> {
        let matches = self
            .vector_index
            .query(namespace, query_vector, self.config.default_top_k, filter)
            .await?;

        if !matches.is_empty() || filter.is_none() {
            return Ok(filter_by_threshold(matches, self.config.similarity_threshold));
        }

        warn!(namespace, "filtered retrieval returned nothing, retrying unfiltered");
        let retried = self.vector_index.query(namespace, query_vector, self.config.default_top_k, None).await?;
        Ok(filter_by_threshold(retried, self.config.similarity_threshold))
    }

    /// Break the query into 2-3 narrower sub-questions, search each at
    /// `top_k / n`, and dedup the union by chunk id.
    async fn subquestion_fallback(&self, namespace: &str, query: &str) -> Result<Vec<QueryMatch>, CoreError> {
        let mut vars = HashMap::new();
        vars.insert("query", query);
        let prompt = self.prompts.get("rag", "generate_subquestions", &vars);
        if prompt.is_empty() {
            return Ok(Vec::new());
        }

        let response = match self.llm.complete(vec![ChatMessage::user(prompt)], CompletionOptions::default()).await {
            Ok(r) => r,
            Err(_) => return Ok(Vec::new()),
        };

        let subquestions: Vec<&str> = response.lines().map(str::trim).filter(|l| !l.is_empty()).take(3).collect();
        if subquestions.is_empty() {
            return Ok(Vec::new());
        }

        let per_question_k = (self.config.default_top_k / subquestions.len()).max(1);
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for subquestion in subquestions {
            let vector = match self.embedding.embed(subquestion).await {
                Ok(v) => v,
                Err(_) => continue,
            };
            let matches = self.vector_index.query(namespace, &vector, per_question_k, None).await?;
            for m in filter_by_threshold(matches, self.config.similarity_threshold) {
                if seen.insert(m.id.clone()) {
                    merged.push(m);
                }
            }
        }

        Ok(merged)
    }

    /// Rephrase the query 3-5 ways and search each, again deduping by id.
    async fn query_variation_fallback(&self, namespace: &str, query: &str) -> Result<Vec<QueryMatch>, CoreError> {
        let mut vars = HashMap::new();
        vars.insert("query", query);
        let prompt = self.prompts.get("rag", "generate_query_variations", &vars);
        if prompt.is_empty() {
            return Ok(Vec::new());
        }

        let response = match self.llm.complete(vec![ChatMessage::user(prompt)], CompletionOptions::default()).await {
            Ok(r) => r,
            Err(_) => return Ok(Vec::new()),
        };

        let variations: Vec<&str> = response.lines().map(str::trim).filter(|l| !l.is_empty()).take(5).collect();
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for variation in variations {
            let vector = match self.embedding.embed(variation).await {
                Ok(v) => v,
                Err(_) => continue,
            };
            let matches = self.vector_index.query(namespace, &vector, self.config.default_top_k, None).await?;
            for m in filter_by_threshold(matches, self.config.similarity_threshold) {
                if seen.insert(m.id.clone()) {
                    merged.push(m);
                }
            }
        }

        Ok(merged)
    }

    async fn synthesize(&self, query: &str, sources: &[Source]) -> Result<String, CoreError> {
        // Keep adding sources (already capped at top 3, highest score first)
        // until the rendered context would blow the completion provider's
        // token budget; a partial context still produces a grounded answer,
        // a provider-rejected prompt produces none.
        const MAX_CONTEXT_TOKENS: usize = 6000;
        let mut rendered_blocks = Vec::with_capacity(sources.len());
        let mut running_tokens = 0usize;
        for (i, s) in sources.iter().enumerate() {
            let block = format!("[Source {}]\n{}", i + 1, s.content);
            if running_tokens > 0 && crate::utils::token_estimator::would_exceed_limit(running_tokens, &block, MAX_CONTEXT_TOKENS) {
                break;
            }
            running_tokens += crate::utils::token_estimator::estimate_tokens(&block);
            rendered_blocks.push(block);
        }
        let rendered_sources = rendered_blocks.join("\n\n");

        let mut vars = HashMap::new();
        vars.insert("sources", rendered_sources.as_str());
        vars.insert("query", query);
        let prompt = self.prompts.get("rag", "synthesize_answer", &vars);

        self.llm.complete(vec![ChatMessage::user(prompt)], CompletionOptions::default()).await
    }
}

fn filter_by_threshold(matches: Vec<QueryMatch>, threshold: f32) -> Vec<QueryMatch> {
    matches.into_iter().filter(|m| m.score >= threshold).collect()
}

/// Boost scores when a match's size class or section metadata lines up
/// with the classified intent (spec.md §4.12 step 5): ×1.2 for a size-class
/// match, ×1.3 for a document-type keyword match, ×(1 + 0.1k) for k matched
/// section/header keywords.
fn apply_metadata_boost(matches: Vec<QueryMatch>, intent: QueryIntent) -> Vec<QueryMatch> {
    let preferred_size_class = match intent {
        QueryIntent::Factoid | QueryIntent::Definition => "SMALL",
        QueryIntent::List | QueryIntent::Comparison => "MEDIUM",
        QueryIntent::Explanation | QueryIntent::Analysis | QueryIntent::CauseEffect | QueryIntent::Procedural => "LARGE",
        QueryIntent::Unknown => "",
    };

    let intent_keywords: &[&str] = match intent {
        QueryIntent::Procedural => &["step", "procedure", "guide", "how-to"],
        QueryIntent::Definition => &["definition", "glossary", "terminology"],
        QueryIntent::Comparison => &["comparison", "versus", "vs"],
        QueryIntent::CauseEffect => &["cause", "effect", "reason", "impact"],
        _ => &[],
    };

    matches
        .into_iter()
        .map(|mut m| {
            if !preferred_size_class.is_empty() && m.metadata.get("size_class").map(|s| s.as_str()) == Some(preferred_size_class) {
                m.score *= 1.2;
            }

            let header = m.metadata.get("nearest_header").map(|s| s.to_lowercase()).unwrap_or_default();
            if !intent_keywords.is_empty() && intent_keywords.iter().any(|kw| header.contains(kw)) {
                m.score *= 1.3;
            }

            let section_path = m.metadata.get("section_path").map(|s| s.to_lowercase()).unwrap_or_default();
            let matched_keywords = intent_keywords.iter().filter(|kw| section_path.contains(*kw)).count();
            if matched_keywords > 0 {
                m.score *= 1.0 + 0.1 * matched_keywords as f32;
            }

            m
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_match(id: &str, score: f32, size_class: &str, header: &str) -> QueryMatch {
        let mut metadata = HashMap::new();
        metadata.insert("size_class".to_string(), size_class.to_string());
        metadata.insert("nearest_header".to_string(), header.to_string());
        QueryMatch { id: id.to_string(), score, metadata }
    }

    #[test]
    fn threshold_filters_low_scoring_matches() {
        let matches = vec![make_match("a", 0.9, "SMALL", ""), make_match("b", 0.1, "SMALL", "")];
        let filtered = filter_by_threshold(matches, 0.3);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "a");
    }

    #[test]
    fn size_class_boost_favors_matching_class() {
        let matches = vec![make_match("a", 0.5, "SMALL", ""), make_match("b", 0.5, "LARGE", "")];
        let boosted = apply_metadata_boost(matches, QueryIntent::Factoid);
        let a = boosted.iter().find(|m| m.id == "a").unwrap();
        let b = boosted.iter().find(|m| m.id == "b").unwrap();
        assert!(a.score > b.score);
    }

    #[test]
    fn header_keyword_boost_favors_procedural_sections() {
        let matches = vec![make_match("a", 0.5, "LARGE", "Installation Steps"), make_match("b", 0.5, "LARGE", "Overview")];
        let boosted = apply_metadata_boost(matches, QueryIntent::Procedural);
        let a = boosted.iter().find(|m| m.id == "a").unwrap();
        let b = boosted.iter().find(|m| m.id == "b").unwrap();
        assert!(a.score > b.score);
    }

    #[test]
    fn unknown_intent_does_not_boost() {
        let matches = vec![make_match("a", 0.5, "SMALL", "")];
        let boosted = apply_metadata_boost(matches, QueryIntent::Unknown);
        assert_eq!(boosted[0].score, 0.5);
    }
}
