//! Query intent classification for retrieval scoring (spec.md §4.12 step
//! 5): regex patterns catch the common phrasings cheaply; anything left
//! falls through to an LLM classification call rather than defaulting
//! blindly, since an unclassified query degrades metadata-aware boosting.

use std::collections::HashMap;

use crate::services::llm_service::{ChatMessage, CompletionOptions, LlmClient};
use crate::services::prompt_registry::PromptRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Factoid,
    Comparison,
    Explanation,
    List,
    Procedural,
    Definition,
    CauseEffect,
    Analysis,
    Unknown,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Factoid => "FACTOID",
            QueryIntent::Comparison => "COMPARISON",
            QueryIntent::Explanation => "EXPLANATION",
            QueryIntent::List => "LIST",
            QueryIntent::Procedural => "PROCEDURAL",
            QueryIntent::Definition => "DEFINITION",
            QueryIntent::CauseEffect => "CAUSE_EFFECT",
            QueryIntent::Analysis => "ANALYSIS",
            QueryIntent::Unknown => "UNKNOWN",
        }
    }

    fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "FACTOID" => QueryIntent::Factoid,
            "COMPARISON" => QueryIntent::Comparison,
            "EXPLANATION" => QueryIntent::Explanation,
            "LIST" => QueryIntent::List,
            "PROCEDURAL" => QueryIntent::Procedural,
            "DEFINITION" => QueryIntent::Definition,
            "CAUSE_EFFECT" => QueryIntent::CauseEffect,
            "ANALYSIS" => QueryIntent::Analysis,
            _ => QueryIntent::Unknown,
        }
    }
}

pub struct QueryAnalyzer;

impl QueryAnalyzer {
    /// Cheap, synchronous pattern match. Returns `Unknown` when nothing
    /// matches, which callers should treat as "ask the LLM", not as a
    /// terminal classification.
    pub fn analyze_intent(query: &str) -> QueryIntent {
        let q = query.to_lowercase();

        let comparison = ["vs", "versus", "compared to", "difference between", "which is better", "better than"];
        if comparison.iter().any(|p| q.contains(p)) {
            return QueryIntent::Comparison;
        }

        let list = ["list of", "list the", "what are the", "enumerate", "name all", "give me a list"];
        if list.iter().any(|p| q.contains(p)) {
            return QueryIntent::List;
        }

        let procedural = ["how do i", "how to", "steps to", "how can i", "what is the process"];
        if procedural.iter().any(|p| q.contains(p)) {
            return QueryIntent::Procedural;
        }

        let definition = ["what is a ", "what is the meaning of", "define ", "what does ", "meaning of"];
        if definition.iter().any(|p| q.contains(p)) {
            return QueryIntent::Definition;
        }

        let cause_effect = ["why does", "why did", "what causes", "what caused", "what is the effect", "as a result of"];
        if cause_effect.iter().any(|p| q.contains(p)) {
            return QueryIntent::CauseEffect;
        }

        let explanation = ["explain", "how does", "why is", "walk me through"];
        if explanation.iter().any(|p| q.contains(p)) {
            return QueryIntent::Explanation;
        }

        let analysis = ["analyze", "evaluate", "assess", "what are the implications", "pros and cons"];
        if analysis.iter().any(|p| q.contains(p)) {
            return QueryIntent::Analysis;
        }

        let factoid = ["what is the", "when did", "when was", "who is", "how many", "how much", "what year"];
        if factoid.iter().any(|p| q.contains(p)) {
            return QueryIntent::Factoid;
        }

        QueryIntent::Unknown
    }

    /// Fall back to an LLM call when the regex pass returns `Unknown`.
    /// A malformed or unparseable LLM response stays `Unknown` rather than
    /// failing the caller, since intent only affects score boosting.
    pub async fn classify(query: &str, llm: &dyn LlmClient, prompts: &PromptRegistry) -> QueryIntent {
        let regex_intent = Self::analyze_intent(query);
        if regex_intent != QueryIntent::Unknown {
            return regex_intent;
        }

        let mut vars = HashMap::new();
        vars.insert("query", query);
        let prompt = prompts.get("query", "classify_intent", &vars);
        if prompt.is_empty() {
            return QueryIntent::Unknown;
        }

        let messages = vec![ChatMessage::user(prompt)];
        match llm.complete(messages, CompletionOptions::default()).await {
            Ok(label) => QueryIntent::from_label(&label),
            Err(_) => QueryIntent::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_comparison_intent() {
        assert_eq!(QueryAnalyzer::analyze_intent("what is x versus y"), QueryIntent::Comparison);
    }

    #[test]
    fn detects_procedural_intent() {
        assert_eq!(QueryAnalyzer::analyze_intent("how do i reset my password"), QueryIntent::Procedural);
    }

    #[test]
    fn detects_definition_intent() {
        assert_eq!(QueryAnalyzer::analyze_intent("define throughput"), QueryIntent::Definition);
    }

    #[test]
    fn detects_cause_effect_intent() {
        assert_eq!(QueryAnalyzer::analyze_intent("why does latency spike under load"), QueryIntent::CauseEffect);
    }

    #[test]
    fn detects_list_intent() {
        assert_eq!(QueryAnalyzer::analyze_intent("what are the supported formats"), QueryIntent::List);
    }

    #[test]
    fn unmatched_query_is_unknown() {
        assert_eq!(QueryAnalyzer::analyze_intent("purple elephant banana"), QueryIntent::Unknown);
    }

    #[test]
    fn from_label_is_case_insensitive() {
        assert_eq!(QueryIntent::from_label("factoid"), QueryIntent::Factoid);
        assert_eq!(QueryIntent::from_label("not_a_real_label"), QueryIntent::Unknown);
    }
}
