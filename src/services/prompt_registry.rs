//! Prompt templates are data, not code: every LLM-facing prompt string used
//! by the router, retriever, or ingestion pipeline is looked up here by
//! (domain, name) rather than inlined, so operators can tune wording without
//! a rebuild (spec.md §4.7).

use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
struct SeedEntry {
    domain: String,
    name: String,
    template: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SeedFile {
    prompts: Vec<SeedEntry>,
}

/// In-memory template store, keyed by `(domain, name)`. Populated once at
/// startup via `seed()` and never mutated afterward.
pub struct PromptRegistry {
    templates: HashMap<(String, String), String>,
}

impl PromptRegistry {
    /// Load and parse the seed TOML file at `path`. A missing or malformed
    /// seed file is a startup error, since an empty registry would silently
    /// degrade every downstream prompt to "".
    pub fn seed(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read prompt seed file {}: {}", path, e))?;
        let parsed: SeedFile = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse prompt seed file {}: {}", path, e))?;

        let templates = parsed
            .prompts
            .into_iter()
            .map(|e| ((e.domain, e.name), e.template))
            .collect();

        Ok(Self { templates })
    }

    #[cfg(test)]
    pub fn from_map(templates: HashMap<(String, String), String>) -> Self {
        Self { templates }
    }

    /// Fetch a template by domain+name and substitute `{{variable}}`
    /// placeholders from `vars`. A missing key returns an empty string and
    /// logs a warning rather than failing the caller (spec.md §4.7) — a
    /// misconfigured prompt degrades an answer, it must never crash ingestion
    /// or a query.
    pub fn get(&self, domain: &str, name: &str, vars: &HashMap<&str, &str>) -> String {
        let key = (domain.to_string(), name.to_string());
        let Some(template) = self.templates.get(&key) else {
            warn!(domain, name, "prompt template not found");
            return String::new();
        };

        substitute(template, vars)
    }
}

fn substitute(template: &str, vars: &HashMap<&str, &str>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        rest = &rest[start + 2..];

        let Some(end) = rest.find("}}") else {
            result.push_str("{{");
            result.push_str(rest);
            return result;
        };

        let key = rest[..end].trim();
        match vars.get(key) {
            Some(value) => result.push_str(value),
            None => warn!(key, "prompt variable not provided, leaving blank"),
        }
        rest = &rest[end + 2..];
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PromptRegistry {
        let mut templates = HashMap::new();
        templates.insert(
            ("router".to_string(), "classify".to_string()),
            "Classify: {{query}} against {{service}}.".to_string(),
        );
        PromptRegistry::from_map(templates)
    }

    #[test]
    fn substitutes_known_variables() {
        let registry = registry();
        let mut vars = HashMap::new();
        vars.insert("query", "what is x");
        vars.insert("service", "rag");
        let rendered = registry.get("router", "classify", &vars);
        assert_eq!(rendered, "Classify: what is x against rag.");
    }

    #[test]
    fn missing_key_returns_empty_string() {
        let registry = registry();
        let rendered = registry.get("router", "does_not_exist", &HashMap::new());
        assert_eq!(rendered, "");
    }

    #[test]
    fn unprovided_variable_leaves_blank() {
        let registry = registry();
        let mut vars = HashMap::new();
        vars.insert("query", "what is x");
        let rendered = registry.get("router", "classify", &vars);
        assert_eq!(rendered, "Classify: what is x against .");
    }
}
