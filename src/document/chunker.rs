//! Two chunking strategies selected by content type (spec.md §4.2): Flat for
//! unstructured prose, Multi-level for content carrying headers or sections
//! (markdown, html, docx, pptx). Every document is chunked once per
//! `SizeClass`, producing three independently retrievable granularities.

use once_cell::sync::Lazy;

use crate::models::domain::{Chunk, ContentType, SizeClass};

static HEADING_RE: Lazy<regex::Regex> = Lazy::new(|| regex::Regex::new(r"^(#{1,6})\s+(.+)$").unwrap());

pub struct Chunker;

struct Section {
    header: String,
    path: Vec<String>,
    body: String,
}

impl Chunker {
    pub fn chunk(document_id: i64, document_title: &str, content_type: ContentType, content: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for size_class in SizeClass::ALL {
            let mut class_chunks = if content_type.uses_multilevel_chunking() {
                Self::chunk_multi_level(document_id, document_title, content_type, content, size_class)
            } else {
                Self::chunk_flat(document_id, document_title, content_type, content, size_class)
            };

            // Dense, 0-based within this size class only (spec.md §4.2): each
            // class is independently indexed, so total_chunks must never mix
            // counts across SMALL/MEDIUM/LARGE.
            let class_total = class_chunks.len();
            for (index, chunk) in class_chunks.iter_mut().enumerate() {
                chunk.chunk_index = index;
                chunk.total_chunks = class_total;
            }

            chunks.append(&mut class_chunks);
        }

        chunks
    }

    fn chunk_flat(
        document_id: i64,
        document_title: &str,
        content_type: ContentType,
        content: &str,
        size_class: SizeClass,
    ) -> Vec<Chunk> {
        pack_text(content, size_class.target_chars(), size_class.overlap_chars())
            .into_iter()
            .map(|text| Chunk {
                document_id,
                chunk_index: 0,
                total_chunks: 0,
                size_class,
                content_type,
                document_title: document_title.to_string(),
                word_count: text.split_whitespace().count(),
                section_path: Vec::new(),
                nearest_header: String::new(),
                content: text,
            })
            .collect()
    }

    fn chunk_multi_level(
        document_id: i64,
        document_title: &str,
        content_type: ContentType,
        content: &str,
        size_class: SizeClass,
    ) -> Vec<Chunk> {
        let sections = extract_sections(content);
        let mut chunks = Vec::new();

        for section in &sections {
            for text in pack_text(&section.body, size_class.target_chars(), size_class.overlap_chars()) {
                chunks.push(Chunk {
                    document_id,
                    chunk_index: 0,
                    total_chunks: 0,
                    size_class,
                    content_type,
                    document_title: document_title.to_string(),
                    word_count: text.split_whitespace().count(),
                    section_path: section.path.clone(),
                    nearest_header: section.header.clone(),
                    content: text,
                });
            }
        }

        chunks
    }
}

/// Markdown heading breadcrumbs (`# A` / `## B` / `### C` -> path `[A, B,
/// C]`). Content without any heading becomes a single section with no
/// header and the whole body, which still benefits from size-class packing.
fn extract_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current_body = String::new();
    let mut has_heading = false;

    let flush = |stack: &[(usize, String)], body: &str, sections: &mut Vec<Section>| {
        if body.trim().is_empty() {
            return;
        }
        let path: Vec<String> = stack.iter().map(|(_, h)| h.clone()).collect();
        let header = path.last().cloned().unwrap_or_default();
        sections.push(Section { header, path, body: body.to_string() });
    };

    for line in content.lines() {
        if let Some(caps) = HEADING_RE.captures(line) {
            flush(&stack, &current_body, &mut sections);
            current_body.clear();
            has_heading = true;

            let level = caps[1].len();
            let title = caps[2].trim().to_string();
            stack.retain(|(l, _)| *l < level);
            stack.push((level, title));
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    flush(&stack, &current_body, &mut sections);

    if !has_heading {
        return vec![Section { header: String::new(), path: Vec::new(), body: content.to_string() }];
    }

    sections
}

/// Pack `text` into overlapping windows of roughly `target_chars`,
/// preferring to cut at a sentence boundary within the last 50 characters of
/// the window so chunks don't split mid-sentence when avoidable.
fn pack_text(text: &str, target_chars: usize, overlap_chars: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= target_chars {
        return vec![trimmed.to_string()];
    }

    const LOOKBACK: usize = 50;
    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + target_chars).min(chars.len());

        if end < chars.len() {
            if let Some(cut) = find_sentence_boundary(&chars, end, LOOKBACK) {
                end = cut;
            }
        }

        let window: String = chars[start..end].iter().collect();
        windows.push(window);

        if end >= chars.len() {
            break;
        }

        start = end.saturating_sub(overlap_chars);
    }

    windows
}

/// Search backward from `end` within `lookback` characters for a sentence
/// terminator followed by whitespace; returns the index just after it.
fn find_sentence_boundary(chars: &[char], end: usize, lookback: usize) -> Option<usize> {
    let floor = end.saturating_sub(lookback);
    for i in (floor..end).rev() {
        if matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).map(|c| c.is_whitespace()).unwrap_or(true) {
            return Some(i + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_chunking_produces_three_size_classes() {
        let content = "word ".repeat(2000);
        let chunks = Chunker::chunk(1, "doc", ContentType::Text, &content);
        let classes: std::collections::HashSet<_> = chunks.iter().map(|c| c.size_class).collect();
        assert_eq!(classes.len(), 3);
    }

    #[test]
    fn multi_level_chunking_carries_header_metadata() {
        let content = "# Intro\nSome intro text that is long enough to matter here.\n\n## Details\nMore detail text describing the feature in depth.\n";
        let chunks = Chunker::chunk(1, "doc", ContentType::Markdown, content);
        assert!(chunks.iter().any(|c| c.nearest_header == "Details"));
        assert!(chunks.iter().any(|c| c.section_path == vec!["Intro".to_string()]));
    }

    #[test]
    fn chunk_index_and_total_are_dense_within_each_size_class() {
        let content = "sentence one. ".repeat(500);
        let chunks = Chunker::chunk(7, "doc", ContentType::Text, &content);

        for size_class in SizeClass::ALL {
            let class_chunks: Vec<_> = chunks.iter().filter(|c| c.size_class == size_class).collect();
            let class_total = class_chunks.len();
            for (i, c) in class_chunks.iter().enumerate() {
                assert_eq!(c.chunk_index, i);
                assert_eq!(c.total_chunks, class_total);
                assert_eq!(c.document_id, 7);
            }
        }
    }

    #[test]
    fn pack_text_respects_small_inputs() {
        let windows = pack_text("short text", 1000, 50);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], "short text");
    }

    #[test]
    fn pack_text_splits_on_sentence_boundaries_when_possible() {
        let text = format!("{}. {}", "a".repeat(990), "b".repeat(200));
        let windows = pack_text(&text, 1000, 50);
        assert!(windows.len() >= 2);
        assert!(windows[0].ends_with('.'));
    }
}
