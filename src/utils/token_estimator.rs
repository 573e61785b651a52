//! Word-based token estimation heuristic, used to cap context windows when
//! truncating document previews for summarization and when assembling the
//! synthesis prompt's context block.

use crate::models::Chunk;

/// Estimate tokens from text using a word-based heuristic: ~1.3 tokens per
/// word for mixed natural-language content, plus a small formatting overhead.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let words = text.split_whitespace().count();
    ((words as f64 * 1.3) + 5.0).ceil() as usize
}

pub fn estimate_chunks_tokens(chunks: &[Chunk]) -> usize {
    chunks.iter().map(|chunk| estimate_tokens(&chunk.content)).sum()
}

pub fn would_exceed_limit(current_tokens: usize, new_text: &str, max_tokens: usize) -> bool {
    let new_tokens = estimate_tokens(new_text);
    current_tokens + new_tokens > max_tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimation() {
        let text = "Ini adalah dokumen test yang berisi informasi";
        let tokens = estimate_tokens(text);
        assert!(tokens >= 13 && tokens <= 16);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_would_exceed() {
        let current = 1000;
        let text = "word ".repeat(500);
        assert!(would_exceed_limit(current, &text, 1500));
        assert!(!would_exceed_limit(current, &text, 2000));
    }
}
