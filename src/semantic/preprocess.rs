//! Text preprocessing for embedding generation.
//!
//! Prepares raw content for the providers:
//! 1. Trim whitespace
//! 2. Skip if empty
//! 3. Truncate to a bounded number of characters

/// Trim and truncate text for embedding.
///
/// Returns `None` if the text is empty after trimming. Truncation counts
/// characters, never bytes, so UTF-8 sequences are not split.
pub fn prepare_input(text: &str, max_chars: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    Some(truncate_chars(text, max_chars))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Number of whitespace separated tokens in a search query.
pub fn query_token_count(query: &str) -> usize {
    query.split_whitespace().count()
}

/// Compute a hash of the content for change detection.
/// Used to determine if an item needs re-embedding.
pub fn content_hash(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.trim().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_content_returns_none() {
        assert!(prepare_input("", 500).is_none());
        assert!(prepare_input("   ", 500).is_none());
        assert!(prepare_input("\n\t  \r\n", 500).is_none());
    }

    #[test]
    fn test_trims_whitespace() {
        assert_eq!(prepare_input("  hello  ", 500), Some("hello".to_string()));
    }

    #[test]
    fn test_truncation() {
        let long_content = "x".repeat(600);
        let content = prepare_input(&long_content, 500).unwrap();
        assert_eq!(content.chars().count(), 500);
    }

    #[test]
    fn test_truncation_is_char_based() {
        let content = prepare_input(&"日本語".repeat(300), 500).unwrap();
        assert_eq!(content.chars().count(), 500);
    }

    #[test]
    fn test_no_truncation_for_short_content() {
        assert_eq!(prepare_input("short", 500), Some("short".to_string()));
    }

    #[test]
    fn test_query_token_count() {
        assert_eq!(query_token_count("diabetes treatment"), 2);
        assert_eq!(query_token_count("  heart   "), 1);
        assert_eq!(query_token_count(""), 0);
        assert_eq!(query_token_count("chronic kidney disease stage"), 4);
    }

    #[test]
    fn test_content_hash_consistency() {
        assert_eq!(content_hash("Text"), content_hash("Text"));
        assert_eq!(content_hash("  Text "), content_hash("Text"));
        assert_ne!(content_hash("Text A"), content_hash("Text B"));
    }
}
