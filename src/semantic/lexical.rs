//! Lexical (keyword) scoring for hybrid search.
//!
//! Scores how well an item's keyword text matches a query, in [0.0, 1.0]:
//! - 1.0 when the whole normalized query appears in the keyword text
//! - otherwise the fraction of query terms found as substrings

/// Keyword score of `keywords` against `query`.
pub fn keyword_score(query: &str, keywords: &str) -> f32 {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return 0.0;
    }

    let haystack = keywords.to_lowercase();
    if haystack.contains(&query_terms.join(" ")) {
        return 1.0;
    }

    let matched = query_terms
        .iter()
        .filter(|term| haystack.contains(term.as_str()))
        .count();

    matched as f32 / query_terms.len() as f32
}

/// True when any query term occurs in the keyword text.
pub fn matches_any(query: &str, keywords: &str) -> bool {
    let haystack = keywords.to_lowercase();
    tokenize(query)
        .iter()
        .any(|term| haystack.contains(term.as_str()))
}

/// Tokenize query into lowercase terms.
/// Filters out very short terms (1 char) and common stop words.
pub fn tokenize(query: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being",
        "in", "on", "at", "to", "for", "of", "with", "by", "from", "as",
        "and", "or", "but", "not", "no", "so", "if", "then",
    ];

    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}
