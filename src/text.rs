//! Text Utilities
//!
//! Claim splitting, content-token extraction and JSON extraction shared by
//! the router, graders and synthesizer.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "own", "who",
    "did", "does", "get", "let", "say", "she", "too", "use", "used", "uses", "using", "what",
    "when", "where", "which", "while", "with", "within", "without", "would", "could", "should",
    "this", "that", "these", "those", "there", "their", "them", "they", "then", "than", "from",
    "into", "onto", "over", "under", "about", "also", "been", "being", "have", "having", "here",
    "more", "most", "much", "many", "some", "such", "only", "other", "very", "will", "just",
    "each", "both", "between", "because", "were", "what's", "your", "yours", "explain", "tell",
    "describe", "is", "it", "of", "in", "on", "to", "an", "as", "at", "by", "be", "or", "if",
];

static SENTENCE_BOUNDARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[.!?]+(\s+|$)").expect("static regex")
});

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([-*•>]+|\d+[.)])\s*").expect("static regex")
});

/// Normalised content tokens: lowercase, stopwords removed, light plural folding
pub fn content_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\''))
        .map(|w| w.trim_matches(|c: char| c == '-' || c == '\''))
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
        .map(fold_plural)
        .collect()
}

fn fold_plural(word: &str) -> String {
    if word.len() > 4 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Split text into candidate factual claims.
///
/// Headings, questions and fragments with fewer than three content tokens
/// are not claims.
pub fn split_claims(text: &str) -> Vec<String> {
    let mut claims = Vec::new();

    for line in text.lines() {
        let line = LIST_MARKER.replace(line.trim(), "");
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.ends_with(':') {
            continue;
        }

        let mut start = 0;
        for m in SENTENCE_BOUNDARY.find_iter(line) {
            let end = m.start() + m.as_str().trim_end().len();
            push_claim(&mut claims, &line[start..end]);
            start = m.end();
        }
        if start < line.len() {
            push_claim(&mut claims, &line[start..]);
        }
    }

    claims
}

fn push_claim(claims: &mut Vec<String>, sentence: &str) {
    let sentence = sentence.trim().trim_matches('*').trim();
    if sentence.ends_with('?') || content_tokens(sentence).len() < 3 {
        return;
    }
    claims.push(sentence.to_string());
}

/// Fraction of `claim`'s content tokens that appear in `passage`
pub fn token_overlap(claim: &HashSet<String>, passage: &HashSet<String>) -> f64 {
    if claim.is_empty() {
        return 1.0;
    }
    let shared = claim.iter().filter(|t| passage.contains(*t)).count();
    shared as f64 / claim.len() as f64
}

/// Heuristic for refusals and non-answers
pub fn is_refusal(text: &str) -> bool {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    trimmed.len() < 10
        || lower.starts_with("i cannot")
        || lower.starts_with("i can't")
        || lower.starts_with("i'm sorry")
        || lower.starts_with("i am sorry")
        || lower.contains("i don't have enough information")
        || lower.contains("as an ai")
}

/// Extract the first balanced JSON object from a string that may contain other text
pub fn extract_json(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                '\\' if !escaped => escaped = true,
                '"' if !escaped => in_string = false,
                _ => escaped = false,
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Truncate to at most `max` bytes without splitting a character
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
