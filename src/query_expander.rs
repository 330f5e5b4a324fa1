//! C4 — Query Expander.
//!
//! Grounded on `rag/query_rewriter.rs`'s rule-based-expansion/trivial-query
//! detection style, rewritten to use a fixed synonym-thesaurus and
//! prefix-pattern rules: the base crate's rewriter is LLM-assisted, while
//! this engine's is purely rule-based (matching the rewriter's own
//! rule-based fallback path).

use std::collections::HashMap;

const TRIVIAL_QUERIES: &[&str] = &[
    "test", "help", "hello", "hi", "hey", "ok", "okay", "thanks", "thank you",
];

const PREFIX_PATTERNS: &[(&str, &str)] = &[
    ("how do i ", "Instructions for "),
    ("what is ", "Information about "),
    ("what are ", "Information about "),
    ("when should ", "Timing for "),
    ("why does ", "Explanation of "),
    ("where can i ", "Locations for "),
    ("who is ", "Information about "),
];

fn thesaurus() -> &'static HashMap<&'static str, &'static [&'static str]> {
    static THESAURUS: std::sync::OnceLock<HashMap<&'static str, &'static [&'static str]>> =
        std::sync::OnceLock::new();
    THESAURUS.get_or_init(|| {
        let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        m.insert("error", &["bug", "failure"]);
        m.insert("fix", &["repair", "resolve"]);
        m.insert("build", &["compile", "construct"]);
        m.insert("config", &["configuration", "settings"]);
        m.insert("install", &["setup", "deploy"]);
        m.insert("document", &["file", "paper"]);
        m.insert("search", &["query", "lookup"]);
        m.insert("delete", &["remove", "erase"]);
        m.insert("create", &["make", "generate"]);
        m.insert("update", &["modify", "change"]);
        m.insert("function", &["method", "procedure"]);
        m.insert("issue", &["problem", "defect"]);
        m.insert("performance", &["speed", "efficiency"]);
        m.insert("security", &["safety", "protection"]);
        m.insert("data", &["information", "records"]);
        m
    })
}

/// Key lexical terms: open-class-ish tokens of length > 2.
fn key_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() > 2)
        .collect()
}

fn normalize(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Whether `query` falls into the trivial-query set used both to boost
/// expansion variants here and to relax gating thresholds in the
/// orchestrator.
pub fn is_trivial_query(query: &str) -> bool {
    let normalized = normalize(query);
    query.split_whitespace().count() <= 1
        || key_terms(query).is_empty()
        || TRIVIAL_QUERIES.contains(&normalized.as_str())
}

/// Produce a small, deduplicated set of query variants including the
/// original, as the first entry.
pub fn expand(query: &str) -> Vec<String> {
    let mut variants = vec![query.to_string()];

    let normalized = normalize(query);
    let token_count = query.split_whitespace().count();
    let terms = key_terms(query);

    if token_count <= 1 || terms.is_empty() || TRIVIAL_QUERIES.contains(&normalized.as_str()) {
        variants.push(format!("{} overview", query));
        variants.push(format!("{} summary", query));
        variants.push(format!("{} introduction", query));
        variants.push("overview".to_string());
        variants.push("summary".to_string());
        return dedup_preserve_first(variants);
    }

    let thes = thesaurus();
    let mut synonym_replacements: Vec<String> = Vec::new();
    let mut top_synonyms: Vec<&str> = Vec::new();

    for term in &terms {
        if let Some(syns) = thes.get(term.as_str()) {
            for syn in syns.iter().take(2) {
                let replaced = replace_word_case_insensitive(query, term, syn);
                synonym_replacements.push(replaced);
                if top_synonyms.len() < 2 && !top_synonyms.contains(syn) {
                    top_synonyms.push(syn);
                }
            }
        }
    }
    variants.extend(synonym_replacements);

    if !top_synonyms.is_empty() {
        variants.push(format!("{} {}", query, top_synonyms.join(" ")));
    }

    if query.trim_end().ends_with('?') {
        let stripped = query.trim_end().trim_end_matches('?').to_string();
        let lower = stripped.to_lowercase();
        for (prefix, replacement) in PREFIX_PATTERNS {
            if lower.starts_with(prefix) {
                let rest = &stripped[prefix.len().min(stripped.len())..];
                variants.push(format!("{}{}", replacement, rest));
                break;
            }
        }
    }

    dedup_preserve_first(variants).into_iter().take(6).collect()
}

fn replace_word_case_insensitive(text: &str, word: &str, replacement: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            let stripped = w.trim_matches(|c: char| !c.is_alphanumeric());
            if stripped.to_lowercase() == word {
                replacement.to_string()
            } else {
                w.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedup_preserve_first(variants: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for v in variants {
        if seen.insert(v.clone()) {
            out.push(v);
        }
    }
    out
}
