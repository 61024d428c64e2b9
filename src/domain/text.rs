//! Text normalization shared by cache keys, evidence dedup and lexical scoring.

/// Trim and collapse every whitespace run to a single space.
pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased alphanumeric terms of at least three characters, deduplicated
/// in first-seen order.
pub fn terms(input: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in input.split(|c: char| !c.is_alphanumeric()) {
        if raw.chars().count() < 3 {
            continue;
        }
        let term = raw.to_lowercase();
        if !out.contains(&term) {
            out.push(term);
        }
    }
    out
}

/// Fraction of `query` terms present in `text`, in `[0, 1]`.
pub fn term_overlap(query: &[String], text: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let text_terms = terms(text);
    let hits = query.iter().filter(|t| text_terms.contains(t)).count();
    hits as f64 / query.len() as f64
}
