//! Query pattern classifier.
//!
//! Pure keyword classification of user queries into the closed set of
//! [`PatternType`] categories. Deterministic and side-effect-free so the
//! feedback updater and its tests get reproducible classifications.

use crate::types::PatternType;

// Keyword sets are tested in declaration order; the first match wins. A
// query containing both a causal and a comparison keyword is causal because
// that set is tested earlier.
const QUANTITATIVE_KEYWORDS: &[&str] = &["cuánto", "cuántos", "cantidad", "total"];
const CAUSAL_KEYWORDS: &[&str] = &["por qué", "causa", "razón", "motivo"];
const VISUALIZATION_KEYWORDS: &[&str] = &["gráfico", "visualiza", "muestra", "grafica"];
const RECOMMENDATION_KEYWORDS: &[&str] = &["mejor", "óptimo", "recomienda", "debería"];
const COMPARISON_KEYWORDS: &[&str] = &["comparar", "diferencia", "versus", "vs"];

/// Classify a user query into a pattern category.
///
/// The query is lower-cased and tested for substring membership against the
/// five ordered keyword sets; queries matching none are `General`.
pub fn classify(query: &str) -> PatternType {
    let query = query.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|keyword| query.contains(keyword));

    if contains_any(QUANTITATIVE_KEYWORDS) {
        PatternType::Quantitative
    } else if contains_any(CAUSAL_KEYWORDS) {
        PatternType::Causal
    } else if contains_any(VISUALIZATION_KEYWORDS) {
        PatternType::Visualization
    } else if contains_any(RECOMMENDATION_KEYWORDS) {
        PatternType::Recommendation
    } else if contains_any(COMPARISON_KEYWORDS) {
        PatternType::Comparison
    } else {
        PatternType::General
    }
}
