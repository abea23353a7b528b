//! Data types for the learning engine.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pattern classification
// ---------------------------------------------------------------------------

/// Query classification category produced by the pattern classifier.
///
/// One learned-pattern aggregate exists per category. The order of variants
/// mirrors the order the classifier tests its keyword sets in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Quantitative,
    Causal,
    Visualization,
    Recommendation,
    Comparison,
    General,
}

impl PatternType {
    /// Parse from a string, defaulting to General.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "quantitative" => Self::Quantitative,
            "causal" => Self::Causal,
            "visualization" => Self::Visualization,
            "recommendation" => Self::Recommendation,
            "comparison" => Self::Comparison,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quantitative => write!(f, "quantitative"),
            Self::Causal => write!(f, "causal"),
            Self::Visualization => write!(f, "visualization"),
            Self::Recommendation => write!(f, "recommendation"),
            Self::Comparison => write!(f, "comparison"),
            Self::General => write!(f, "general"),
        }
    }
}

// ---------------------------------------------------------------------------
// Insight categories and priorities
// ---------------------------------------------------------------------------

/// Category of a synthesized insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    Pattern,
    Recommendation,
    Anomaly,
}

impl InsightCategory {
    /// Parse from a string, defaulting to Pattern.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "recommendation" => Self::Recommendation,
            "anomaly" => Self::Anomaly,
            _ => Self::Pattern,
        }
    }
}

impl std::fmt::Display for InsightCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern => write!(f, "pattern"),
            Self::Recommendation => write!(f, "recommendation"),
            Self::Anomaly => write!(f, "anomaly"),
        }
    }
}

/// Priority assigned to an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Parse from a string, defaulting to Low.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Low,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Expected impact of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

impl Impact {
    /// Parse from a string, defaulting to Low.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Low,
        }
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One logged agent turn.
///
/// Feedback is the only mutation an interaction ever receives; rows are
/// never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Interaction {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub agent_response: String,
    pub tools_used: Vec<String>,
    pub feedback_score: Option<f64>,
    pub feedback_text: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub response_time_ms: f64,
    pub tokens_used: i64,
}

/// Input bundle for logging a new interaction.
#[derive(Debug, Clone, Default)]
pub struct InteractionDraft {
    pub user_query: String,
    pub agent_response: String,
    pub tools_used: Vec<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
    pub response_time_ms: f64,
    pub tokens_used: i64,
}

/// A synthesized observation, immutable once persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub category: InsightCategory,
    pub title: String,
    pub description: String,
    pub confidence: f64,
    pub priority: Priority,
    pub metadata: serde_json::Value,
}

/// An insight candidate produced by an analyzer, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewInsight {
    pub timestamp: DateTime<Utc>,
    pub category: InsightCategory,
    pub title: String,
    pub description: String,
    pub confidence: f64,
    pub priority: Priority,
    pub metadata: serde_json::Value,
}

impl NewInsight {
    /// Attach the store-assigned id after persistence.
    pub(crate) fn into_insight(self, id: i64) -> Insight {
        Insight {
            id,
            timestamp: self.timestamp,
            category: self.category,
            title: self.title,
            description: self.description,
            confidence: self.confidence,
            priority: self.priority,
            metadata: self.metadata,
        }
    }
}

/// An actionable suggestion tied to a topic.
///
/// The `implemented` flag is the only mutable field; it is flipped by an
/// external reviewer action.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub recommendation: String,
    pub reasoning: String,
    pub confidence: f64,
    pub impact: Impact,
    pub implemented: bool,
}

/// Input bundle for creating a recommendation.
#[derive(Debug, Clone)]
pub struct RecommendationDraft {
    pub topic: String,
    pub recommendation: String,
    pub reasoning: String,
    pub confidence: f64,
    pub impact: Impact,
}

/// Confidence/frequency aggregate for one classification category.
#[derive(Debug, Clone, Serialize)]
pub struct LearnedPattern {
    pub id: i64,
    pub pattern_type: PatternType,
    pub pattern_data: PatternSample,
    pub frequency: i64,
    pub last_seen: DateTime<Utc>,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Pattern sample payload
// ---------------------------------------------------------------------------

/// Current schema version written into new `pattern_data` payloads.
pub const PATTERN_SAMPLE_VERSION: u32 = 1;

/// Inspection payload stored alongside a learned pattern: a truncated sample
/// of the query that first (or most recently) exercised it, plus the tool
/// list in effect.
///
/// Versioned so future readers can interpret older payloads; readers treat
/// a malformed payload as an empty sample rather than failing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSample {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub query_template: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl PatternSample {
    /// Build a sample from an interaction's query and tool list.
    ///
    /// The query is truncated to 100 characters on a char boundary.
    pub fn from_interaction(user_query: &str, tools_used: &[String]) -> Self {
        Self {
            version: PATTERN_SAMPLE_VERSION,
            query_template: truncate_chars(user_query, 100).to_owned(),
            tools: tools_used.to_vec(),
        }
    }

    /// Parse from the serialized column value, tolerating malformed payloads.
    pub fn from_json_lossy(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Query filters
// ---------------------------------------------------------------------------

/// Filter for insight listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub category: Option<InsightCategory>,
    pub priority: Option<Priority>,
    /// Result cap, defaulting to 50.
    pub limit: Option<u32>,
}

/// Filter for recommendation listings. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RecommendationFilter {
    pub topic: Option<String>,
    pub impact: Option<Impact>,
    pub only_not_implemented: bool,
    /// Result cap, defaulting to 20.
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Format a timestamp for storage.
///
/// A fixed sub-second width keeps lexicographic ordering of the stored text
/// identical to chronological ordering, which the window queries rely on.
pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, falling back to now on malformed text.
pub(crate) fn parse_timestamp_lossy(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_type_display_round_trips() {
        for pattern_type in [
            PatternType::Quantitative,
            PatternType::Causal,
            PatternType::Visualization,
            PatternType::Recommendation,
            PatternType::Comparison,
            PatternType::General,
        ] {
            let rendered = pattern_type.to_string();
            assert_eq!(PatternType::from_str_lossy(&rendered), pattern_type);
        }
    }

    #[test]
    fn unknown_category_strings_degrade_to_defaults() {
        assert_eq!(PatternType::from_str_lossy("???"), PatternType::General);
        assert_eq!(InsightCategory::from_str_lossy(""), InsightCategory::Pattern);
        assert_eq!(Priority::from_str_lossy("urgent"), Priority::Low);
        assert_eq!(Impact::from_str_lossy("severe"), Impact::Low);
    }

    #[test]
    fn pattern_sample_tolerates_malformed_json() {
        let sample = PatternSample::from_json_lossy("not json at all {{");
        assert_eq!(sample.query_template, "");
        assert!(sample.tools.is_empty());
    }

    #[test]
    fn pattern_sample_truncates_long_queries() {
        let long_query = "x".repeat(500);
        let sample = PatternSample::from_interaction(&long_query, &[]);
        assert_eq!(sample.query_template.chars().count(), 100);
        assert_eq!(sample.version, PATTERN_SAMPLE_VERSION);
    }

    #[test]
    fn truncate_chars_respects_multibyte_boundaries() {
        // "ñ" is two bytes; slicing by bytes would panic mid-character.
        let text = "ñ".repeat(10);
        assert_eq!(truncate_chars(&text, 4).chars().count(), 4);
        assert_eq!(truncate_chars(&text, 20), text.as_str());
    }

    #[test]
    fn stored_timestamps_order_lexicographically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
    }

    #[test]
    fn parse_timestamp_round_trips() {
        let now = Utc::now();
        let parsed = parse_timestamp_lossy(&format_timestamp(now));
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
