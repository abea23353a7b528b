//! Learning engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the learning engine.
///
/// Loadable from an embedding application's config file; all fields have
/// defaults suitable for a single-deployment agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LearningConfig {
    /// Minimum interactions sharing a query prefix before the frequent-query
    /// analyzer reports the group as a pattern.
    pub min_interactions_for_pattern: i64,
    /// Confidence floor for surfacing learned patterns to consumers.
    pub confidence_threshold: f64,
    /// Reserved: relative weight of explicit feedback in future blended
    /// scoring. The current update rule does not apply it.
    pub feedback_weight: f64,
    /// Reserved: recency decay weight. The confidence update deliberately
    /// weights all historical feedback equally; this knob is carried but
    /// not applied.
    pub recency_weight: f64,
    /// Number of interactions since the last generation run that triggers
    /// an automatic one.
    pub insight_generation_frequency: i64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_interactions_for_pattern: 10,
            confidence_threshold: 0.70,
            feedback_weight: 0.8,
            recency_weight: 0.2,
            insight_generation_frequency: 100,
        }
    }
}
