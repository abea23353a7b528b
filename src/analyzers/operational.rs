//! Operational-recommendation generator.

use crate::config::LearningConfig;
use crate::stats;
use crate::store::LearningStore;
use crate::types::{InsightCategory, NewInsight, Priority};

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Window over which operating statistics are evaluated.
const LOOKBACK_DAYS: u32 = 7;

/// Feedback rate (%) below which more feedback is requested.
const MIN_FEEDBACK_RATE: f64 = 30.0;

/// Feedback rate (%) the recommendation aims for.
const TARGET_FEEDBACK_RATE: f64 = 50.0;

/// Window insight count below which generation frequency is questioned.
const MIN_WINDOW_INSIGHTS: i64 = 5;

/// Generate recommendations about the learning loop's own operation.
///
/// Looks at the trailing week's statistics: a low feedback rate and a thin
/// insight yield each produce one `recommendation` insight.
pub(crate) async fn run(
    store: &LearningStore,
    _config: &LearningConfig,
    now: DateTime<Utc>,
) -> Result<Vec<NewInsight>> {
    let stats = stats::snapshot_window(store, LOOKBACK_DAYS, now).await?;

    let mut insights = Vec::new();

    if stats.feedback_rate < MIN_FEEDBACK_RATE {
        insights.push(NewInsight {
            timestamp: now,
            category: InsightCategory::Recommendation,
            title: "Increase feedback rate".to_owned(),
            description: format!(
                "Only {:.1}% of interactions have feedback. Target: >{TARGET_FEEDBACK_RATE:.0}%",
                stats.feedback_rate
            ),
            confidence: 0.90,
            priority: Priority::High,
            metadata: serde_json::json!({
                "current_rate": stats.feedback_rate,
                "target": TARGET_FEEDBACK_RATE,
            }),
        });
    }

    if stats.total_insights < MIN_WINDOW_INSIGHTS {
        insights.push(NewInsight {
            timestamp: now,
            category: InsightCategory::Recommendation,
            title: "Generate more automatic insights".to_owned(),
            description:
                "Few insights generated in the last week. Review the generation frequency."
                    .to_owned(),
            confidence: 0.75,
            priority: Priority::Medium,
            metadata: serde_json::json!({ "current_count": stats.total_insights }),
        });
    }

    Ok(insights)
}
