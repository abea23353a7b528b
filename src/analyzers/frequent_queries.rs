//! Frequent-query detector.

use crate::config::LearningConfig;
use crate::store::LearningStore;
use crate::types::{format_timestamp, truncate_chars, InsightCategory, NewInsight, Priority};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row as _;

/// Window over which query groups are counted.
const LOOKBACK_DAYS: i64 = 30;

/// At most this many groups are reported per generation pass.
const MAX_GROUPS: i64 = 5;

/// Group count above which the insight is raised to medium priority.
const MEDIUM_PRIORITY_COUNT: i64 = 20;

/// Detect queries users keep asking.
///
/// Interactions in the lookback window are grouped by the lower-cased first
/// 50 characters of the query; groups at or above the configured minimum
/// produce one `pattern` insight each, confidence `min(0.9, 0.5 + count/50)`.
pub(crate) async fn run(
    store: &LearningStore,
    config: &LearningConfig,
    now: DateTime<Utc>,
) -> Result<Vec<NewInsight>> {
    let cutoff = format_timestamp(now - Duration::days(LOOKBACK_DAYS));

    let rows = sqlx::query(
        r#"
        SELECT user_query, COUNT(*) AS freq
        FROM interactions
        WHERE timestamp >= ?
        GROUP BY LOWER(SUBSTR(user_query, 1, 50))
        HAVING freq >= ?
        ORDER BY freq DESC
        LIMIT ?
        "#,
    )
    .bind(&cutoff)
    .bind(config.min_interactions_for_pattern)
    .bind(MAX_GROUPS)
    .fetch_all(store.pool())
    .await?;

    let insights = rows
        .iter()
        .map(|row| {
            let user_query: String = row.get("user_query");
            let freq: i64 = row.get("freq");
            NewInsight {
                timestamp: now,
                category: InsightCategory::Pattern,
                title: format!("Frequent query detected ({freq} times)"),
                description: format!(
                    "Users repeatedly ask: '{}...'",
                    truncate_chars(&user_query, 100)
                ),
                confidence: (0.5 + freq as f64 / 50.0).min(0.9),
                priority: if freq > MEDIUM_PRIORITY_COUNT {
                    Priority::Medium
                } else {
                    Priority::Low
                },
                metadata: serde_json::json!({
                    "frequency": freq,
                    "query_sample": truncate_chars(&user_query, 200),
                }),
            }
        })
        .collect();

    Ok(insights)
}
