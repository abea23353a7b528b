//! Tool-effectiveness detector.

use crate::config::LearningConfig;
use crate::store::LearningStore;
use crate::types::{format_timestamp, InsightCategory, NewInsight, Priority};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row as _;

/// Window over which tool groups are evaluated.
const LOOKBACK_DAYS: i64 = 30;

/// Minimum scored uses of a tool combination before it is considered.
const MIN_USAGE_COUNT: i64 = 5;

/// At most this many combinations are reported per generation pass.
const MAX_GROUPS: i64 = 3;

/// Average score a combination must exceed to be reported.
const MIN_AVG_SCORE: f64 = 0.75;

/// Average score above which the insight is raised to high priority.
const HIGH_PRIORITY_SCORE: f64 = 0.85;

/// Detect tool combinations that consistently earn good feedback.
///
/// Interactions with feedback and a non-empty tool list are grouped by the
/// exact serialized tool-list value; combinations with enough scored uses
/// and a high enough average produce one `recommendation` insight each,
/// confidence `min(0.95, 0.6 + count/50)`.
pub(crate) async fn run(
    store: &LearningStore,
    _config: &LearningConfig,
    now: DateTime<Utc>,
) -> Result<Vec<NewInsight>> {
    let cutoff = format_timestamp(now - Duration::days(LOOKBACK_DAYS));

    let rows = sqlx::query(
        r#"
        SELECT tools_used, AVG(feedback_score) AS avg_score, COUNT(*) AS usage_count
        FROM interactions
        WHERE feedback_score IS NOT NULL
          AND tools_used IS NOT NULL
          AND tools_used != '[]'
          AND timestamp >= ?
        GROUP BY tools_used
        HAVING usage_count >= ?
        ORDER BY avg_score DESC
        LIMIT ?
        "#,
    )
    .bind(&cutoff)
    .bind(MIN_USAGE_COUNT)
    .bind(MAX_GROUPS)
    .fetch_all(store.pool())
    .await?;

    let insights = rows
        .iter()
        .filter_map(|row| {
            let tools_used: String = row.get("tools_used");
            let avg_score: f64 = row.get("avg_score");
            let usage_count: i64 = row.get("usage_count");

            if avg_score <= MIN_AVG_SCORE {
                return None;
            }

            Some(NewInsight {
                timestamp: now,
                category: InsightCategory::Recommendation,
                title: format!("Effective tool combination identified (score: {avg_score:.2})"),
                description: format!(
                    "The tools {tools_used} show high effectiveness across {usage_count} uses"
                ),
                confidence: (0.6 + usage_count as f64 / 50.0).min(0.95),
                priority: if avg_score > HIGH_PRIORITY_SCORE {
                    Priority::High
                } else {
                    Priority::Medium
                },
                metadata: serde_json::json!({
                    "tools": tools_used,
                    "avg_score": avg_score,
                    "usage_count": usage_count,
                }),
            })
        })
        .collect();

    Ok(insights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InteractionDraft;

    use std::sync::Arc;

    async fn temp_store() -> (Arc<LearningStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningStore::connect(&dir.path().join("learning.db"))
            .await
            .unwrap();
        (store, dir)
    }

    async fn log_scored(store: &LearningStore, tools: &[&str], score: f64) {
        let id = store
            .insert_interaction(
                &InteractionDraft {
                    user_query: "q".to_owned(),
                    agent_response: "r".to_owned(),
                    tools_used: tools.iter().map(|tool| (*tool).to_owned()).collect(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        store.set_feedback(id, score, None).await.unwrap();
    }

    #[tokio::test]
    async fn high_scoring_combination_emits_recommendation() {
        let (store, _dir) = temp_store().await;

        for _ in 0..6 {
            log_scored(&store, &["execute_sql", "chart"], 0.9).await;
        }

        let insights = run(&store, &LearningConfig::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(insights.len(), 1);

        let insight = &insights[0];
        assert_eq!(insight.category, InsightCategory::Recommendation);
        // avg 0.9 > 0.85 → high priority.
        assert_eq!(insight.priority, Priority::High);
        // min(0.95, 0.6 + 6/50) = 0.72
        assert!((insight.confidence - 0.72).abs() < 1e-9);
        assert_eq!(insight.metadata["usage_count"], serde_json::json!(6));
    }

    #[tokio::test]
    async fn moderate_scores_get_medium_priority() {
        let (store, _dir) = temp_store().await;

        for _ in 0..5 {
            log_scored(&store, &["execute_sql"], 0.8).await;
        }

        let insights = run(&store, &LearningConfig::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].priority, Priority::Medium);
    }

    #[tokio::test]
    async fn low_average_scores_are_not_reported() {
        let (store, _dir) = temp_store().await;

        for _ in 0..8 {
            log_scored(&store, &["execute_sql"], 0.5).await;
        }

        let insights = run(&store, &LearningConfig::default(), Utc::now())
            .await
            .unwrap();
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn combinations_with_too_few_uses_are_ignored() {
        let (store, _dir) = temp_store().await;

        for _ in 0..4 {
            log_scored(&store, &["execute_sql"], 0.95).await;
        }

        let insights = run(&store, &LearningConfig::default(), Utc::now())
            .await
            .unwrap();
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn unscored_and_toolless_interactions_do_not_count() {
        let (store, _dir) = temp_store().await;

        // Scored but no tools.
        for _ in 0..6 {
            log_scored(&store, &[], 0.9).await;
        }
        // Tools but no feedback.
        for _ in 0..6 {
            store
                .insert_interaction(
                    &InteractionDraft {
                        user_query: "q".to_owned(),
                        agent_response: "r".to_owned(),
                        tools_used: vec!["chart".to_owned()],
                        ..Default::default()
                    },
                    Utc::now(),
                )
                .await
                .unwrap();
        }

        let insights = run(&store, &LearningConfig::default(), Utc::now())
            .await
            .unwrap();
        assert!(insights.is_empty());
    }
}
