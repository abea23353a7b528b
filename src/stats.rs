//! Rolling-window statistics over the learning history.

use crate::store::LearningStore;
use crate::types::{format_timestamp, InsightCategory};
use crate::LearningError;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::Row as _;

use std::collections::{BTreeMap, HashMap};

/// Number of tools reported in the most-used ranking.
const TOP_TOOLS: usize = 10;

/// One tool and its invocation count within the window.
#[derive(Debug, Clone, Serialize)]
pub struct ToolUsage {
    pub name: String,
    pub count: i64,
}

/// Snapshot of learning activity over a trailing window.
///
/// Every rate field is 0 (not an error) when its denominator is zero.
#[derive(Debug, Clone, Serialize)]
pub struct LearningStatistics {
    pub period_days: u32,
    pub total_interactions: i64,
    pub interactions_with_feedback: i64,
    /// Percentage of interactions carrying feedback, rounded to 2 decimals.
    pub feedback_rate: f64,
    /// Mean feedback score over scored interactions, rounded to 3 decimals.
    pub avg_feedback_score: f64,
    pub avg_response_time_ms: f64,
    pub total_insights: i64,
    pub insights_by_category: BTreeMap<InsightCategory, i64>,
    pub total_recommendations: i64,
    pub implemented_recommendations: i64,
    /// Percentage of recommendations marked implemented, rounded to 2 decimals.
    pub implementation_rate: f64,
    /// Top tools by invocation count, ties broken by name.
    pub most_used_tools: Vec<ToolUsage>,
}

/// Compute the statistics snapshot for the trailing `days`-day window.
pub(crate) async fn snapshot_window(
    store: &LearningStore,
    days: u32,
    now: DateTime<Utc>,
) -> Result<LearningStatistics, LearningError> {
    let pool = store.pool();
    let cutoff = format_timestamp(now - Duration::days(i64::from(days)));

    let interaction_row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(feedback_score) AS with_feedback,
            AVG(feedback_score) AS avg_score,
            AVG(response_time_ms) AS avg_response_time
        FROM interactions
        WHERE timestamp >= ?
        "#,
    )
    .bind(&cutoff)
    .fetch_one(pool)
    .await?;

    let total_interactions: i64 = interaction_row.get("total");
    let interactions_with_feedback: i64 = interaction_row.get("with_feedback");
    let avg_feedback_score: Option<f64> = interaction_row.get("avg_score");
    let avg_response_time_ms: Option<f64> = interaction_row.get("avg_response_time");

    let feedback_rate = if total_interactions > 0 {
        round2(interactions_with_feedback as f64 / total_interactions as f64 * 100.0)
    } else {
        0.0
    };

    let category_rows = sqlx::query(
        "SELECT category, COUNT(*) AS count FROM insights WHERE timestamp >= ? GROUP BY category",
    )
    .bind(&cutoff)
    .fetch_all(pool)
    .await?;

    let mut insights_by_category = BTreeMap::new();
    let mut total_insights = 0;
    for row in &category_rows {
        let category = InsightCategory::from_str_lossy(row.get("category"));
        let count: i64 = row.get("count");
        total_insights += count;
        *insights_by_category.entry(category).or_insert(0) += count;
    }

    let recommendation_row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(implemented), 0) AS implemented
        FROM recommendations
        WHERE timestamp >= ?
        "#,
    )
    .bind(&cutoff)
    .fetch_one(pool)
    .await?;

    let total_recommendations: i64 = recommendation_row.get("total");
    let implemented_recommendations: i64 = recommendation_row.get("implemented");
    let implementation_rate = if total_recommendations > 0 {
        round2(implemented_recommendations as f64 / total_recommendations as f64 * 100.0)
    } else {
        0.0
    };

    Ok(LearningStatistics {
        period_days: days,
        total_interactions,
        interactions_with_feedback,
        feedback_rate,
        avg_feedback_score: round3(avg_feedback_score.unwrap_or(0.0)),
        avg_response_time_ms: round2(avg_response_time_ms.unwrap_or(0.0)),
        total_insights,
        insights_by_category,
        total_recommendations,
        implemented_recommendations,
        implementation_rate,
        most_used_tools: most_used_tools(store, &cutoff).await?,
    })
}

/// Rank tool names by invocation count across the window.
///
/// Tool lists are parsed and flattened before counting; malformed payloads
/// contribute nothing.
async fn most_used_tools(
    store: &LearningStore,
    cutoff: &str,
) -> Result<Vec<ToolUsage>, LearningError> {
    let rows = sqlx::query(
        "SELECT tools_used FROM interactions WHERE timestamp >= ? AND tools_used IS NOT NULL",
    )
    .bind(cutoff)
    .fetch_all(store.pool())
    .await?;

    let mut counts: HashMap<String, i64> = HashMap::new();
    for row in &rows {
        let raw: String = row.get("tools_used");
        for name in parse_tool_names(&raw) {
            *counts.entry(name).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<ToolUsage> = counts
        .into_iter()
        .map(|(name, count)| ToolUsage { name, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(TOP_TOOLS);
    Ok(ranked)
}

/// Extract tool names from a serialized tool list, defensively.
///
/// Accepts both plain string entries and `{"name": …}` objects; anything
/// else — including unparseable JSON — is skipped rather than failing.
pub(crate) fn parse_tool_names(raw: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(name) => Some(name.clone()),
            serde_json::Value::Object(fields) => fields
                .get("name")
                .and_then(|name| name.as_str())
                .map(str::to_owned),
            _ => None,
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Impact, InsightCategory, InteractionDraft, NewInsight, Priority, RecommendationDraft,
    };

    use std::sync::Arc;

    async fn temp_store() -> (Arc<LearningStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = LearningStore::connect(&dir.path().join("learning.db"))
            .await
            .unwrap();
        (store, dir)
    }

    fn draft_with_tools(tools: &[&str]) -> InteractionDraft {
        InteractionDraft {
            user_query: "q".to_owned(),
            agent_response: "r".to_owned(),
            tools_used: tools.iter().map(|tool| (*tool).to_owned()).collect(),
            context: serde_json::Map::new(),
            response_time_ms: 100.0,
            tokens_used: 10,
        }
    }

    // --- parse_tool_names ---

    #[test]
    fn parses_plain_string_entries() {
        assert_eq!(
            parse_tool_names(r#"["execute_sql", "chart"]"#),
            vec!["execute_sql".to_owned(), "chart".to_owned()]
        );
    }

    #[test]
    fn parses_object_entries_with_name_field() {
        assert_eq!(
            parse_tool_names(r#"[{"name": "execute_sql", "calls": 2}]"#),
            vec!["execute_sql".to_owned()]
        );
    }

    #[test]
    fn skips_malformed_entries_and_payloads() {
        assert!(parse_tool_names("not json").is_empty());
        assert!(parse_tool_names(r#"{"name": "not a list"}"#).is_empty());
        assert_eq!(
            parse_tool_names(r#"[42, null, {"tool": "no name"}, "ok"]"#),
            vec!["ok".to_owned()]
        );
    }

    // --- snapshot_window ---

    #[tokio::test]
    async fn empty_window_yields_zero_rates_not_errors() {
        let (store, _dir) = temp_store().await;
        let stats = snapshot_window(&store, 30, Utc::now()).await.unwrap();

        assert_eq!(stats.period_days, 30);
        assert_eq!(stats.total_interactions, 0);
        assert_eq!(stats.interactions_with_feedback, 0);
        assert_eq!(stats.feedback_rate, 0.0);
        assert_eq!(stats.avg_feedback_score, 0.0);
        assert_eq!(stats.avg_response_time_ms, 0.0);
        assert_eq!(stats.total_insights, 0);
        assert!(stats.insights_by_category.is_empty());
        assert_eq!(stats.implementation_rate, 0.0);
        assert!(stats.most_used_tools.is_empty());
    }

    #[tokio::test]
    async fn feedback_rate_and_averages_over_window() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        for _ in 0..4 {
            store
                .insert_interaction(&draft_with_tools(&["execute_sql"]), now)
                .await
                .unwrap();
        }
        let scored = store
            .insert_interaction(&draft_with_tools(&["chart"]), now)
            .await
            .unwrap();
        store.set_feedback(scored, 0.8, None).await.unwrap();

        let stats = snapshot_window(&store, 7, now).await.unwrap();
        assert_eq!(stats.total_interactions, 5);
        assert_eq!(stats.interactions_with_feedback, 1);
        assert_eq!(stats.feedback_rate, 20.0);
        assert_eq!(stats.avg_feedback_score, 0.8);
        assert_eq!(stats.avg_response_time_ms, 100.0);
    }

    #[tokio::test]
    async fn old_interactions_fall_outside_the_window() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        store
            .insert_interaction(&draft_with_tools(&[]), now - chrono::Duration::days(40))
            .await
            .unwrap();
        store
            .insert_interaction(&draft_with_tools(&[]), now)
            .await
            .unwrap();

        let stats = snapshot_window(&store, 30, now).await.unwrap();
        assert_eq!(stats.total_interactions, 1);
    }

    #[tokio::test]
    async fn insights_grouped_by_category() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        for category in [
            InsightCategory::Pattern,
            InsightCategory::Pattern,
            InsightCategory::Anomaly,
        ] {
            store
                .insert_insight(&NewInsight {
                    timestamp: now,
                    category,
                    title: "t".to_owned(),
                    description: "d".to_owned(),
                    confidence: 0.5,
                    priority: Priority::Low,
                    metadata: serde_json::json!({}),
                })
                .await
                .unwrap();
        }

        let stats = snapshot_window(&store, 7, now).await.unwrap();
        assert_eq!(stats.total_insights, 3);
        assert_eq!(stats.insights_by_category[&InsightCategory::Pattern], 2);
        assert_eq!(stats.insights_by_category[&InsightCategory::Anomaly], 1);
    }

    #[tokio::test]
    async fn implementation_rate_counts_marked_recommendations() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        let draft = RecommendationDraft {
            topic: "feedback".to_owned(),
            recommendation: "ask for ratings".to_owned(),
            reasoning: "low coverage".to_owned(),
            confidence: 0.9,
            impact: Impact::High,
        };
        let first = store.insert_recommendation(&draft, now).await.unwrap();
        store.insert_recommendation(&draft, now).await.unwrap();
        store
            .set_recommendation_implemented(first, true)
            .await
            .unwrap();

        let stats = snapshot_window(&store, 7, now).await.unwrap();
        assert_eq!(stats.total_recommendations, 2);
        assert_eq!(stats.implemented_recommendations, 1);
        assert_eq!(stats.implementation_rate, 50.0);
    }

    #[tokio::test]
    async fn most_used_tools_ranks_by_count_capped_at_ten() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        // 12 distinct tools; "execute_sql" appears on every interaction.
        for index in 0..12 {
            let extra = format!("tool_{index:02}");
            store
                .insert_interaction(&draft_with_tools(&["execute_sql", &extra]), now)
                .await
                .unwrap();
        }

        let stats = snapshot_window(&store, 7, now).await.unwrap();
        assert_eq!(stats.most_used_tools.len(), 10);
        assert_eq!(stats.most_used_tools[0].name, "execute_sql");
        assert_eq!(stats.most_used_tools[0].count, 12);
        // Ties among the singleton tools break by name.
        assert_eq!(stats.most_used_tools[1].name, "tool_00");
    }
}
