//! Response-latency anomaly detector.

use crate::config::LearningConfig;
use crate::store::LearningStore;
use crate::types::{format_timestamp, InsightCategory, NewInsight, Priority};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row as _;

/// Window over which latency is evaluated.
const LOOKBACK_DAYS: i64 = 7;

/// Multiple of the average latency the maximum must exceed.
const ANOMALY_FACTOR: f64 = 3.0;

/// Detect an abnormally slow response in the recent window.
///
/// Emits one `anomaly` insight when the maximum latency exceeds three times
/// the average; an empty window (both aggregates NULL) emits nothing.
pub(crate) async fn run(
    store: &LearningStore,
    _config: &LearningConfig,
    now: DateTime<Utc>,
) -> Result<Vec<NewInsight>> {
    let cutoff = format_timestamp(now - Duration::days(LOOKBACK_DAYS));

    let row = sqlx::query(
        "SELECT AVG(response_time_ms) AS avg_ms, MAX(response_time_ms) AS max_ms \
         FROM interactions WHERE timestamp >= ?",
    )
    .bind(&cutoff)
    .fetch_one(store.pool())
    .await?;

    let avg_ms: Option<f64> = row.get("avg_ms");
    let max_ms: Option<f64> = row.get("max_ms");

    let (Some(avg_ms), Some(max_ms)) = (avg_ms, max_ms) else {
        return Ok(Vec::new());
    };
    if max_ms <= avg_ms * ANOMALY_FACTOR {
        return Ok(Vec::new());
    }

    Ok(vec![NewInsight {
        timestamp: now,
        category: InsightCategory::Anomaly,
        title: "Elevated response time detected".to_owned(),
        description: format!(
            "Maximum latency ({max_ms:.0}ms) is over 3x the average ({avg_ms:.0}ms)"
        ),
        confidence: 0.80,
        priority: Priority::Medium,
        metadata: serde_json::json!({ "avg_ms": avg_ms, "max_ms": max_ms }),
    }])
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

    async fn log_latency(store: &LearningStore, response_time_ms: f64, timestamp: DateTime<Utc>) {
        store
            .insert_interaction(
                &InteractionDraft {
                    user_query: "q".to_owned(),
                    agent_response: "r".to_owned(),
                    response_time_ms,
                    ..Default::default()
                },
                timestamp,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn spike_above_three_times_average_is_flagged() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        // Nine fast turns and one spike: avg = 80ms, max = 350ms > 240ms.
        for _ in 0..9 {
            log_latency(&store, 50.0, now).await;
        }
        log_latency(&store, 350.0, now).await;

        let insights = run(&store, &LearningConfig::default(), now).await.unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].category, InsightCategory::Anomaly);
        assert_eq!(insights[0].priority, Priority::Medium);
        assert!((insights[0].confidence - 0.80).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn maximum_within_three_times_average_is_quiet() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        // avg = 166.7ms, max = 250ms < 500ms.
        for latency in [100.0, 150.0, 250.0] {
            log_latency(&store, latency, now).await;
        }

        let insights = run(&store, &LearningConfig::default(), now).await.unwrap();
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn empty_window_emits_nothing() {
        let (store, _dir) = temp_store().await;
        let insights = run(&store, &LearningConfig::default(), Utc::now())
            .await
            .unwrap();
        assert!(insights.is_empty());
    }

    #[tokio::test]
    async fn spikes_older_than_the_window_are_ignored() {
        let (store, _dir) = temp_store().await;
        let now = Utc::now();

        log_latency(&store, 350.0, now - Duration::days(10)).await;
        for _ in 0..5 {
            log_latency(&store, 50.0, now).await;
        }

        let insights = run(&store, &LearningConfig::default(), now).await.unwrap();
        assert!(insights.is_empty());
    }
}
