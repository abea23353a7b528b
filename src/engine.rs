//! LearningEngine: the engine facade.
//!
//! Owns the store, classifier, analyzers and the generation trigger. Write
//! paths (`log_interaction`, `add_feedback`) surface store failures to the
//! caller; the trigger and the analyzers are fail-open — their errors are
//! logged and swallowed so insight quality can degrade without affecting
//! the host system's availability.

use crate::analyzers::{anomalies, frequent_queries, operational, tool_effectiveness};
use crate::classifier::classify;
use crate::config::LearningConfig;
use crate::stats::{self, LearningStatistics};
use crate::store::LearningStore;
use crate::types::{
    format_timestamp, parse_timestamp_lossy, Insight, InsightFilter, InteractionDraft, NewInsight,
    PatternSample, Recommendation, RecommendationDraft, RecommendationFilter,
};
use crate::LearningError;

use chrono::Utc;
use tokio::sync::Mutex;

use std::sync::Arc;

/// learning_state key holding the last generation timestamp.
///
/// Persisted rather than held in memory so the trigger baseline survives
/// restarts. Each process still evaluates the trigger independently; in a
/// multi-process deployment this can duplicate or delay a generation run.
const LAST_GENERATION_KEY: &str = "last_insight_generation";

/// Facade over the learning subsystem.
///
/// Safe to share across concurrent callers: every agent turn calls
/// [`log_interaction`](Self::log_interaction), reviewers call
/// [`add_feedback`](Self::add_feedback), and the reporting surface reads
/// through the query methods.
pub struct LearningEngine {
    store: Arc<LearningStore>,
    config: LearningConfig,
    /// Serializes generation runs within this process.
    generation_lock: Mutex<()>,
}

impl LearningEngine {
    /// Create an engine over a connected store.
    ///
    /// Seeds the generation cursor if the database has none, so a fresh
    /// deployment counts volume from engine start rather than triggering on
    /// pre-existing history.
    pub async fn new(
        store: Arc<LearningStore>,
        config: LearningConfig,
    ) -> Result<Self, LearningError> {
        if store.get_state(LAST_GENERATION_KEY).await?.is_none() {
            store
                .set_state(LAST_GENERATION_KEY, format_timestamp(Utc::now()))
                .await?;
        }
        tracing::info!("learning engine ready");
        Ok(Self {
            store,
            config,
            generation_lock: Mutex::new(()),
        })
    }

    /// The underlying store, for embedding applications that need direct
    /// read access.
    pub fn store(&self) -> &Arc<LearningStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Log one agent turn and return its interaction id.
    ///
    /// A store failure propagates so the caller can retry — a logged turn is
    /// never silently dropped. After the append, the volume trigger is
    /// checked fail-open: a failing generation pass does not fail the log.
    pub async fn log_interaction(
        &self,
        draft: &InteractionDraft,
    ) -> Result<i64, LearningError> {
        let id = self.store.insert_interaction(draft, Utc::now()).await?;
        self.maybe_generate().await;
        Ok(id)
    }

    /// Attach a feedback score (and optional text) to an interaction, then
    /// fold the score into the learned pattern for the query's category.
    ///
    /// Fails with `InvalidScore` before any write when the score is outside
    /// [0, 1], and with `NotFound` when the interaction does not exist.
    pub async fn add_feedback(
        &self,
        interaction_id: i64,
        score: f64,
        feedback_text: Option<&str>,
    ) -> Result<(), LearningError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(LearningError::InvalidScore(score));
        }

        let affected = self
            .store
            .set_feedback(interaction_id, score, feedback_text)
            .await?;
        if affected == 0 {
            return Err(LearningError::NotFound(interaction_id));
        }

        let Some(interaction) = self.store.get_interaction(interaction_id).await? else {
            return Err(LearningError::NotFound(interaction_id));
        };

        let pattern_type = classify(&interaction.user_query);
        let sample =
            PatternSample::from_interaction(&interaction.user_query, &interaction.tools_used);
        self.store
            .fold_pattern_feedback(pattern_type, score, &sample, Utc::now())
            .await
    }

    /// Create a recommendation on behalf of an external caller.
    pub async fn add_recommendation(
        &self,
        draft: &RecommendationDraft,
    ) -> Result<i64, LearningError> {
        self.store.insert_recommendation(draft, Utc::now()).await
    }

    /// Mark a recommendation as implemented (or not).
    ///
    /// Fails with `NotFound` when the recommendation does not exist.
    pub async fn set_recommendation_implemented(
        &self,
        recommendation_id: i64,
        implemented: bool,
    ) -> Result<(), LearningError> {
        let affected = self
            .store
            .set_recommendation_implemented(recommendation_id, implemented)
            .await?;
        if affected == 0 {
            return Err(LearningError::NotFound(recommendation_id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Filtered insight listing, most recent first.
    pub async fn get_insights(
        &self,
        filter: &InsightFilter,
    ) -> Result<Vec<Insight>, LearningError> {
        self.store.list_insights(filter).await
    }

    /// Filtered recommendation listing, by confidence then recency.
    pub async fn get_recommendations(
        &self,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Recommendation>, LearningError> {
        self.store.list_recommendations(filter).await
    }

    /// Statistics snapshot over the trailing `days`-day window.
    pub async fn get_statistics(&self, days: u32) -> Result<LearningStatistics, LearningError> {
        stats::snapshot_window(&self.store, days, Utc::now()).await
    }

    // -----------------------------------------------------------------------
    // Insight generation
    // -----------------------------------------------------------------------

    /// Run all analyzers now, persist their output, advance the trigger
    /// baseline, and return the newly created insights.
    ///
    /// Analyzers run sequentially and are isolated from each other: one
    /// failing is logged and its output discarded while the rest still run
    /// and persist.
    pub async fn generate_insights_now(&self) -> Result<Vec<Insight>, LearningError> {
        let _guard = self.generation_lock.lock().await;
        let now = Utc::now();

        let results = [
            (
                "frequent_queries",
                frequent_queries::run(&self.store, &self.config, now).await,
            ),
            (
                "tool_effectiveness",
                tool_effectiveness::run(&self.store, &self.config, now).await,
            ),
            (
                "anomalies",
                anomalies::run(&self.store, &self.config, now).await,
            ),
            (
                "operational",
                operational::run(&self.store, &self.config, now).await,
            ),
        ];

        let mut candidates: Vec<NewInsight> = Vec::new();
        for (analyzer, result) in results {
            match result {
                Ok(batch) => candidates.extend(batch),
                Err(error) => {
                    tracing::warn!(analyzer, %error, "insight analyzer failed, skipping its output");
                }
            }
        }

        let mut persisted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let id = self.store.insert_insight(&candidate).await?;
            persisted.push(candidate.into_insight(id));
        }

        self.store
            .set_state(LAST_GENERATION_KEY, format_timestamp(now))
            .await?;
        tracing::info!(count = persisted.len(), "insight generation complete");

        Ok(persisted)
    }

    /// Check the volume trigger and run a generation pass if it fires.
    async fn maybe_generate(&self) {
        match self.interactions_since_last_generation().await {
            Ok(count) if count >= self.config.insight_generation_frequency => {
                tracing::debug!(count, "interaction volume reached generation threshold");
                if let Err(error) = self.generate_insights_now().await {
                    tracing::warn!(%error, "automatic insight generation failed");
                }
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, "insight generation trigger check failed");
            }
        }
    }

    /// Count interactions logged after the persisted generation cursor.
    async fn interactions_since_last_generation(&self) -> Result<i64, LearningError> {
        let cursor = match self.store.get_state(LAST_GENERATION_KEY).await? {
            Some(raw) => parse_timestamp_lossy(&raw),
            None => {
                // Cursor lost (e.g. state table cleared): reseed from now.
                let now = Utc::now();
                self.store
                    .set_state(LAST_GENERATION_KEY, format_timestamp(now))
                    .await?;
                now
            }
        };
        self.store.count_interactions_since(cursor).await
    }
}

impl std::fmt::Debug for LearningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
