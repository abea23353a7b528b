//! LearningStore: CRUD operations against learning.db.

use crate::types::{
    format_timestamp, parse_timestamp_lossy, Impact, Insight, InsightCategory, InsightFilter,
    Interaction, InteractionDraft, LearnedPattern, NewInsight, PatternSample, PatternType,
    Priority, Recommendation, RecommendationDraft, RecommendationFilter,
};
use crate::LearningError;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Default result cap for insight listings.
const DEFAULT_INSIGHT_LIMIT: u32 = 50;

/// Default result cap for recommendation listings.
const DEFAULT_RECOMMENDATION_LIMIT: u32 = 20;

/// Wraps a dedicated SQLite connection pool for learning.db.
///
/// Separate from any main application database so high-frequency interaction
/// writes don't contend with latency-sensitive reads elsewhere. SQLite's
/// single-writer model plus the atomic upsert in
/// [`fold_pattern_feedback`](Self::fold_pattern_feedback) gives the
/// read-modify-write on learned patterns lost-update safety under concurrent
/// feedback.
pub struct LearningStore {
    pool: SqlitePool,
}

impl LearningStore {
    /// Connect to (or create) learning.db at the given path.
    ///
    /// Runs the embedded schema, enables WAL mode, and configures a small
    /// pool with a busy timeout so writers wait instead of failing fast.
    pub async fn connect(path: &Path) -> Result<Arc<Self>, LearningError> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Arc::new(Self { pool }))
    }

    /// Run the embedded learning schema. Raw SQL rather than `sqlx::migrate!`
    /// because learning.db is a dedicated database file with no external
    /// migrations directory.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), LearningError> {
        sqlx::raw_sql(SCHEMA_V1).execute(pool).await?;
        Ok(())
    }

    /// Expose the pool for analyzer and statistics queries.
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------------
    // Interactions
    // -----------------------------------------------------------------------

    /// Append one interaction row and return its assigned id.
    pub async fn insert_interaction(
        &self,
        draft: &InteractionDraft,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, LearningError> {
        let tools_json = serde_json::Value::from(draft.tools_used.clone()).to_string();
        let context_json = serde_json::Value::Object(draft.context.clone()).to_string();

        let result = sqlx::query(
            "INSERT INTO interactions \
             (timestamp, user_query, agent_response, tools_used, context, response_time_ms, tokens_used) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(format_timestamp(timestamp))
        .bind(&draft.user_query)
        .bind(&draft.agent_response)
        .bind(&tools_json)
        .bind(&context_json)
        .bind(draft.response_time_ms)
        .bind(draft.tokens_used)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Point read of one interaction.
    pub async fn get_interaction(&self, id: i64) -> Result<Option<Interaction>, LearningError> {
        let row = sqlx::query(
            "SELECT id, timestamp, user_query, agent_response, tools_used, feedback_score, \
                    feedback_text, context, response_time_ms, tokens_used \
             FROM interactions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| map_interaction(&row)))
    }

    /// Write feedback onto an interaction row.
    ///
    /// Returns the number of rows affected; updating a non-existent id is a
    /// zero-rows no-op, not an error.
    pub async fn set_feedback(
        &self,
        id: i64,
        score: f64,
        feedback_text: Option<&str>,
    ) -> Result<u64, LearningError> {
        let result =
            sqlx::query("UPDATE interactions SET feedback_score = ?, feedback_text = ? WHERE id = ?")
                .bind(score)
                .bind(feedback_text)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Count interactions logged strictly after the given instant.
    pub async fn count_interactions_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<i64, LearningError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM interactions WHERE timestamp > ?")
            .bind(format_timestamp(cutoff))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    // -----------------------------------------------------------------------
    // Learned patterns
    // -----------------------------------------------------------------------

    /// Point read of the aggregate for one pattern type.
    pub async fn get_pattern(
        &self,
        pattern_type: PatternType,
    ) -> Result<Option<LearnedPattern>, LearningError> {
        let row = sqlx::query(
            "SELECT id, pattern_type, pattern_data, frequency, last_seen, confidence \
             FROM learned_patterns WHERE pattern_type = ?",
        )
        .bind(pattern_type.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| LearnedPattern {
            id: row.get("id"),
            pattern_type: PatternType::from_str_lossy(row.get("pattern_type")),
            pattern_data: PatternSample::from_json_lossy(row.get("pattern_data")),
            frequency: row.get("frequency"),
            last_seen: parse_timestamp_lossy(row.get("last_seen")),
            confidence: row.get("confidence"),
        }))
    }

    /// Fold one feedback score into the aggregate for a pattern type.
    ///
    /// An absent aggregate is created with frequency 1 and confidence equal
    /// to the score; an existing one gets the incremental weighted mean
    /// `(confidence * frequency + score) / (frequency + 1)`. The whole fold
    /// is a single upsert statement, so concurrent feedback on the same
    /// pattern type serializes on the row and cannot lose updates. The
    /// sample payload is only written on creation; later folds keep the
    /// original.
    pub async fn fold_pattern_feedback(
        &self,
        pattern_type: PatternType,
        score: f64,
        sample: &PatternSample,
        now: DateTime<Utc>,
    ) -> Result<(), LearningError> {
        let sample_json = serde_json::to_string(sample).map_err(anyhow::Error::from)?;
        sqlx::query(
            "INSERT INTO learned_patterns \
             (pattern_type, pattern_data, frequency, last_seen, confidence) \
             VALUES (?, ?, 1, ?, ?) \
             ON CONFLICT(pattern_type) DO UPDATE SET \
                 confidence = (learned_patterns.confidence * learned_patterns.frequency + excluded.confidence) \
                     / (learned_patterns.frequency + 1), \
                 frequency = learned_patterns.frequency + 1, \
                 last_seen = excluded.last_seen",
        )
        .bind(pattern_type.to_string())
        .bind(&sample_json)
        .bind(format_timestamp(now))
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Insights
    // -----------------------------------------------------------------------

    /// Persist one insight and return its assigned id.
    pub async fn insert_insight(&self, insight: &NewInsight) -> Result<i64, LearningError> {
        let result = sqlx::query(
            "INSERT INTO insights \
             (timestamp, category, title, description, confidence, priority, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(format_timestamp(insight.timestamp))
        .bind(insight.category.to_string())
        .bind(&insight.title)
        .bind(&insight.description)
        .bind(insight.confidence)
        .bind(insight.priority.to_string())
        .bind(insight.metadata.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Filtered insight listing, most recent first.
    pub async fn list_insights(
        &self,
        filter: &InsightFilter,
    ) -> Result<Vec<Insight>, LearningError> {
        let mut sql = String::from(
            "SELECT id, timestamp, category, title, description, confidence, priority, metadata \
             FROM insights WHERE 1=1",
        );
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.priority.is_some() {
            sql.push_str(" AND priority = ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(category) = filter.category {
            query = query.bind(category.to_string());
        }
        if let Some(priority) = filter.priority {
            query = query.bind(priority.to_string());
        }
        query = query.bind(i64::from(filter.limit.unwrap_or(DEFAULT_INSIGHT_LIMIT)));

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(map_insight).collect())
    }

    // -----------------------------------------------------------------------
    // Recommendations
    // -----------------------------------------------------------------------

    /// Persist one recommendation (not yet implemented) and return its id.
    pub async fn insert_recommendation(
        &self,
        draft: &RecommendationDraft,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, LearningError> {
        let result = sqlx::query(
            "INSERT INTO recommendations \
             (timestamp, topic, recommendation, reasoning, confidence, impact, implemented) \
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(format_timestamp(timestamp))
        .bind(&draft.topic)
        .bind(&draft.recommendation)
        .bind(&draft.reasoning)
        .bind(draft.confidence)
        .bind(draft.impact.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Flip the implemented flag on a recommendation.
    ///
    /// Returns the number of rows affected; a missing id is a zero-rows
    /// no-op.
    pub async fn set_recommendation_implemented(
        &self,
        id: i64,
        implemented: bool,
    ) -> Result<u64, LearningError> {
        let result = sqlx::query("UPDATE recommendations SET implemented = ? WHERE id = ?")
            .bind(implemented)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Filtered recommendation listing, ordered by confidence then recency.
    pub async fn list_recommendations(
        &self,
        filter: &RecommendationFilter,
    ) -> Result<Vec<Recommendation>, LearningError> {
        let mut sql = String::from(
            "SELECT id, timestamp, topic, recommendation, reasoning, confidence, impact, implemented \
             FROM recommendations WHERE 1=1",
        );
        if filter.topic.is_some() {
            sql.push_str(" AND topic = ?");
        }
        if filter.impact.is_some() {
            sql.push_str(" AND impact = ?");
        }
        if filter.only_not_implemented {
            sql.push_str(" AND implemented = 0");
        }
        sql.push_str(" ORDER BY confidence DESC, timestamp DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(topic) = &filter.topic {
            query = query.bind(topic.as_str());
        }
        if let Some(impact) = filter.impact {
            query = query.bind(impact.to_string());
        }
        query = query.bind(i64::from(filter.limit.unwrap_or(DEFAULT_RECOMMENDATION_LIMIT)));

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| Recommendation {
                id: row.get("id"),
                timestamp: parse_timestamp_lossy(row.get("timestamp")),
                topic: row.get("topic"),
                recommendation: row.get("recommendation"),
                reasoning: row.get("reasoning"),
                confidence: row.get("confidence"),
                impact: Impact::from_str_lossy(row.get("impact")),
                implemented: row.get("implemented"),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Engine state
    // -----------------------------------------------------------------------

    /// Write a key-value pair to the learning_state table (upsert).
    pub async fn set_state(&self, key: &str, value: impl Into<String>) -> Result<(), LearningError> {
        let value = value.into();
        sqlx::query(
            "INSERT INTO learning_state (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read a value from the learning_state table.
    pub async fn get_state(&self, key: &str) -> Result<Option<String>, LearningError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM learning_state WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }
}

impl std::fmt::Debug for LearningStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn map_interaction(row: &sqlx::sqlite::SqliteRow) -> Interaction {
    let tools_used = row
        .get::<Option<String>, _>("tools_used")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();
    let context = row
        .get::<Option<String>, _>("context")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();

    Interaction {
        id: row.get("id"),
        timestamp: parse_timestamp_lossy(row.get("timestamp")),
        user_query: row.get("user_query"),
        agent_response: row.get("agent_response"),
        tools_used,
        feedback_score: row.get("feedback_score"),
        feedback_text: row.get("feedback_text"),
        context,
        response_time_ms: row.get::<Option<f64>, _>("response_time_ms").unwrap_or(0.0),
        tokens_used: row.get::<Option<i64>, _>("tokens_used").unwrap_or(0),
    }
}

fn map_insight(row: &sqlx::sqlite::SqliteRow) -> Insight {
    let metadata = row
        .get::<Option<String>, _>("metadata")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(serde_json::Value::Null);

    Insight {
        id: row.get("id"),
        timestamp: parse_timestamp_lossy(row.get("timestamp")),
        category: InsightCategory::from_str_lossy(row.get("category")),
        title: row.get("title"),
        description: row.get("description"),
        confidence: row.get("confidence"),
        priority: Priority::from_str_lossy(row.get("priority")),
        metadata,
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Embedded schema for learning.db.
///
/// All tables use `IF NOT EXISTS` so re-running is safe. Timestamps are
/// RFC 3339 text in UTC with fixed sub-second width, so the range scans on
/// `timestamp` compare correctly as text.
const SCHEMA_V1: &str = r#"
-- Interactions (one row per agent turn, append-only; feedback is the only mutation)
CREATE TABLE IF NOT EXISTS interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    user_query TEXT NOT NULL,
    agent_response TEXT NOT NULL,
    tools_used TEXT,
    feedback_score REAL,
    feedback_text TEXT,
    context TEXT,
    response_time_ms REAL,
    tokens_used INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_interactions_timestamp ON interactions(timestamp);
CREATE INDEX IF NOT EXISTS idx_interactions_feedback ON interactions(feedback_score);

-- Synthesized insights (immutable once written)
CREATE TABLE IF NOT EXISTS insights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    confidence REAL NOT NULL,
    priority TEXT NOT NULL,
    metadata TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_insights_category ON insights(category);

-- Recommendations (implemented flag is the only mutable field)
CREATE TABLE IF NOT EXISTS recommendations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    topic TEXT NOT NULL,
    recommendation TEXT NOT NULL,
    reasoning TEXT NOT NULL,
    confidence REAL NOT NULL,
    impact TEXT NOT NULL,
    implemented BOOLEAN DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Confidence/frequency aggregates, one row per classification category
CREATE TABLE IF NOT EXISTS learned_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern_type TEXT NOT NULL UNIQUE,
    pattern_data TEXT NOT NULL,
    frequency INTEGER DEFAULT 1,
    last_seen TEXT NOT NULL,
    confidence REAL DEFAULT 0.5,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Engine state (KV for the generation cursor)
CREATE TABLE IF NOT EXISTS learning_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
