//! Continuous feedback-learning engine.
//!
//! Records every agent interaction into a dedicated `learning.db`, folds
//! human feedback into confidence-weighted learned patterns, and
//! periodically synthesizes insights and recommendations from the
//! accumulated history. Generation is volume-triggered: analyzers run after
//! every N logged interactions rather than on a wall-clock schedule.

mod analyzers;
mod classifier;
mod config;
mod engine;
mod stats;
mod store;
mod types;

pub use classifier::classify;
pub use config::LearningConfig;
pub use engine::LearningEngine;
pub use stats::{LearningStatistics, ToolUsage};
pub use store::LearningStore;
pub use types::*;

use thiserror::Error;

/// Learning engine errors.
#[derive(Debug, Error)]
pub enum LearningError {
    /// Feedback score outside [0, 1] — rejected before any write.
    #[error("feedback score {0} is outside [0.0, 1.0]")]
    InvalidScore(f64),

    /// Operation referenced an interaction or recommendation id that does
    /// not exist. No partial effect has been applied.
    #[error("row {0} not found")]
    NotFound(i64),

    #[error("learning database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
