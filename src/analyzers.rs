//! Insight analyzers.
//!
//! Four independent, read-only analyzers over the interaction history. Each
//! produces candidate [`NewInsight`](crate::types::NewInsight) records and
//! persists nothing itself — the engine runs them sequentially during a
//! generation pass and is fail-open per analyzer: one failing is logged and
//! skipped without blocking the others.

pub(crate) mod anomalies;
pub(crate) mod frequent_queries;
pub(crate) mod operational;
pub(crate) mod tool_effectiveness;
