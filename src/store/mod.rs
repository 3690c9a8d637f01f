//! Measurement Store - the engine's read/write collaborator boundary
//!
//! The rule engine consumes one read contract: ordered historical windows
//! per (test, level) pair, most-recent-first, with blacklisted test names
//! excluded before results are returned. Two implementations ship here:
//!
//! - [`MemoryStore`]: in-memory, for tests and ephemeral replay runs
//! - [`SledStore`]: sled-backed reference implementation (see `sled_store`)

mod sled_store;

pub use sled_store::{SledStore, DEFAULT_DB_PATH};

use crate::types::Measurement;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Read/write contract the validator and pipeline depend on.
///
/// Both finders return measurements most-recent-first and must exclude
/// blacklisted test names before returning; the blacklist is injected at
/// store construction, not consulted globally.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Most recent `n` measurements for a (test, level) pair, newest first.
    async fn find_last_n(
        &self,
        test_name: &str,
        control_level: &str,
        n: usize,
    ) -> Result<Vec<Measurement>, StoreError>;

    /// Most recent measurement for a (test, level) pair, as a singleton
    /// sequence (empty when no history exists).
    async fn find_last(
        &self,
        test_name: &str,
        control_level: &str,
    ) -> Result<Vec<Measurement>, StoreError>;

    /// Bulk-insert newly ingested measurements.
    async fn insert_batch(&self, measurements: Vec<Measurement>) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory measurement store keyed by `"{TEST}-{level}"`.
///
/// Measurements are kept in insertion order per pair and returned newest
/// first by timestamp. Used by unit/integration tests and by replay runs
/// that do not need durability.
pub struct MemoryStore {
    series: RwLock<HashMap<String, Vec<Measurement>>>,
    excluded_tests: HashSet<String>,
}

impl MemoryStore {
    /// Create an empty store with the given excluded-test blacklist.
    /// Test names in the blacklist are normalized to upper case to match
    /// measurement normalization.
    pub fn new(excluded_tests: HashSet<String>) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            excluded_tests: excluded_tests
                .into_iter()
                .map(|t| t.to_uppercase())
                .collect(),
        }
    }

    fn pair_key(test_name: &str, control_level: &str) -> String {
        format!("{}-{}", test_name.to_uppercase(), control_level)
    }

    fn is_excluded(&self, test_name: &str) -> bool {
        self.excluded_tests.contains(&test_name.to_uppercase())
    }

    /// Total stored measurement count, across all pairs.
    pub async fn count(&self) -> usize {
        self.series.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn find_last_n(
        &self,
        test_name: &str,
        control_level: &str,
        n: usize,
    ) -> Result<Vec<Measurement>, StoreError> {
        if self.is_excluded(test_name) {
            return Ok(Vec::new());
        }
        let series = self.series.read().await;
        let Some(entries) = series.get(&Self::pair_key(test_name, control_level)) else {
            return Ok(Vec::new());
        };
        let mut sorted: Vec<Measurement> = entries.clone();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sorted.truncate(n);
        Ok(sorted)
    }

    async fn find_last(
        &self,
        test_name: &str,
        control_level: &str,
    ) -> Result<Vec<Measurement>, StoreError> {
        self.find_last_n(test_name, control_level, 1).await
    }

    async fn insert_batch(&self, measurements: Vec<Measurement>) -> Result<(), StoreError> {
        let mut series = self.series.write().await;
        for m in measurements {
            let key = Self::pair_key(&m.test_name, &m.control_level);
            series.entry(key).or_default().push(m);
        }
        Ok(())
    }
}
