//! Sled-backed measurement store
//!
//! Persists measurements per (test, level) pair in a dedicated sled tree,
//! keyed by big-endian timestamp bytes so iteration order is chronological
//! and reverse iteration yields most-recent-first windows.

use super::{MeasurementStore, StoreError};
use crate::types::Measurement;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Default database path used when no storage path is configured.
pub const DEFAULT_DB_PATH: &str = "data/measurements.db";

/// Durable measurement store.
///
/// Key layout: `[timestamp_millis BE (8 bytes)][sequence BE (8 bytes)]`.
/// The sled-generated sequence suffix keeps two readings taken in the same
/// millisecond from overwriting each other while preserving time ordering.
///
/// Note: writes are not flushed individually. Sled provides durability via
/// background flushing; on crash at most the last few writes may be lost,
/// which the QC workflow tolerates since runs are re-ingested.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    excluded_tests: HashSet<String>,
}

impl SledStore {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(
        path: P,
        excluded_tests: HashSet<String>,
    ) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            db: Arc::new(db),
            excluded_tests: excluded_tests
                .into_iter()
                .map(|t| t.to_uppercase())
                .collect(),
        })
    }

    /// Open with the default path.
    pub fn open_default(excluded_tests: HashSet<String>) -> Result<Self, StoreError> {
        Self::open(DEFAULT_DB_PATH, excluded_tests)
    }

    fn tree_name(test_name: &str, control_level: &str) -> String {
        format!("{}-{}", test_name.to_uppercase(), control_level)
    }

    fn is_excluded(&self, test_name: &str) -> bool {
        self.excluded_tests.contains(&test_name.to_uppercase())
    }

    fn key_for(&self, measurement: &Measurement) -> Result<[u8; 16], StoreError> {
        let ts = measurement.timestamp.timestamp_millis().max(0) as u64;
        let seq = self.db.generate_id()?;
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&ts.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        Ok(key)
    }

    fn read_window(
        &self,
        test_name: &str,
        control_level: &str,
        n: usize,
    ) -> Result<Vec<Measurement>, StoreError> {
        if self.is_excluded(test_name) {
            debug!(test = %test_name, "Excluded test, returning empty window");
            return Ok(Vec::new());
        }

        let tree = self.db.open_tree(Self::tree_name(test_name, control_level))?;
        let mut window = Vec::with_capacity(n);
        for item in tree.iter().rev() {
            if window.len() >= n {
                break;
            }
            let (_key, value) = item?;
            window.push(serde_json::from_slice::<Measurement>(&value)?);
        }
        Ok(window)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Total stored measurement count, across all pairs.
    pub fn count(&self) -> usize {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| self.db.open_tree(name).ok())
            .map(|tree| tree.len())
            .sum()
    }
}

#[async_trait]
impl MeasurementStore for SledStore {
    async fn find_last_n(
        &self,
        test_name: &str,
        control_level: &str,
        n: usize,
    ) -> Result<Vec<Measurement>, StoreError> {
        self.read_window(test_name, control_level, n)
    }

    async fn find_last(
        &self,
        test_name: &str,
        control_level: &str,
    ) -> Result<Vec<Measurement>, StoreError> {
        self.read_window(test_name, control_level, 1)
    }

    async fn insert_batch(&self, measurements: Vec<Measurement>) -> Result<(), StoreError> {
        for m in measurements {
            let tree = self.db.open_tree(Self::tree_name(&m.test_name, &m.control_level))?;
            let key = self.key_for(&m)?;
            tree.insert(key, serde_json::to_vec(&m)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn measurement_at(minutes_ago: i64, value: f64) -> Measurement {
        Measurement::new(
            "GLUCOSE",
            "normal",
            Utc::now() - Duration::minutes(minutes_ago),
            value,
            100.0,
            2.0,
            "mg/dL",
        )
    }

    #[tokio::test]
    async fn test_open_and_insert() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("qc.db"), HashSet::new()).unwrap();

        store
            .insert_batch(vec![measurement_at(2, 99.0), measurement_at(1, 101.0)])
            .await
            .unwrap();
        assert_eq!(store.count(), 2);
    }

    #[tokio::test]
    async fn test_window_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("qc.db"), HashSet::new()).unwrap();

        store
            .insert_batch(vec![
                measurement_at(30, 97.0),
                measurement_at(20, 98.0),
                measurement_at(10, 99.0),
            ])
            .await
            .unwrap();

        let window = store.find_last_n("GLUCOSE", "normal", 2).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].value, 99.0);
        assert_eq!(window[1].value, 98.0);

        let last = store.find_last("GLUCOSE", "normal").await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].value, 99.0);
    }

    #[tokio::test]
    async fn test_same_millisecond_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("qc.db"), HashSet::new()).unwrap();

        let ts = Utc::now();
        let a = Measurement::new("NA", "low", ts, 135.0, 138.0, 1.5, "mmol/L");
        let b = Measurement::new("NA", "low", ts, 136.0, 138.0, 1.5, "mmol/L");
        store.insert_batch(vec![a, b]).await.unwrap();

        let window = store.find_last_n("NA", "low", 10).await.unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_blacklist_filters_reads() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(
            dir.path().join("qc.db"),
            HashSet::from(["GLUCOSE".to_string()]),
        )
        .unwrap();

        store.insert_batch(vec![measurement_at(1, 100.0)]).await.unwrap();
        let window = store.find_last_n("GLUCOSE", "normal", 10).await.unwrap();
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn test_pairs_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("qc.db"), HashSet::new()).unwrap();

        let low = Measurement::new("GLUCOSE", "low", Utc::now(), 70.0, 70.0, 1.0, "mg/dL");
        store
            .insert_batch(vec![measurement_at(1, 100.0), low])
            .await
            .unwrap();

        let normal = store.find_last_n("GLUCOSE", "normal", 10).await.unwrap();
        assert_eq!(normal.len(), 1);
        assert_eq!(normal[0].value, 100.0);

        let low = store.find_last_n("GLUCOSE", "low", 10).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].value, 70.0);
    }
}
