//! Rule Engine Integration Tests
//!
//! Exercises the full ingestion pipeline end to end: write-time sigma
//! classification, storage, multi-rule validation over rolling history,
//! and notification dispatch. Uses the in-memory store and a recording
//! notifier so every scenario is deterministic.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use labsentry::notify::{Notifier, NotifyError};
use labsentry::pipeline::IngestPipeline;
use labsentry::statistics;
use labsentry::store::{MeasurementStore, MemoryStore};
use labsentry::types::{Measurement, RuleLabel};
use labsentry::QcConfig;

const MEAN: f64 = 100.0;
const SD: f64 = 2.0;

// ============================================================================
// Test Notifier
// ============================================================================

struct RecordingNotifier {
    deliveries: Mutex<Vec<(String, Vec<Measurement>)>>,
}

impl RecordingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
        })
    }

    async fn delivery_count(&self) -> usize {
        self.deliveries.lock().await.len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, report: &str, offending: &[Measurement]) -> Result<(), NotifyError> {
        self.deliveries
            .lock()
            .await
            .push((report.to_string(), offending.to_vec()));
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn glucose_at(minutes_ago: i64, value: f64) -> Measurement {
    Measurement::new(
        "GLUCOSE",
        "normal",
        Utc::now() - Duration::minutes(minutes_ago),
        value,
        MEAN,
        SD,
        "mg/dL",
    )
}

fn pipeline_with(
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
) -> IngestPipeline {
    IngestPipeline::new(store, notifier, &QcConfig::default())
}

/// Ingest values oldest-first as one batch, so the first element of the
/// slice ends up oldest in history and the last element most recent.
async fn ingest_series(
    pipeline: &IngestPipeline,
    values: &[f64],
) -> Vec<Measurement> {
    let total = values.len() as i64;
    let batch: Vec<Measurement> = values
        .iter()
        .enumerate()
        .map(|(i, v)| glucose_at(total - i as i64, *v))
        .collect();
    pipeline.ingest(batch).await.expect("ingest failed")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn in_control_run_produces_no_violations() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let notifier = RecordingNotifier::new();
    let pipeline = pipeline_with(store, notifier.clone());

    let stored = ingest_series(&pipeline, &[101.0, 99.0, 100.5, 101.5, 99.5]).await;
    let report = pipeline.validate_and_notify(&stored).await;

    assert!(report.is_empty());
    assert_eq!(notifier.delivery_count().await, 0);
    // Every in-control value was still classified at write time
    assert!(stored.iter().all(|m| m.rule.is_some()));
}

#[tokio::test]
async fn write_time_classification_is_stored() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = pipeline_with(store.clone(), RecordingNotifier::new());

    ingest_series(&pipeline, &[100.0, MEAN + SD, MEAN - 2.0 * SD, MEAN + 3.5 * SD]).await;

    let window = store.find_last_n("GLUCOSE", "normal", 10).await.unwrap();
    let rules: Vec<Option<RuleLabel>> = window.iter().map(|m| m.rule).collect();
    // Newest first: +3s outlier, then -2s, then +1s boundary, then clean
    assert_eq!(
        rules,
        vec![
            Some(RuleLabel::Plus3s),
            Some(RuleLabel::Minus2s),
            Some(RuleLabel::Plus1s),
            Some(RuleLabel::NoViolation),
        ]
    );
}

#[tokio::test]
async fn gross_outlier_triggers_one_three_s_notification() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let notifier = RecordingNotifier::new();
    let pipeline = pipeline_with(store, notifier.clone());

    // Most recent reading is 3.5 SD out
    let stored = ingest_series(&pipeline, &[MEAN, MEAN + SD, MEAN + 3.5 * SD]).await;
    let report = pipeline.validate_and_notify(&stored).await;

    let one_three: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.rule == RuleLabel::OneThreeS)
        .collect();
    assert_eq!(one_three.len(), 1);

    // Give the dispatched notification task a chance to land
    tokio::task::yield_now().await;
    for _ in 0..50 {
        if notifier.delivery_count().await > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let deliveries = notifier.deliveries.lock().await;
    assert!(!deliveries.is_empty());
    let (text, offending) = &deliveries[0];
    assert!(text.contains("1-3s"));
    assert!(offending.iter().all(|m| m.test_name == "GLUCOSE"));
}

#[tokio::test]
async fn sustained_shift_triggers_four_one_s() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = pipeline_with(store, RecordingNotifier::new());

    // Four consecutive readings above mean + 1 SD, most recent first in
    // the fetched window
    let stored = ingest_series(&pipeline, &[99.0, 103.0, 103.0, 103.0, 103.0]).await;
    let report = pipeline.validate_and_notify(&stored).await;

    assert!(report
        .violations
        .iter()
        .any(|v| v.rule == RuleLabel::FourOneS));
    assert!(!report
        .violations
        .iter()
        .any(|v| v.rule == RuleLabel::OneThreeS));
}

#[tokio::test]
async fn persistent_shift_triggers_ten_x() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = pipeline_with(store, RecordingNotifier::new());

    let stored = ingest_series(&pipeline, &[103.0; 10]).await;
    let report = pipeline.validate_and_notify(&stored).await;

    assert!(report.violations.iter().any(|v| v.rule == RuleLabel::TenX));
    // The same run also satisfies 4-1s; both fire independently for the pair
    assert!(report
        .violations
        .iter()
        .any(|v| v.rule == RuleLabel::FourOneS));
    // ... but each rule at most once
    assert_eq!(report.len(), 2);
}

#[tokio::test]
async fn duplicate_pairs_in_batch_report_once() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = pipeline_with(store, RecordingNotifier::new());

    // Two batches of the same shifted pair: history accumulates, then a
    // batch with duplicate (test, level) entries is validated once
    ingest_series(&pipeline, &[103.0, 103.0, 103.0]).await;
    let stored = ingest_series(&pipeline, &[103.0, 103.0]).await;
    let report = pipeline.validate_and_notify(&stored).await;

    let four_one: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.rule == RuleLabel::FourOneS)
        .collect();
    assert_eq!(four_one.len(), 1);
}

#[tokio::test]
async fn independent_pairs_evaluated_separately() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = pipeline_with(store, RecordingNotifier::new());

    let now = Utc::now();
    let mut batch = Vec::new();
    // Glucose-normal: shifted high. Sodium-low: in control.
    for i in 0..5u32 {
        batch.push(Measurement::new(
            "GLUCOSE",
            "normal",
            now - Duration::minutes(i64::from(5 - i)),
            103.0,
            MEAN,
            SD,
            "mg/dL",
        ));
        batch.push(Measurement::new(
            "SODIUM",
            "low",
            now - Duration::minutes(i64::from(5 - i)),
            138.2,
            138.0,
            1.5,
            "mmol/L",
        ));
    }
    let stored = pipeline.ingest(batch).await.unwrap();
    let report = pipeline.validate_and_notify(&stored).await;

    assert!(report.concerns_pair("GLUCOSE", "normal"));
    assert!(!report.concerns_pair("SODIUM", "low"));
}

#[tokio::test]
async fn excluded_test_is_never_evaluated() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let notifier = RecordingNotifier::new();
    let config: QcConfig = toml::from_str(
        r#"
        [rules]
        excluded_tests = ["glucose"]
        "#,
    )
    .unwrap();
    let pipeline = IngestPipeline::new(store, notifier.clone(), &config);

    let stored = ingest_series(&pipeline, &[MEAN + 3.5 * SD]).await;
    let report = pipeline.validate_and_notify(&stored).await;

    assert!(report.is_empty());
    assert_eq!(notifier.delivery_count().await, 0);
}

#[tokio::test]
async fn failing_notifier_leaves_ingestion_intact() {
    struct BrokenNotifier;

    #[async_trait]
    impl Notifier for BrokenNotifier {
        async fn notify(&self, _: &str, _: &[Measurement]) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("mail relay down".to_string()))
        }
    }

    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = IngestPipeline::new(
        store.clone(),
        Arc::new(BrokenNotifier),
        &QcConfig::default(),
    );

    let stored = ingest_series(&pipeline, &[MEAN, MEAN + 3.5 * SD]).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(store.count().await, 2);

    // Violations are still computed; the delivery failure is swallowed
    let report = pipeline.validate_and_notify(&stored).await;
    assert!(!report.is_empty());
}

// ============================================================================
// Error Statistics over stored history
// ============================================================================

#[tokio::test]
async fn error_statistics_from_stored_window() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = pipeline_with(store.clone(), RecordingNotifier::new());

    ingest_series(&pipeline, &[98.0, 100.0, 102.0, 104.0]).await;

    let window = store.find_last_n("GLUCOSE", "normal", 10).await.unwrap();
    let values: Vec<f64> = window.iter().map(|m| m.value).collect();
    let stats = statistics::error_statistics(&values, "GLUCOSE", "normal", MEAN).unwrap();

    assert_eq!(stats.sample_count, 4);
    assert!((stats.calculated_mean - 101.0).abs() < 1e-9);
    // Mean is 1% above reference
    assert!((stats.systematic_error_pct - 1.0).abs() < 1e-9);
    assert!(stats.random_error_pct > 0.0);
    assert!(
        (stats.total_error_pct - (stats.random_error_pct + stats.systematic_error_pct)).abs()
            < 1e-9
    );
}

#[tokio::test]
async fn comparative_statistics_across_periods() {
    let store = Arc::new(MemoryStore::new(HashSet::new()));
    let pipeline = pipeline_with(store.clone(), RecordingNotifier::new());

    // Noisy early period, tight late period
    ingest_series(&pipeline, &[95.0, 105.0, 93.0, 107.0, 99.5, 100.5, 99.8, 100.2]).await;

    let window = store.find_last_n("GLUCOSE", "normal", 10).await.unwrap();
    let values: Vec<f64> = window.iter().map(|m| m.value).collect();
    // Window is newest first: first half is the tight period
    let (late, early) = values.split_at(4);

    let comparison = statistics::comparative_error_statistics(
        early,
        late,
        "GLUCOSE",
        "normal",
        ("month-1", "month-2"),
    )
    .unwrap();

    assert!(comparison.improvement_delta > 0.0, "precision improved");
    assert_eq!(comparison.period1_label, "month-1");
}
