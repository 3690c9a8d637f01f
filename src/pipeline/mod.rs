//! Ingestion Pipeline - write path for new QC measurements
//!
//! Control flow per batch:
//!
//! 1. Each measurement is classified synchronously against its own target
//!    statistics (sigma bands), producing the stored `rule`/`description`
//!    fields.
//! 2. The classified batch is bulk-inserted into the measurement store.
//! 3. A background task re-examines the batch against historical context
//!    with the multi-rule validator and hands any violation report to the
//!    notifier.
//!
//! Step 3 is fire-and-forget: validation and notification failures are
//! logged and swallowed here, never surfaced to the ingestion caller.

use crate::classifier;
use crate::config::QcConfig;
use crate::notify::{dispatch_notification, Notifier};
use crate::store::{MeasurementStore, StoreError};
use crate::types::{Measurement, ViolationReport};
use crate::validator::MultiRuleValidator;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Write-path pipeline: classify, persist, then validate asynchronously.
pub struct IngestPipeline {
    store: Arc<dyn MeasurementStore>,
    validator: Arc<MultiRuleValidator>,
    notifier: Arc<dyn Notifier>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        notifier: Arc<dyn Notifier>,
        config: &QcConfig,
    ) -> Self {
        let validator = Arc::new(MultiRuleValidator::new(
            store.clone(),
            config.rules.excluded_set(),
        ));
        Self {
            store,
            validator,
            notifier,
        }
    }

    /// Ingest a batch of new measurements.
    ///
    /// Returns the classified measurements as stored. The multi-rule pass
    /// runs on a spawned task and cannot fail this call; only a store
    /// insert failure propagates.
    pub async fn ingest(&self, batch: Vec<Measurement>) -> Result<Vec<Measurement>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let classified = classify_batch(batch);
        self.store.insert_batch(classified.clone()).await?;
        debug!(count = classified.len(), "Measurement batch stored");

        let validator = self.validator.clone();
        let notifier = self.notifier.clone();
        let batch_for_validation = classified.clone();
        tokio::spawn(async move {
            run_validation(&validator, notifier, batch_for_validation).await;
        });

        Ok(classified)
    }

    /// Synchronous variant of the validate-and-notify pass, for callers
    /// that need the report (replay summaries, tests).
    pub async fn validate_and_notify(&self, batch: &[Measurement]) -> ViolationReport {
        let report = self.validator.validate(batch).await;
        if !report.is_empty() {
            dispatch_report(&report, self.notifier.clone(), batch);
        }
        report
    }
}

/// Classify every measurement in a batch at write time.
fn classify_batch(batch: Vec<Measurement>) -> Vec<Measurement> {
    batch
        .into_iter()
        .map(|m| {
            let c = classifier::classify(m.value, m.target_mean, m.target_std_dev);
            m.classified(c.rule, c.description)
        })
        .collect()
}

/// The asynchronous multi-rule pass for one ingested batch.
async fn run_validation(
    validator: &MultiRuleValidator,
    notifier: Arc<dyn Notifier>,
    batch: Vec<Measurement>,
) {
    let report = validator.validate(&batch).await;
    if report.is_empty() {
        debug!("Multi-rule pass clean");
        return;
    }
    info!(
        violations = report.len(),
        "Multi-rule violations detected, dispatching notification"
    );
    dispatch_report(&report, notifier, &batch);
}

/// Hand a non-empty report to the notifier with the offending input
/// measurements: those whose (test, level) pair appears in the report.
fn dispatch_report(
    report: &ViolationReport,
    notifier: Arc<dyn Notifier>,
    batch: &[Measurement],
) -> JoinHandle<()> {
    let offending: Vec<Measurement> = batch
        .iter()
        .filter(|m| report.concerns_pair(&m.test_name, &m.control_level))
        .cloned()
        .collect();
    dispatch_notification(notifier, report.summary(), offending)
}
