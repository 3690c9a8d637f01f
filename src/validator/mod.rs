//! Multi-Rule Validator - windowed Westgard rule evaluation
//!
//! Re-examines newly ingested measurement batches against historical
//! context from the measurement store, detecting the error patterns the
//! write-time classifier cannot see on its own:
//!
//! - **1-3s**: a control value outside ±3 SD (random error, reject run)
//! - **4-1s**: 4 consecutive same-side values beyond ±1 SD within the
//!   first 5 window positions (systematic error)
//! - **10x**: 10 consecutive same-side values beyond ±1 SD across the
//!   whole window (systematic error)
//!
//! Each distinct (test, level) pair in the input is evaluated exactly once
//! per call; a pair contributes at most one report entry per rule type.
//! Evaluation is read-only: building the report mutates nothing in the
//! store.

use crate::store::{MeasurementStore, StoreError};
use crate::types::{Measurement, RuleLabel, Violation, ViolationReport};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Historical window size fetched per pair.
const HISTORY_WINDOW: usize = 10;

/// The 4-1s rule scans only the first 5 window positions (indices 0..=4),
/// not the full 10-element window.
const FOUR_ONE_S_SCAN: usize = 5;

/// Consecutive same-side exceedances required by the 4-1s rule.
const FOUR_ONE_S_RUN: usize = 4;

/// Consecutive same-side exceedances required by the 10x rule.
const TEN_X_RUN: usize = 10;

/// Westgard multi-rule validator over a measurement store.
///
/// The excluded-test blacklist is injected at construction; there is no
/// shared static configuration. The two store reads per pair (last-10 and
/// last-1) are not taken inside a single snapshot, so concurrent writes
/// between them can produce mutually inconsistent windows; this is an
/// accepted eventual-consistency risk of the read contract.
pub struct MultiRuleValidator {
    store: Arc<dyn MeasurementStore>,
    excluded_tests: HashSet<String>,
}

impl MultiRuleValidator {
    pub fn new(store: Arc<dyn MeasurementStore>, excluded_tests: HashSet<String>) -> Self {
        Self {
            store,
            excluded_tests: excluded_tests
                .into_iter()
                .map(|t| t.to_uppercase())
                .collect(),
        }
    }

    /// Evaluate a batch of newly ingested measurements.
    ///
    /// An empty batch returns an empty report without touching the store.
    /// Pairs are processed in input first-occurrence order; duplicate pairs
    /// later in the batch are skipped entirely. A store failure or empty
    /// history for one pair is logged and skipped so it cannot abort
    /// evaluation of the rest of the batch.
    pub async fn validate(&self, new_measurements: &[Measurement]) -> ViolationReport {
        let mut report = ViolationReport::empty();
        if new_measurements.is_empty() {
            return report;
        }

        let mut seen_pairs: HashSet<String> = HashSet::new();
        for m in new_measurements {
            if !seen_pairs.insert(m.pair_key()) {
                continue;
            }
            if self.excluded_tests.contains(&m.test_name) {
                debug!(test = %m.test_name, "Excluded test, skipping rule evaluation");
                continue;
            }
            if let Err(e) = self
                .evaluate_pair(&m.test_name, &m.control_level, &mut report)
                .await
            {
                warn!(
                    test = %m.test_name,
                    level = %m.control_level,
                    error = %e,
                    "Store failure during rule evaluation, skipping pair"
                );
            }
        }

        report
    }

    /// Run all three rules for one (test, level) pair, appending any
    /// triggered entries to the report in 1-3s, 4-1s, 10x order.
    async fn evaluate_pair(
        &self,
        test_name: &str,
        control_level: &str,
        report: &mut ViolationReport,
    ) -> Result<(), StoreError> {
        let window = self
            .store
            .find_last_n(test_name, control_level, HISTORY_WINDOW)
            .await?;

        // An empty history window means there is nothing to judge against;
        // skip the pair rather than index into nothing.
        let Some(reference) = window.first() else {
            warn!(
                test = %test_name,
                level = %control_level,
                "Empty history window, skipping pair"
            );
            return Ok(());
        };
        let reference_mean = reference.target_mean;
        let reference_sd = reference.target_std_dev;
        let window_values: Vec<f64> = window.iter().map(|m| m.value).collect();

        let last = self.store.find_last(test_name, control_level).await?;

        // Rule 1-3s: judged on the most recent record alone, against that
        // record's own target statistics.
        if let Some(last_record) = last.first() {
            if outside_three_sd(
                &[last_record.value],
                last_record.target_mean,
                last_record.target_std_dev,
            ) {
                report.push(Violation {
                    rule: RuleLabel::OneThreeS,
                    test_name: test_name.to_string(),
                    control_level: control_level.to_string(),
                    explanation:
                        "Random error: a control value exceeded 3 standard deviations from the target mean"
                            .to_string(),
                    corrective_guidance:
                        "Reject the analytical run; repeat after inspecting the instrument"
                            .to_string(),
                });
            }
        }

        // Rule 4-1s: fixed 5-element scan at the head of the window.
        let scan = &window_values[..window_values.len().min(FOUR_ONE_S_SCAN)];
        if has_consecutive_run(scan, reference_mean, reference_sd, FOUR_ONE_S_RUN) {
            report.push(Violation {
                rule: RuleLabel::FourOneS,
                test_name: test_name.to_string(),
                control_level: control_level.to_string(),
                explanation:
                    "Systematic error: 4 consecutive control values beyond 1 standard deviation on the same side"
                        .to_string(),
                corrective_guidance:
                    "Check instrument calibration, reagent lot and environmental conditions"
                        .to_string(),
            });
        }

        // Rule 10x: the entire window.
        if has_consecutive_run(&window_values, reference_mean, reference_sd, TEN_X_RUN) {
            report.push(Violation {
                rule: RuleLabel::TenX,
                test_name: test_name.to_string(),
                control_level: control_level.to_string(),
                explanation:
                    "Systematic error: 10 consecutive control values beyond 1 standard deviation on the same side"
                        .to_string(),
                corrective_guidance:
                    "Recalibrate the instrument and investigate for persistent bias".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Rule Primitives
// ============================================================================

/// True if any value lies strictly outside `mean ± 3·sd`.
fn outside_three_sd(values: &[f64], mean: f64, sd: f64) -> bool {
    let upper = mean + 3.0 * sd;
    let lower = mean - 3.0 * sd;
    values.iter().any(|v| *v > upper || *v < lower)
}

/// True if `values` contains `needed` consecutive entries all strictly
/// above `mean + sd`, or all strictly below `mean - sd`. Any in-band value
/// resets both running counters.
fn has_consecutive_run(values: &[f64], mean: f64, sd: f64, needed: usize) -> bool {
    let upper = mean + sd;
    let lower = mean - sd;
    let mut above = 0usize;
    let mut below = 0usize;

    for v in values {
        if *v > upper {
            above += 1;
            below = 0;
        } else if *v < lower {
            below += 1;
            above = 0;
        } else {
            above = 0;
            below = 0;
        }
        if above >= needed || below >= needed {
            return true;
        }
    }
    false
}
