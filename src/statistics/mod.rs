//! Statistics Engine - pure numeric functions for QC error metrics
//!
//! All math here is deterministic and side-effect free: mean and population
//! standard deviation, coefficient of variation, and the systematic /
//! random / total error percentages used for method performance review.
//!
//! The functions in this module never catch internally; callers validate
//! inputs first or propagate [`StatsError`] with `?`. The low-level
//! primitives (`coefficient_of_variation`, `systematic_error_pct`) are
//! total functions whose degenerate domains are documented; the record
//! builders (`error_statistics`, `comparative_error_statistics`) surface
//! those degenerate inputs as explicit errors instead of silently
//! propagating NaN or infinity.

use crate::types::{ComparativeErrorStatistics, ErrorStatistics};
use thiserror::Error;

/// One-sided 95% z-factor used to scale imprecision into random error.
/// A fixed domain constant of the total-error model, not configurable.
pub const RANDOM_ERROR_Z_FACTOR: f64 = 1.65;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    /// A required input series has zero elements.
    #[error("Empty measurement series for {0}")]
    EmptySeries(String),

    /// A mean used as a divisor is zero, making percentage metrics undefined.
    #[error("Degenerate reference for {0}: mean is zero, error percentages undefined")]
    DegenerateReference(String),
}

// ============================================================================
// Primitives
// ============================================================================

/// Mean and population standard deviation of a series.
///
/// The denominator is N (population), not N-1: QC target ranges treat the
/// window as the full population of interest. An empty series returns
/// `(0.0, 0.0)` via the average-or-0 fallback rather than panicking or
/// dividing by zero.
pub fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Coefficient of variation in percent: `(stddev / mean) * 100`.
///
/// Undefined (NaN or infinite) when `mean == 0`. Callers must treat a
/// non-finite result as a data-quality signal, not a silent zero; the
/// record builders below reject that case with
/// [`StatsError::DegenerateReference`] before this is reached.
pub fn coefficient_of_variation(stddev: f64, mean: f64) -> f64 {
    (stddev / mean) * 100.0
}

/// Systematic error (bias) in percent of the reference mean.
pub fn systematic_error_pct(calculated_mean: f64, reference_mean: f64) -> f64 {
    ((calculated_mean - reference_mean) * 100.0) / reference_mean
}

/// Random error (imprecision) in percent: CV scaled by the one-sided
/// 95% z-factor.
pub fn random_error_pct(coefficient_of_variation: f64) -> f64 {
    RANDOM_ERROR_Z_FACTOR * coefficient_of_variation
}

/// Total analytic error: systematic plus random.
pub fn total_error_pct(random_error_pct: f64, systematic_error_pct: f64) -> f64 {
    random_error_pct + systematic_error_pct
}

// ============================================================================
// Record Builders
// ============================================================================

/// Compute the full error-statistics record for one measurement series.
///
/// Errors with [`StatsError::EmptySeries`] for a zero-length series and
/// [`StatsError::DegenerateReference`] when either the reference mean or
/// the calculated mean is zero (CV and bias are undefined there).
pub fn error_statistics(
    series: &[f64],
    test_name: &str,
    control_level: &str,
    reference_mean: f64,
) -> Result<ErrorStatistics, StatsError> {
    let pair = format!("{test_name}-{control_level}");
    if series.is_empty() {
        return Err(StatsError::EmptySeries(pair));
    }
    if reference_mean == 0.0 {
        return Err(StatsError::DegenerateReference(pair));
    }

    let (calculated_mean, calculated_std_dev) = mean_and_stddev(series);
    if calculated_mean == 0.0 {
        return Err(StatsError::DegenerateReference(pair));
    }

    let cv = coefficient_of_variation(calculated_std_dev, calculated_mean);
    let systematic = systematic_error_pct(calculated_mean, reference_mean);
    let random = random_error_pct(cv);

    Ok(ErrorStatistics {
        test_name: test_name.to_string(),
        control_level: control_level.to_string(),
        reference_mean,
        calculated_mean,
        calculated_std_dev,
        systematic_error_pct: systematic,
        random_error_pct: random,
        total_error_pct: total_error_pct(random, systematic),
        sample_count: series.len(),
    })
}

/// Compare imprecision between two measurement periods.
///
/// `improvement_delta = cv(period1) - cv(period2)`; positive means the
/// second period tightened precision. Anti-symmetric in period order up to
/// sign. Both series must be non-empty and have nonzero means.
pub fn comparative_error_statistics(
    series1: &[f64],
    series2: &[f64],
    test_name: &str,
    control_level: &str,
    period_labels: (&str, &str),
) -> Result<ComparativeErrorStatistics, StatsError> {
    let pair = format!("{test_name}-{control_level}");
    if series1.is_empty() || series2.is_empty() {
        return Err(StatsError::EmptySeries(pair));
    }

    let (mean1, std1) = mean_and_stddev(series1);
    let (mean2, std2) = mean_and_stddev(series2);
    if mean1 == 0.0 || mean2 == 0.0 {
        return Err(StatsError::DegenerateReference(pair));
    }

    let cv1 = coefficient_of_variation(std1, mean1);
    let cv2 = coefficient_of_variation(std2, mean2);

    Ok(ComparativeErrorStatistics {
        test_name: test_name.to_string(),
        control_level: control_level.to_string(),
        period1_label: period_labels.0.to_string(),
        period2_label: period_labels.1.to_string(),
        improvement_delta: cv1 - cv2,
    })
}
