//! Shared data structures for the QC statistical rule engine
//!
//! This module defines the core types of the measurement pipeline:
//! - Measurement: a single QC reading of a control material
//! - RuleLabel: the fixed Westgard rule vocabulary
//! - Violation / ViolationReport: multi-rule evaluation output
//! - ErrorStatistics / ComparativeErrorStatistics: derived error metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Rule Vocabulary
// ============================================================================

/// Westgard rule labels assigned to measurements and violations.
///
/// Single-point sigma bands (`+1s` .. `-3s`) are assigned at write time by
/// the classifier; the multi-point labels (`1-3s`, `4-1s`, `10x`) only appear
/// in violation reports produced by the multi-rule validator. These are
/// result tags recomputed fresh on every evaluation, never stored state
/// machines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RuleLabel {
    /// Value within ±1 standard deviation of the target mean
    #[serde(rename = "no_violation")]
    NoViolation,
    /// Value at or above target mean + 1 SD
    #[serde(rename = "+1s")]
    Plus1s,
    /// Value at or below target mean - 1 SD
    #[serde(rename = "-1s")]
    Minus1s,
    /// Value at or above target mean + 2 SD
    #[serde(rename = "+2s")]
    Plus2s,
    /// Value at or below target mean - 2 SD
    #[serde(rename = "-2s")]
    Minus2s,
    /// Value at or above target mean + 3 SD
    #[serde(rename = "+3s")]
    Plus3s,
    /// Value at or below target mean - 3 SD
    #[serde(rename = "-3s")]
    Minus3s,
    /// Multi-rule: one value outside ±3 SD in the evaluation window
    #[serde(rename = "1-3s")]
    OneThreeS,
    /// Multi-rule: 4 consecutive values beyond ±1 SD on the same side
    #[serde(rename = "4-1s")]
    FourOneS,
    /// Multi-rule: 10 consecutive values beyond ±1 SD on the same side
    #[serde(rename = "10x")]
    TenX,
}

impl RuleLabel {
    /// Canonical string form, matching the serialized representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleLabel::NoViolation => "no_violation",
            RuleLabel::Plus1s => "+1s",
            RuleLabel::Minus1s => "-1s",
            RuleLabel::Plus2s => "+2s",
            RuleLabel::Minus2s => "-2s",
            RuleLabel::Plus3s => "+3s",
            RuleLabel::Minus3s => "-3s",
            RuleLabel::OneThreeS => "1-3s",
            RuleLabel::FourOneS => "4-1s",
            RuleLabel::TenX => "10x",
        }
    }

    /// Whether this label comes from single-point classification
    /// (as opposed to windowed multi-rule evaluation).
    pub fn is_single_point(&self) -> bool {
        !matches!(
            self,
            RuleLabel::OneThreeS | RuleLabel::FourOneS | RuleLabel::TenX
        )
    }
}

impl std::fmt::Display for RuleLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Measurement
// ============================================================================

/// A single QC measurement: one reading of a control material on an
/// analytic instrument, together with the target statistics it is judged
/// against.
///
/// Immutable value object. The engine only reads measurements and returns
/// new derived values; `rule`/`description` start out as `None` and are
/// filled by the write-time classifier via [`Measurement::classified`],
/// which consumes and returns the value rather than mutating in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    /// Test (analyte) name, normalized to upper case at construction
    pub test_name: String,
    /// Control material concentration tier (e.g. "low", "normal", "high")
    pub control_level: String,
    /// Control material lot number (provenance only)
    #[serde(default)]
    pub control_level_lot: String,
    /// Reagent lot number (provenance only)
    #[serde(default)]
    pub reagent_lot: String,
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Measured value
    pub value: f64,
    /// Target mean for this (test, level) pair
    pub target_mean: f64,
    /// Target standard deviation; expected > 0 wherever used as a divisor
    pub target_std_dev: f64,
    /// Measurement unit (e.g. "mg/dL")
    #[serde(default)]
    pub unit: String,
    /// Rule label assigned at write time, `None` until classified
    #[serde(default)]
    pub rule: Option<RuleLabel>,
    /// Human-readable classification description, `None` until classified
    #[serde(default)]
    pub description: Option<String>,
}

impl Measurement {
    /// Create an unclassified measurement. The test name is normalized to
    /// upper case so that lookups and dedup keys are case-insensitive.
    pub fn new(
        test_name: &str,
        control_level: &str,
        timestamp: DateTime<Utc>,
        value: f64,
        target_mean: f64,
        target_std_dev: f64,
        unit: &str,
    ) -> Self {
        Self {
            test_name: test_name.to_uppercase(),
            control_level: control_level.to_string(),
            control_level_lot: String::new(),
            reagent_lot: String::new(),
            timestamp,
            value,
            target_mean,
            target_std_dev,
            unit: unit.to_string(),
            rule: None,
            description: None,
        }
    }

    /// Attach lot provenance (builder style).
    pub fn with_lots(mut self, control_level_lot: &str, reagent_lot: &str) -> Self {
        self.control_level_lot = control_level_lot.to_string();
        self.reagent_lot = reagent_lot.to_string();
        self
    }

    /// Return a copy carrying the write-time classification result.
    pub fn classified(mut self, rule: RuleLabel, description: &str) -> Self {
        self.rule = Some(rule);
        self.description = Some(description.to_string());
        self
    }

    /// Dedup / grouping key for multi-rule evaluation: `"{test}-{level}"`.
    pub fn pair_key(&self) -> String {
        format!("{}-{}", self.test_name, self.control_level)
    }
}

// ============================================================================
// Violations
// ============================================================================

/// A single multi-rule breach for one (test, level) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    /// Which Westgard rule fired
    pub rule: RuleLabel,
    /// Test (analyte) name
    pub test_name: String,
    /// Control level the breach occurred on
    pub control_level: String,
    /// What the rule detected
    pub explanation: String,
    /// What the operator should do about it
    pub corrective_guidance: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} / {}: {} — {}",
            self.rule,
            self.test_name,
            self.control_level,
            self.explanation,
            self.corrective_guidance
        )
    }
}

/// Ordered collection of multi-rule violations, built fresh per validation
/// call and never persisted by the engine.
///
/// Ordering is deterministic: pairs appear in input first-occurrence order,
/// and rules within a pair in 1-3s, 4-1s, 10x order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationReport {
    pub violations: Vec<Violation>,
}

impl ViolationReport {
    /// Empty report (also returned for an empty input batch).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    /// Whether any violation in the report concerns the given pair.
    pub fn concerns_pair(&self, test_name: &str, control_level: &str) -> bool {
        self.violations
            .iter()
            .any(|v| v.test_name == test_name && v.control_level == control_level)
    }

    /// Render the report as notifier-ready text, one violation per line.
    pub fn summary(&self) -> String {
        if self.violations.is_empty() {
            return "All control measurements within configured rules".to_string();
        }
        let mut out = format!(
            "Westgard multi-rule violations detected ({}):\n",
            self.violations.len()
        );
        for v in &self.violations {
            out.push_str(&format!("  {v}\n"));
        }
        out
    }
}

// ============================================================================
// Error Statistics
// ============================================================================

/// Derived error metrics for one (test, level) measurement series.
///
/// Computed on demand from an in-memory series; the engine never caches
/// these (caching, if any, is a collaborator concern).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorStatistics {
    pub test_name: String,
    pub control_level: String,
    /// Target mean the series is judged against
    pub reference_mean: f64,
    /// Mean of the measured values
    pub calculated_mean: f64,
    /// Population standard deviation of the measured values
    pub calculated_std_dev: f64,
    /// Bias: deviation of the calculated mean from the reference, in percent
    pub systematic_error_pct: f64,
    /// Imprecision: 1.65 x coefficient of variation
    pub random_error_pct: f64,
    /// Sum of systematic and random error
    pub total_error_pct: f64,
    pub sample_count: usize,
}

/// Period-over-period precision comparison for one (test, level) pair.
///
/// `improvement_delta` is the first period's imprecision minus the second's;
/// positive means the second period improved precision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparativeErrorStatistics {
    pub test_name: String,
    pub control_level: String,
    pub period1_label: String,
    pub period2_label: String,
    pub improvement_delta: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_label_string_forms() {
        assert_eq!(RuleLabel::NoViolation.as_str(), "no_violation");
        assert_eq!(RuleLabel::Plus1s.as_str(), "+1s");
        assert_eq!(RuleLabel::Minus3s.as_str(), "-3s");
        assert_eq!(RuleLabel::OneThreeS.as_str(), "1-3s");
        assert_eq!(RuleLabel::FourOneS.as_str(), "4-1s");
        assert_eq!(RuleLabel::TenX.as_str(), "10x");
    }

    #[test]
    fn test_rule_label_serde_round_trip() {
        let json = serde_json::to_string(&RuleLabel::FourOneS).unwrap();
        assert_eq!(json, "\"4-1s\"");
        let back: RuleLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RuleLabel::FourOneS);
    }

    #[test]
    fn test_single_point_labels() {
        assert!(RuleLabel::Plus2s.is_single_point());
        assert!(RuleLabel::NoViolation.is_single_point());
        assert!(!RuleLabel::TenX.is_single_point());
    }

    #[test]
    fn test_measurement_normalizes_test_name() {
        let m = Measurement::new("glucose", "normal", Utc::now(), 101.0, 100.0, 2.0, "mg/dL");
        assert_eq!(m.test_name, "GLUCOSE");
        assert_eq!(m.pair_key(), "GLUCOSE-normal");
        assert!(m.rule.is_none());
    }

    #[test]
    fn test_classified_fills_rule_fields() {
        let m = Measurement::new("TSH", "low", Utc::now(), 1.0, 1.0, 0.1, "mIU/L").classified(
            RuleLabel::NoViolation,
            "Approved according to current configured rules",
        );
        assert_eq!(m.rule, Some(RuleLabel::NoViolation));
        assert!(m.description.as_deref().unwrap().starts_with("Approved"));
    }

    #[test]
    fn test_report_summary_lists_violations() {
        let mut report = ViolationReport::empty();
        assert!(report.summary().contains("within configured rules"));

        report.push(Violation {
            rule: RuleLabel::OneThreeS,
            test_name: "GLUCOSE".to_string(),
            control_level: "high".to_string(),
            explanation: "one value outside 3 SD".to_string(),
            corrective_guidance: "reject the run".to_string(),
        });
        let text = report.summary();
        assert!(text.contains("1-3s"));
        assert!(text.contains("GLUCOSE"));
        assert!(report.concerns_pair("GLUCOSE", "high"));
        assert!(!report.concerns_pair("GLUCOSE", "low"));
    }
}
