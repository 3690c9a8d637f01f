//! Sigma Classifier - write-time sigma-band classification
//!
//! Classifies a single measurement value against its target mean and
//! standard deviation into one of the seven single-point bands
//! (`no_violation`, `±1s`, `±2s`, `±3s`).
//!
//! Classification is O(1) over the six band thresholds, deterministic, and
//! needs no historical context, so it runs synchronously on the write path.
//! It is a pure function returning an immutable result; there is no
//! classifier instance and no cross-call state.

use crate::types::RuleLabel;

/// Description attached to in-band measurements.
pub const NO_VIOLATION_DESCRIPTION: &str = "Approved according to current configured rules";

/// Immutable classification result: the band label and its operator-facing
/// description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub rule: RuleLabel,
    pub description: &'static str,
}

/// Band table scanned widest-first. Severity index 3 wins over 2 wins
/// over 1, so a value beyond 3 SD is never reported as a 1s/2s breach.
const BANDS: [(f64, RuleLabel, &str, RuleLabel, &str); 3] = [
    (
        3.0,
        RuleLabel::Plus3s,
        "Rejected: value at or above target mean plus 3 standard deviations",
        RuleLabel::Minus3s,
        "Rejected: value at or below target mean minus 3 standard deviations",
    ),
    (
        2.0,
        RuleLabel::Plus2s,
        "Warning: value at or above target mean plus 2 standard deviations",
        RuleLabel::Minus2s,
        "Warning: value at or below target mean minus 2 standard deviations",
    ),
    (
        1.0,
        RuleLabel::Plus1s,
        "Warning: value at or above target mean plus 1 standard deviation",
        RuleLabel::Minus1s,
        "Warning: value at or below target mean minus 1 standard deviation",
    ),
];

/// Classify one measurement value against a target mean and SD.
///
/// Bands are scanned from 3 SD down to 1 SD; within a band the upper and
/// lower limits are checked independently, so exceeding the upper limit
/// yields the `+` label and exceeding the lower limit yields the mirrored
/// `-` label of the same severity. Threshold comparisons are inclusive:
/// a value exactly at `mean + stddev` classifies as `+1s`, and the
/// symmetric lower boundary likewise.
///
/// A zero or negative `stddev` is a data-quality condition this function
/// does not guard against; the bands collapse and the value classifies
/// against degenerate limits.
pub fn classify(value: f64, mean: f64, stddev: f64) -> Classification {
    for (sigma, plus_rule, plus_desc, minus_rule, minus_desc) in BANDS {
        if value >= mean + sigma * stddev {
            return Classification {
                rule: plus_rule,
                description: plus_desc,
            };
        }
        if value <= mean - sigma * stddev {
            return Classification {
                rule: minus_rule,
                description: minus_desc,
            };
        }
    }

    Classification {
        rule: RuleLabel::NoViolation,
        description: NO_VIOLATION_DESCRIPTION,
    }
}
