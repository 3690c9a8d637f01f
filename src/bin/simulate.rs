//! QC Measurement Simulation
//!
//! Generates synthetic QC control readings for testing LabSentry.
//! Simulates in-control Gaussian runs and scripted out-of-control
//! scenarios:
//! - `in-control`: Normal(mean, sd) throughout
//! - `shift`: a sustained +1.5 SD systematic shift (trips 4-1s, then 10x)
//! - `outlier`: one gross error at +3.5 SD (trips 1-3s)
//! - `full`: in-control warmup, then shift, then a final outlier
//!
//! # Usage
//! ```bash
//! simulate --scenario shift --points 30 | labsentry --stdin --ephemeral
//! ```

use chrono::{Duration, Utc};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::io::{self, Write};

use labsentry::types::Measurement;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "simulate")]
#[command(about = "QC measurement simulation for LabSentry testing")]
#[command(version)]
struct Args {
    /// Test (analyte) name
    #[arg(long, default_value = "GLUCOSE")]
    test: String,

    /// Control level
    #[arg(long, default_value = "normal")]
    level: String,

    /// Target mean
    #[arg(long, default_value = "100.0")]
    mean: f64,

    /// Target standard deviation
    #[arg(long, default_value = "2.0")]
    sd: f64,

    /// Measurement unit
    #[arg(long, default_value = "mg/dL")]
    unit: String,

    /// Number of readings to generate
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=10_000))]
    points: u32,

    /// Scenario: in-control, shift, outlier, full
    #[arg(long, default_value = "in-control")]
    scenario: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Scenario
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    InControl,
    Shift,
    Outlier,
    Full,
}

impl Scenario {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "in-control" => Some(Scenario::InControl),
            "shift" => Some(Scenario::Shift),
            "outlier" => Some(Scenario::Outlier),
            "full" => Some(Scenario::Full),
            _ => None,
        }
    }

    /// Offset (in SD units) added to the sampling mean at reading `i` of
    /// `total`.
    fn bias_sd(self, i: u32, total: u32) -> f64 {
        match self {
            Scenario::InControl => 0.0,
            // Shift kicks in at the halfway point and persists
            Scenario::Shift => {
                if i >= total / 2 {
                    1.5
                } else {
                    0.0
                }
            }
            Scenario::Outlier => 0.0,
            Scenario::Full => {
                if i >= total / 3 {
                    1.5
                } else {
                    0.0
                }
            }
        }
    }

    /// Whether reading `i` of `total` is the scripted gross error.
    fn is_gross_error(self, i: u32, total: u32) -> bool {
        matches!(self, Scenario::Outlier | Scenario::Full) && i == total - 1
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let Some(scenario) = Scenario::parse(&args.scenario) else {
        anyhow::bail!(
            "Unknown scenario '{}' (expected in-control, shift, outlier, full)",
            args.scenario
        );
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    // In-control noise is slightly tighter than the target SD so that the
    // scripted shift cleanly clears the 1 SD limit
    let noise = Normal::new(0.0, args.sd * 0.4)
        .map_err(|e| anyhow::anyhow!("Invalid SD: {e}"))?;

    let start = Utc::now() - Duration::minutes(i64::from(args.points));
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for i in 0..args.points {
        let value = if scenario.is_gross_error(i, args.points) {
            args.mean + 3.5 * args.sd
        } else {
            args.mean + scenario.bias_sd(i, args.points) * args.sd + noise.sample(&mut rng)
        };

        let m = Measurement::new(
            &args.test,
            &args.level,
            start + Duration::minutes(i64::from(i)),
            value,
            args.mean,
            args.sd,
            &args.unit,
        );
        writeln!(out, "{}", serde_json::to_string(&m)?)?;
    }

    Ok(())
}
