//! LabSentry - Laboratory QC Statistical Process Control
//!
//! Replays QC measurement batches through the rule engine: classifies each
//! reading at write time, persists it, and evaluates Westgard multi-rules
//! against rolling history, logging a violation report per batch.
//!
//! # Usage
//!
//! ```bash
//! # Replay a JSON-lines file of measurements
//! labsentry --input runs.jsonl
//!
//! # Stream from the simulator
//! simulate --scenario shift | labsentry --stdin
//!
//! # Keep everything in memory (no sled database)
//! simulate | labsentry --stdin --ephemeral
//! ```
//!
//! # Environment Variables
//!
//! - `LABSENTRY_CONFIG`: Path to a qc_config.toml (default: ./qc_config.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use labsentry::config::QcConfig;
use labsentry::notify::LogNotifier;
use labsentry::pipeline::IngestPipeline;
use labsentry::store::{MeasurementStore, MemoryStore, SledStore};
use labsentry::types::Measurement;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "labsentry")]
#[command(about = "Laboratory QC Statistical Process Control")]
#[command(version)]
struct CliArgs {
    /// Read measurements from stdin (JSON lines) instead of a file
    #[arg(long)]
    stdin: bool,

    /// JSON-lines measurement file to replay
    #[arg(long, conflicts_with = "stdin")]
    input: Option<PathBuf>,

    /// Path to a qc_config.toml (overrides the default search order)
    #[arg(long, env = "LABSENTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Use the in-memory store instead of sled (nothing persisted)
    #[arg(long)]
    ephemeral: bool,

    /// Measurements per ingestion batch
    #[arg(long, default_value = "20")]
    batch_size: usize,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => QcConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => QcConfig::load(),
    };
    info!(lab = %config.laboratory.name, "LabSentry starting");

    let excluded: HashSet<String> = config.rules.excluded_set();
    let store: Arc<dyn MeasurementStore> = if args.ephemeral {
        info!("Using in-memory measurement store");
        Arc::new(MemoryStore::new(excluded))
    } else {
        info!(path = %config.storage.data_path, "Opening sled measurement store");
        Arc::new(
            SledStore::open(&config.storage.data_path, excluded)
                .context("Failed to open measurement store")?,
        )
    };

    let pipeline = IngestPipeline::new(store, Arc::new(LogNotifier), &config);

    // Ctrl-C requests a graceful drain of the current batch
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested, draining current batch");
                shutdown.cancel();
            }
        });
    }

    let (lines_read, ingested) = if args.stdin {
        replay(
            BufReader::new(tokio::io::stdin()),
            &pipeline,
            args.batch_size,
            &shutdown,
        )
        .await?
    } else if let Some(path) = &args.input {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        replay(BufReader::new(file), &pipeline, args.batch_size, &shutdown).await?
    } else {
        anyhow::bail!("Provide --input <file> or --stdin");
    };

    info!(lines_read, ingested, "Replay complete");
    Ok(())
}

// ============================================================================
// Replay Loop
// ============================================================================

/// Read JSON-lines measurements, batching them through the pipeline.
///
/// Malformed lines are logged and skipped; a store failure aborts the
/// replay. Returns (lines read, measurements ingested).
async fn replay<R: AsyncBufRead + Unpin>(
    reader: R,
    pipeline: &IngestPipeline,
    batch_size: usize,
    shutdown: &CancellationToken,
) -> Result<(u64, u64)> {
    let mut lines = reader.lines();
    let mut batch: Vec<Measurement> = Vec::with_capacity(batch_size);
    let mut lines_read: u64 = 0;
    let mut ingested: u64 = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input line")?,
            () = shutdown.cancelled() => None,
        };
        let Some(line) = line else { break };
        lines_read += 1;

        if line.trim().is_empty() {
            continue;
        }
        match parse_measurement(&line) {
            Ok(m) => batch.push(m),
            Err(e) => {
                warn!(line = lines_read, error = %e, "Skipping malformed measurement line");
                continue;
            }
        }

        if batch.len() >= batch_size {
            ingested += flush_batch(pipeline, &mut batch).await?;
        }
    }

    // Drain the final partial batch
    ingested += flush_batch(pipeline, &mut batch).await?;
    Ok((lines_read, ingested))
}

/// Parse one JSON line, re-normalizing the test name (deserialization
/// bypasses the `Measurement::new` constructor).
fn parse_measurement(line: &str) -> Result<Measurement> {
    let mut m: Measurement = serde_json::from_str(line).context("Invalid measurement JSON")?;
    m.test_name = m.test_name.to_uppercase();
    Ok(m)
}

async fn flush_batch(pipeline: &IngestPipeline, batch: &mut Vec<Measurement>) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }
    let stored = pipeline
        .ingest(std::mem::take(batch))
        .await
        .context("Measurement store rejected batch")?;
    Ok(stored.len() as u64)
}
