//! Notification boundary - violation report delivery
//!
//! The validator computes; delivery is somebody else's problem. This module
//! defines the [`Notifier`] collaborator trait and the fire-and-forget
//! dispatch helper the pipeline uses: delivery runs on its own task, and a
//! failed delivery is logged and swallowed so it can never fail the
//! measurement-ingestion operation that triggered it.

use crate::types::Measurement;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Error type for notification delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivery contract the engine produces to. Implementations own their own
/// transport, retry policy and internal concurrency.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        report: &str,
        offending: &[Measurement],
    ) -> Result<(), NotifyError>;
}

/// Launch a notification without awaiting it.
///
/// Any delivery error is caught and logged here, at the call site
/// surrounding the validator, never inside it. The returned handle is
/// only awaited by tests that need deterministic completion.
pub fn dispatch_notification(
    notifier: Arc<dyn Notifier>,
    report: String,
    offending: Vec<Measurement>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&report, &offending).await {
            error!(error = %e, "Notification delivery failed; ingestion path unaffected");
        }
    })
}

// ============================================================================
// Log Notifier
// ============================================================================

/// Default delivery: render the violation report into the tracing log.
/// Used by the replay binary; production deployments substitute a real
/// transport behind the same trait.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        report: &str,
        offending: &[Measurement],
    ) -> Result<(), NotifyError> {
        warn!(offending = offending.len(), "QC violation report:\n{report}");
        for m in offending {
            info!(
                test = %m.test_name,
                level = %m.control_level,
                value = m.value,
                rule = %m.rule.map(|r| r.as_str()).unwrap_or("unclassified"),
                "Offending measurement"
            );
        }
        Ok(())
    }
}
