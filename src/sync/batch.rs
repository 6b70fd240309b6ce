use super::incremental::{SyncManager, SyncOptions, SyncOutcome};
use crate::core::{InstrumentCode, PartialBatchFailure};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcomes of a multi-instrument sync, in the order the instruments were
/// processed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<SyncOutcome>,
    /// Set when the batch stopped early; instruments after the last outcome
    /// were not attempted.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn updated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.updated).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Describes the failed instruments, if any. The batch itself always
    /// completes for the others.
    pub fn partial_failure(&self) -> Option<PartialBatchFailure> {
        let failed: Vec<(String, String)> = self
            .failures()
            .map(|o| {
                let reason = o.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                (o.instrument.to_string(), reason)
            })
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(PartialBatchFailure {
                total: self.outcomes.len(),
                failed,
            })
        }
    }
}

/// Syncs `codes` one after another. A failing instrument never stops the
/// batch; cancellation is checked between instruments.
pub async fn sync_batch<F>(
    manager: &SyncManager,
    codes: &[InstrumentCode],
    options: SyncOptions,
    cancel: &CancellationToken,
    mut on_outcome: F,
) -> BatchReport
where
    F: FnMut(&SyncOutcome),
{
    let mut report = BatchReport::default();
    let today = manager.clock().today();

    for code in codes {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let outcome = match manager.sync(code, options, cancel).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => {
                report.cancelled = true;
                break;
            }
            // Removed between listing and syncing, or an unreadable registry
            Err(err) => {
                warn!("Skipping {}: {}", code, err);
                SyncOutcome::failed(code.clone(), today, err)
            }
        };
        on_outcome(&outcome);
        report.outcomes.push(outcome);
    }

    info!(
        "Batch sync finished: {} of {} instruments updated, {} failed{}",
        report.updated(),
        codes.len(),
        report.failures().count(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    report
}
