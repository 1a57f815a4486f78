//! Scheduled integrity verification.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::verify::{CancelFlag, VerificationReport, VerifyOptions};

/// Handle to a background task that re-verifies the whole chain every
/// period.
///
/// The task stops when the ledger is closed, when [`stop`](Self::stop) is
/// called, or when the handle is dropped. Stopping cancels a verification
/// that is in progress.
pub struct VerificationMonitor {
    task: JoinHandle<()>,
    reports: watch::Receiver<Option<VerificationReport>>,
    cancel: CancelFlag,
}

impl VerificationMonitor {
    /// Start verifying `ledger` every `period`, first after one period.
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(ledger: Ledger, period: Duration) -> Self {
        let (tx, reports) = watch::channel(None);
        let cancel = CancelFlag::new();
        let task = tokio::spawn(run(ledger, period, tx, cancel.clone()));
        Self {
            task,
            reports,
            cancel,
        }
    }

    /// The most recent completed report, if any run has finished.
    pub fn latest(&self) -> Option<VerificationReport> {
        self.reports.borrow().clone()
    }

    /// Wait for the next completed report. `None` once the task has ended.
    pub async fn next_report(&mut self) -> Option<VerificationReport> {
        self.reports.changed().await.ok()?;
        self.reports.borrow_and_update().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop scheduling runs and wait for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        self.task.abort();
        // A cancelled join is the expected result.
        let _ = (&mut self.task).await;
    }
}

impl Drop for VerificationMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn run(
    ledger: Ledger,
    period: Duration,
    reports: watch::Sender<Option<VerificationReport>>,
    cancel: CancelFlag,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        info!(length = ledger.len(), "running scheduled integrity verification");
        let options = VerifyOptions::new().cancel(cancel.clone());
        match ledger.verify_integrity_async(options).await {
            Ok(report) => {
                match &report {
                    VerificationReport::Valid { checked, .. } => {
                        info!(checked, "scheduled verification passed")
                    }
                    VerificationReport::Failed(failure) => error!(
                        sequence = failure.sequence,
                        reason = failure.reason.as_str(),
                        detail = %failure.detail,
                        "scheduled verification found a broken chain"
                    ),
                    VerificationReport::Cancelled { .. } => break,
                }
                reports.send_replace(Some(report));
            }
            Err(LedgerError::Closed) => {
                info!("ledger closed, stopping scheduled verification");
                break;
            }
            Err(e) => warn!(error = %e, "scheduled verification could not run"),
        }
    }
}
