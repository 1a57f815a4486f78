use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::entry::Entry;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{AppendRequest, Ledger};

/// Check run on every entry before it is buffered. `Err` carries the reason
/// for rejecting it.
pub type Validator = Arc<dyn Fn(&AppendRequest) -> Result<(), String> + Send + Sync>;

/// Result of a successful flush.
#[derive(Clone, Debug, Default)]
pub struct BatchOutcome {
    pub entries: Vec<Entry>,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lifetime counters of a [`BatchProcessor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub flushes: u64,
    pub entries_committed: u64,
    pub failed_flushes: u64,
    /// Entries refused by a validator. They were never buffered.
    pub rejected: u64,
}

/// Client-side buffer committed to a ledger as one atomic unit.
///
/// Buffering never touches the chain. A flush takes the writer lock once,
/// chains every buffered entry onto the current head and persists them with
/// a single bulk write. If that write fails nothing is committed and the
/// buffer is kept for a retry.
pub struct BatchProcessor {
    ledger: Ledger,
    capacity: usize,
    buffer: Vec<AppendRequest>,
    validators: Vec<Validator>,
    stats: BatchStats,
}

impl BatchProcessor {
    pub fn new(ledger: Ledger, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ledger,
            capacity,
            buffer: Vec::with_capacity(capacity),
            validators: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    /// Refuse entries for which `check` fails. Validators run in the order
    /// they were added; the first failure wins.
    pub fn with_validator<F>(mut self, check: F) -> Self
    where
        F: Fn(&AppendRequest) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(check));
        self
    }

    /// Buffer one entry. Returns the number now pending.
    pub fn add_entry(&mut self, request: impl Into<AppendRequest>) -> LedgerResult<usize> {
        if self.buffer.len() >= self.capacity {
            return Err(LedgerError::BatchFull {
                capacity: self.capacity,
            });
        }
        let request = request.into();
        if let Err(reason) = self.validators.iter().try_for_each(|check| check(&request)) {
            self.stats.rejected += 1;
            debug!(%reason, "entry rejected before buffering");
            return Err(LedgerError::Rejected(reason));
        }
        self.buffer.push(request);
        Ok(self.buffer.len())
    }

    pub fn flush(&mut self) -> LedgerResult<BatchOutcome> {
        if self.buffer.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let started = Instant::now();
        let result = self.ledger.append_batch(self.buffer.clone());
        self.settle(result, started)
    }

    pub async fn flush_async(&mut self) -> LedgerResult<BatchOutcome> {
        if self.buffer.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let started = Instant::now();
        let result = self.ledger.append_batch_async(self.buffer.clone()).await;
        self.settle(result, started)
    }

    fn settle(&mut self, result: LedgerResult<Vec<Entry>>, started: Instant) -> LedgerResult<BatchOutcome> {
        match result {
            Ok(entries) => {
                self.buffer.clear();
                self.stats.flushes += 1;
                self.stats.entries_committed += entries.len() as u64;
                let elapsed = started.elapsed();
                debug!(count = entries.len(), ?elapsed, "batch flushed");
                Ok(BatchOutcome { entries, elapsed })
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                warn!(pending = self.buffer.len(), error = %e, "batch flush failed, buffer kept");
                Err(e)
            }
        }
    }

    /// Move this processor onto a background task that flushes whatever is
    /// pending every `period`. Must be called from within a Tokio runtime.
    pub fn spawn_auto_flush(self, period: Duration) -> AutoFlush {
        let batch = Arc::new(Mutex::new(self));
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(auto_flush(Arc::clone(&batch), period, stopped));
        AutoFlush { batch, stop, task }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// Drop everything buffered, returning it.
    pub fn discard(&mut self) -> Vec<AppendRequest> {
        std::mem::take(&mut self.buffer)
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

impl fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("capacity", &self.capacity)
            .field("pending", &self.buffer.len())
            .field("validators", &self.validators.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// A [`BatchProcessor`] flushed by a timer as well as whenever it fills.
///
/// Dropping the handle stops the timer after one last flush of anything
/// still pending. [`shutdown`](Self::shutdown) does the same and reports
/// how that flush went.
pub struct AutoFlush {
    batch: Arc<Mutex<BatchProcessor>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<LedgerResult<BatchOutcome>>,
}

impl AutoFlush {
    /// Buffer one entry, flushing first if the buffer is full. Returns the
    /// number now pending.
    pub async fn add_entry(&self, request: impl Into<AppendRequest>) -> LedgerResult<usize> {
        let mut batch = self.batch.lock().await;
        if batch.is_full() {
            batch.flush_async().await?;
        }
        batch.add_entry(request)
    }

    pub async fn flush(&self) -> LedgerResult<BatchOutcome> {
        self.batch.lock().await.flush_async().await
    }

    pub async fn pending(&self) -> usize {
        self.batch.lock().await.pending()
    }

    pub async fn stats(&self) -> BatchStats {
        self.batch.lock().await.stats()
    }

    /// Stop the timer and flush what is left.
    pub async fn shutdown(self) -> LedgerResult<BatchOutcome> {
        self.stop.send_replace(true);
        self.task
            .await
            .map_err(|e| LedgerError::TaskFailed(e.to_string()))?
    }
}

async fn auto_flush(
    batch: Arc<Mutex<BatchProcessor>>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> LedgerResult<BatchOutcome> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut batch = batch.lock().await;
                if batch.pending() == 0 {
                    continue;
                }
                match batch.flush_async().await {
                    Ok(outcome) => debug!(count = outcome.len(), "timed batch flush"),
                    Err(e) => error!(error = %e, "timed batch flush failed"),
                }
            }
            // A dropped handle counts as a stop request.
            _ = stop.changed() => break,
        }
    }

    let outcome = batch.lock().await.flush_async().await;
    if let Err(e) = &outcome {
        error!(error = %e, "final batch flush failed");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use attest_store::testing::FailingBackend;
    use attest_types::Value;
    use serde_json::json;

    use super::*;
    use crate::VerifyOptions;

    fn processor(capacity: usize) -> (Arc<FailingBackend>, BatchProcessor) {
        let backend = Arc::new(FailingBackend::new());
        let ledger = Ledger::builder(backend.clone()).open().unwrap();
        (backend, BatchProcessor::new(ledger, capacity))
    }

    #[test]
    fn buffering_does_not_touch_chain() {
        let (backend, mut batch) = processor(4);
        assert_eq!(batch.add_entry(json!(1)).unwrap(), 1);
        assert_eq!(batch.add_entry(json!(2)).unwrap(), 2);
        assert!(batch.ledger().is_empty());
        assert_eq!(backend.append_calls(), 0);
    }

    #[test]
    fn full_buffer_rejects() {
        let (_, mut batch) = processor(2);
        batch.add_entry(json!(1)).unwrap();
        batch.add_entry(json!(2)).unwrap();
        assert!(batch.is_full());
        assert!(matches!(
            batch.add_entry(json!(3)),
            Err(LedgerError::BatchFull { capacity: 2 })
        ));
    }

    #[test]
    fn flush_commits_in_one_call() {
        let (backend, mut batch) = processor(8);
        for i in 0..5 {
            batch.add_entry(json!({ "i": i })).unwrap();
        }
        let outcome = batch.flush().unwrap();
        assert_eq!(outcome.len(), 5);
        assert_eq!(backend.append_calls(), 1);
        assert_eq!(batch.pending(), 0);
        assert_eq!(batch.ledger().len(), 5);
        assert_eq!(batch.stats().entries_committed, 5);
        assert!(batch
            .ledger()
            .verify_integrity(VerifyOptions::default())
            .unwrap()
            .is_valid());
    }

    #[test]
    fn empty_flush_is_noop() {
        let (backend, mut batch) = processor(8);
        assert!(batch.flush().unwrap().is_empty());
        assert_eq!(backend.append_calls(), 0);
        assert_eq!(batch.stats().flushes, 0);
    }

    #[test]
    fn failed_flush_keeps_buffer_for_retry() {
        let (backend, mut batch) = processor(8);
        batch.add_entry(json!("a")).unwrap();
        batch.add_entry(json!("b")).unwrap();

        backend.fail_next_append();
        let err = batch.flush().unwrap_err();
        assert!(matches!(err, LedgerError::BatchCommit { size: 2, .. }));
        assert_eq!(batch.pending(), 2);
        assert!(batch.ledger().is_empty());
        assert_eq!(batch.stats().failed_flushes, 1);

        assert_eq!(batch.flush().unwrap().len(), 2);
        assert_eq!(batch.ledger().len(), 2);
    }

    #[test]
    fn discard_empties_buffer() {
        let (_, mut batch) = processor(8);
        batch.add_entry(json!(1)).unwrap();
        assert_eq!(batch.discard().len(), 1);
        assert_eq!(batch.pending(), 0);
    }

    #[test]
    fn validator_rejects_before_buffering() {
        let (backend, batch) = processor(4);
        let mut batch = batch
            .with_validator(|r| match r.payload().get("user") {
                Some(_) => Ok(()),
                None => Err("missing user".into()),
            })
            .with_validator(|r| match r.payload().get("user").and_then(Value::as_str) {
                Some("root") => Err("root is not audited here".into()),
                _ => Ok(()),
            });

        assert_eq!(batch.add_entry(json!({ "user": "alice" })).unwrap(), 1);
        assert!(matches!(
            batch.add_entry(json!({ "action": "x" })),
            Err(LedgerError::Rejected(reason)) if reason == "missing user"
        ));
        assert!(matches!(
            batch.add_entry(json!({ "user": "root" })),
            Err(LedgerError::Rejected(_))
        ));
        assert_eq!(batch.pending(), 1);
        assert_eq!(batch.stats().rejected, 2);

        batch.flush().unwrap();
        assert_eq!(backend.inner().len(), 1);
    }

    async fn wait_for_len(ledger: &Ledger, len: u64) {
        for _ in 0..200 {
            if ledger.len() == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("ledger length stuck at {}, wanted {len}", ledger.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timer_flushes_pending_entries() {
        let (backend, batch) = processor(16);
        let ledger = batch.ledger().clone();
        let auto = batch.spawn_auto_flush(Duration::from_millis(20));
        for i in 0..3 {
            auto.add_entry(json!({ "i": i })).await.unwrap();
        }
        wait_for_len(&ledger, 3).await;
        assert!(backend.append_calls() >= 1);
        assert_eq!(auto.pending().await, 0);

        let last = auto.shutdown().await.unwrap();
        assert!(last.is_empty());
        assert!(ledger.verify_integrity(VerifyOptions::default()).unwrap().is_valid());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_buffer_flushes_on_add_and_shutdown_flushes_rest() {
        let (_, batch) = processor(2);
        let ledger = batch.ledger().clone();
        let auto = batch.spawn_auto_flush(Duration::from_secs(3600));
        for i in 0..3 {
            auto.add_entry(json!(i)).await.unwrap();
        }
        assert_eq!(ledger.len(), 2);
        assert_eq!(auto.pending().await, 1);

        let last = auto.shutdown().await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(ledger.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_timed_flush_retries_on_next_tick() {
        let (backend, batch) = processor(8);
        let ledger = batch.ledger().clone();
        backend.set_fail_appends(true);
        let auto = batch.spawn_auto_flush(Duration::from_millis(20));
        auto.add_entry(json!("a")).await.unwrap();
        auto.add_entry(json!("b")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ledger.is_empty());
        assert!(auto.stats().await.failed_flushes >= 1);
        assert_eq!(auto.pending().await, 2);

        backend.set_fail_appends(false);
        wait_for_len(&ledger, 2).await;
        auto.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropping_the_handle_flushes_pending() {
        let (_, batch) = processor(8);
        let ledger = batch.ledger().clone();
        let auto = batch.spawn_auto_flush(Duration::from_secs(3600));
        auto.add_entry(json!("left behind")).await.unwrap();
        drop(auto);
        wait_for_len(&ledger, 1).await;
    }

    #[tokio::test]
    async fn async_flush() {
        let (_, mut batch) = processor(8);
        batch.add_entry(json!(1)).unwrap();
        batch.add_entry(json!(2)).unwrap();
        let outcome = batch.flush_async().await.unwrap();
        assert_eq!(
            outcome.entries.iter().map(Entry::sequence).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }
}
