//! Single-writer lock shared by the blocking and async entry points.
//!
//! The lock is a `tokio::sync::Mutex`, which grants waiters in FIFO order.
//! Blocking callers join the same queue: they poll the `lock_owned` future
//! by hand with a waker that unparks the calling thread, so an async writer
//! that arrives later cannot overtake them.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use tokio::sync::OwnedMutexGuard;

use crate::error::{LedgerError, LedgerResult};

#[derive(Clone, Default)]
pub(crate) struct WriterLock {
    inner: Arc<tokio::sync::Mutex<()>>,
}

/// Proof that the holder is the only writer. Releases on drop.
pub(crate) struct WriterGuard {
    _permit: OwnedMutexGuard<()>,
}

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

impl WriterLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block the current thread until the lock is held or `timeout` passes.
    ///
    /// Must not be called from inside an async task.
    pub(crate) fn acquire(&self, timeout: Option<Duration>) -> LedgerResult<WriterGuard> {
        let started = Instant::now();
        let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
        let mut cx = Context::from_waker(&waker);
        // Dropping the pending future leaves the queue.
        let mut lock = pin!(Arc::clone(&self.inner).lock_owned());
        loop {
            if let Poll::Ready(permit) = lock.as_mut().poll(&mut cx) {
                return Ok(WriterGuard { _permit: permit });
            }
            match timeout {
                None => thread::park(),
                Some(limit) => {
                    let waited = started.elapsed();
                    if waited >= limit {
                        return Err(LedgerError::ConcurrencyTimeout { waited });
                    }
                    thread::park_timeout(limit - waited);
                }
            }
        }
    }

    /// Wait for the lock without blocking the scheduler thread.
    pub(crate) async fn acquire_async(&self, timeout: Option<Duration>) -> LedgerResult<WriterGuard> {
        let started = Instant::now();
        let lock = Arc::clone(&self.inner).lock_owned();
        let permit = match timeout {
            None => lock.await,
            Some(limit) => tokio::time::timeout(limit, lock)
                .await
                .map_err(|_| LedgerError::ConcurrencyTimeout {
                    waited: started.elapsed(),
                })?,
        };
        Ok(WriterGuard { _permit: permit })
    }
}
