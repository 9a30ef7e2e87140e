//! Async executor bridge.
//!
//! Bridges blocking, callback-style completion signals into `async`/`await`
//! so nested listener chains become explicit composable futures over a
//! bounded thread pool, built directly on `tokio::sync` rather than a
//! bespoke callback executor.

use std::cell::Cell;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinError;

/// Collects `n` independent completions; once every one has reported, wakes
/// a single waiter. On any failure the first error is retained and later
/// ones are suppressed, but every task is still allowed to drain.
pub struct GroupedListener {
    remaining: AtomicUsize,
    first_error: Mutex<Option<anyhow::Error>>,
    notify: Notify,
}

impl GroupedListener {
    pub fn new(n: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(n),
            first_error: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Reports one completion. Safe to call from any number of concurrent
    /// tasks; only the task that observes the last completion wakes the
    /// joiner.
    pub fn complete(&self, result: Result<()>) {
        if let Err(err) = result {
            let mut slot = self.first_error.lock().unwrap();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_one();
        }
    }

    /// Waits for all `n` completions, then returns the first error (if any).
    pub async fn join(&self) -> Result<()> {
        while self.remaining.load(Ordering::SeqCst) > 0 {
            self.notify.notified().await;
        }
        match self.first_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A single-slot latch: exactly one `complete` call is expected, exactly
/// one `wait` call consumes it. Lets sequential async steps compose without
/// nested callbacks.
pub struct StepListener<T> {
    tx: Mutex<Option<oneshot::Sender<Result<T>>>>,
    rx: Mutex<Option<oneshot::Receiver<Result<T>>>>,
}

impl<T: Send + 'static> StepListener<T> {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn complete(&self, result: Result<T>) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    }

    pub async fn wait(&self) -> Result<T> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("StepListener::wait called more than once");
        rx.await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("step listener dropped without completing")))
    }
}

impl<T: Send + 'static> Default for StepListener<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded exponential backoff capped at a cumulative duration.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    base: Duration,
    max_cumulative: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_cumulative: Duration) -> Self {
        Self { base, max_cumulative }
    }

    /// 1000ms cumulative cap.
    pub fn default_capped_at_1s() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(1000))
    }

    fn delay_for(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        let next = self.base.checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))?;
        if elapsed.checked_add(next)? > self.max_cumulative {
            None
        } else {
            Some(next)
        }
    }
}

/// Retries `op` while `is_retryable` classifies the failure as transient,
/// rescheduling after the next backoff delay; surfaces the failure once the
/// policy's cumulative duration would be exceeded or the error isn't
/// retryable. Retries are automatic only for transient shard-transport
/// failures -- anything else is surfaced immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: BackoffPolicy,
    mut op: F,
    is_retryable: impl Fn(&anyhow::Error) -> bool,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut elapsed = Duration::ZERO;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                match policy.delay_for(attempt, elapsed) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        elapsed += delay;
                        attempt += 1;
                    }
                    None => return Err(err),
                }
            }
        }
    }
}

thread_local! {
    static ON_POOL: Cell<bool> = Cell::new(false);
}

/// Debug-only check that the calling thread was dispatched through
/// [`SnapshotPool`] or [`GenericIoPool`]. A no-op in release builds; in
/// debug builds it catches a blocking call that was refactored to run
/// directly on an async task instead of being handed to one of the two
/// pools.
pub fn assert_on_io_pool() {
    #[cfg(debug_assertions)]
    ON_POOL.with(|flag| {
        debug_assert!(
            flag.get(),
            "blocking blob-store/codec work ran off the snapshot/generic pool"
        );
    });
}

fn run_marked<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    ON_POOL.with(|flag| flag.set(true));
    f()
}

/// CPU-bound work: compression and checksumming. A thin `spawn_blocking`
/// wrapper, distinguished from [`GenericIoPool`] only by the thread-local
/// marker it sets -- both currently dispatch to the same tokio blocking
/// pool, but the two names keep call sites honest about which kind of work
/// they're handing off.
pub struct SnapshotPool;

impl SnapshotPool {
    pub async fn spawn<F, T>(f: F) -> std::result::Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || run_marked(f)).await
    }
}

/// Blocking `BlobContainer` calls: reads, writes, listings, deletes.
pub struct GenericIoPool;

impl GenericIoPool {
    pub async fn spawn<F, T>(f: F) -> std::result::Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(move || run_marked(f)).await
    }
}
