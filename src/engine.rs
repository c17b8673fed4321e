use crate::errors::{StoreError, StoreResult};
use crate::persist::{self, AtomicJsonWriter};
use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Explicit construction-time configuration: backing path, debounce window,
/// and the grace period `close` grants the background persister.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub debounce: Duration,
    pub close_grace: Duration,
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: Duration::from_millis(100),
            close_grace: Duration::from_secs(5),
        }
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn close_grace(mut self, close_grace: Duration) -> Self {
        self.close_grace = close_grace;
        self
    }
}

/// Atomic, lock-free holder of an immutable snapshot with optimistic
/// mutation and debounced durability.
///
/// Reads never block. Mutations go through [`StorageEngine::update`], a
/// compare-and-swap loop; each committed value lands in a single coalescing
/// pending slot that one background task drains to disk after the debounce
/// window. The file therefore lags the snapshot by at most the debounce
/// interval plus one write, except immediately after [`StorageEngine::flush`].
pub struct StorageEngine<T> {
    snapshot: ArcSwap<T>,
    pending: Mutex<Option<Arc<T>>>,
    flush_scheduled: AtomicBool,
    closed: AtomicBool,
    notify: Notify,
    shutdown: Notify,
    write_lock: tokio::sync::Mutex<()>,
    writer: AtomicJsonWriter,
    debounce: Duration,
    close_grace: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T> StorageEngine<T>
where
    T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Load the initial snapshot (backing file if present, `default`
    /// otherwise) and start the background persister. A backing file that
    /// exists but does not parse is fatal. Must be called within a tokio
    /// runtime.
    pub fn open(config: EngineConfig, default: T) -> StoreResult<Arc<Self>> {
        if config.path.as_os_str().is_empty() {
            return Err(StoreError::InvalidArgument(
                "backing path must not be empty".to_string(),
            ));
        }

        let initial = persist::load_or_default(&config.path, default)?;
        let engine = Arc::new(Self {
            snapshot: ArcSwap::from_pointee(initial),
            pending: Mutex::new(None),
            flush_scheduled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
            shutdown: Notify::new(),
            write_lock: tokio::sync::Mutex::new(()),
            writer: AtomicJsonWriter::new(&config.path),
            debounce: config.debounce,
            close_grace: config.close_grace,
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_persister(Arc::clone(&engine)));
        *engine.worker.lock().expect("worker handle lock") = Some(handle);

        Ok(engine)
    }

    /// Current snapshot; never blocks, never locks.
    pub fn snapshot(&self) -> Arc<T> {
        self.snapshot.load_full()
    }

    /// Optimistic update loop. `apply` must be free of side effects: a lost
    /// compare-and-swap race re-invokes it against the fresh value. A result
    /// equal to the input commits nothing and schedules no write.
    pub fn update<F>(&self, apply: F) -> StoreResult<Arc<T>>
    where
        F: Fn(&T) -> T,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed(
                "update on a closed storage engine".to_string(),
            ));
        }

        loop {
            let current = self.snapshot.load_full();
            let next = apply(&current);
            if next == *current {
                return Ok(current);
            }

            let next = Arc::new(next);
            let previous = self
                .snapshot
                .compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&previous, &current) {
                self.enqueue(Arc::clone(&next));
                return Ok(next);
            }
            // Lost the race; retry against the new current value.
        }
    }

    /// Drain the latest pending value, if any, to disk with forced
    /// durability. Serialized with the background persister through the
    /// write lock: a flush that finds the slot empty still waits out any
    /// write in progress and then fsyncs the target, so on return the file
    /// durably holds the last committed value. A failed write is surfaced
    /// directly and the value goes back into the pending slot.
    pub async fn flush(&self) -> StoreResult<()> {
        let _io = self.write_lock.lock().await;
        match self.take_pending() {
            Some(value) => {
                if let Err(error) = self.writer.write(value.as_ref(), true) {
                    self.requeue(value);
                    return Err(error);
                }
                Ok(())
            }
            // The persister writes without fsync; upgrade whatever it last
            // published to durable.
            None => self.writer.sync(),
        }
    }

    /// One best-effort final flush, then stop the persister within the
    /// configured grace period (aborting it past the deadline). Idempotent;
    /// updates after close are rejected.
    pub async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = self.flush().await;
        self.shutdown.notify_waiters();
        self.notify.notify_one();

        let handle = self.worker.lock().expect("worker handle lock").take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.close_grace, handle).await.is_err() {
                tracing::warn!(
                    path = %self.writer.path().display(),
                    "persister did not stop within the grace period; aborting"
                );
                abort.abort();
            }
        }

        flushed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn enqueue(&self, value: Arc<T>) {
        *self.pending.lock().expect("pending slot lock") = Some(value);
        if !self.flush_scheduled.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    fn take_pending(&self) -> Option<Arc<T>> {
        self.pending.lock().expect("pending slot lock").take()
    }

    fn requeue(&self, value: Arc<T>) {
        let mut slot = self.pending.lock().expect("pending slot lock");
        // A newer commit supersedes the failed one.
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    fn retry_delay(&self) -> Duration {
        self.debounce.max(MIN_RETRY_DELAY)
    }

    async fn run_persister(engine: Arc<Self>) {
        loop {
            engine.notify.notified().await;
            if engine.closed.load(Ordering::Acquire) {
                break;
            }

            loop {
                if !engine.debounce.is_zero() {
                    // close() interrupts the debounce sleep; anything still
                    // pending was already drained by its final flush.
                    tokio::select! {
                        _ = tokio::time::sleep(engine.debounce) => {}
                        _ = engine.shutdown.notified() => return,
                    }
                }

                // Take and write under one lock acquisition so a concurrent
                // flush never observes an empty slot while this write is
                // still in flight.
                let outcome = {
                    let _io = engine.write_lock.lock().await;
                    match engine.take_pending() {
                        Some(value) => {
                            let result = engine.writer.write(value.as_ref(), false);
                            if result.is_err() {
                                engine.requeue(value);
                            }
                            Some(result)
                        }
                        None => None,
                    }
                };

                let Some(result) = outcome else {
                    engine.flush_scheduled.store(false, Ordering::Release);
                    // An enqueue that slipped in between the take and the
                    // flag clear left a value behind without a wake-up;
                    // reclaim it instead of parking.
                    let refilled =
                        engine.pending.lock().expect("pending slot lock").is_some();
                    if refilled && !engine.flush_scheduled.swap(true, Ordering::AcqRel) {
                        continue;
                    }
                    break;
                };

                if let Err(error) = result {
                    // The mutator already observed its in-memory commit;
                    // retry here forever rather than surfacing.
                    tracing::warn!(
                        path = %engine.writer.path().display(),
                        error = %error,
                        "background persist failed; will retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(engine.retry_delay()) => {}
                        _ = engine.shutdown.notified() => return,
                    }
                }

                if engine.closed.load(Ordering::Acquire) {
                    return;
                }
            }
        }
    }
}
