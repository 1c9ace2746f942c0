//! Batch Loader: coalesce keyed lookups into one batched supplier call
//!
//! Individual `load(key)` calls are buffered. The buffer is flushed when it
//! holds `batch_size` keys or when `batch_delay` has passed since the first
//! key was buffered, whichever comes first. The flush issues a single call to
//! the batch function and hands result `i` to the caller of key `i`. If the
//! batch call fails, every caller in that batch receives the error.
//!
//! # Example
//!
//! ```no_run
//! use waypoint_core_resilience::{BatchLoader, BatchConfig, ResilienceError};
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let loader = BatchLoader::new(BatchConfig::default(), |ids: Vec<u32>| async move {
//!     Ok::<_, ResilienceError>(ids.iter().map(|id| format!("hotel-{id}")).collect())
//! });
//!
//! let (a, b) = tokio::join!(loader.load(1), loader.load(2));
//! assert_eq!(a?, "hotel-1");
//! assert_eq!(b?, "hotel-2");
//! # Ok(())
//! # }
//! ```

use super::error::ResilienceError;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Flush thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush as soon as this many keys are buffered
    pub batch_size: usize,
    /// Flush this long after the first key was buffered
    #[serde(with = "crate::serde_millis")]
    pub batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay: Duration::from_millis(10),
        }
    }
}

type BatchFn<K, V> = dyn Fn(Vec<K>) -> BoxFuture<'static, Result<Vec<V>, ResilienceError>> + Send + Sync;
type Waiter<V> = oneshot::Sender<Result<V, ResilienceError>>;

struct Buffer<K, V> {
    keys: Vec<K>,
    waiters: Vec<Waiter<V>>,
    /// Bumped on every flush so a stale delay timer does not flush a newer batch
    generation: u64,
}

struct LoaderInner<K, V> {
    config: BatchConfig,
    batch_fn: Box<BatchFn<K, V>>,
    buffer: Mutex<Buffer<K, V>>,
}

/// Coalesces keyed requests into batched calls.
///
/// Cloning is cheap and clones share the same buffer.
pub struct BatchLoader<K, V> {
    inner: Arc<LoaderInner<K, V>>,
}

impl<K, V> Clone for BatchLoader<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> BatchLoader<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    /// Create a loader around `batch_fn`, which must return one value per key
    /// in the same order.
    pub fn new<F, Fut>(config: BatchConfig, batch_fn: F) -> Self
    where
        F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<V>, ResilienceError>> + Send + 'static,
    {
        let config = BatchConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            inner: Arc::new(LoaderInner {
                config,
                batch_fn: Box::new(move |keys: Vec<K>| batch_fn(keys).boxed()),
                buffer: Mutex::new(Buffer {
                    keys: Vec::new(),
                    waiters: Vec::new(),
                    generation: 0,
                }),
            }),
        }
    }

    /// Buffer `key` and return a future resolving to its value.
    pub fn load(&self, key: K) -> impl Future<Output = Result<V, ResilienceError>> {
        let (tx, rx) = oneshot::channel();

        let action = {
            let mut buffer = self.inner.buffer.lock();
            buffer.keys.push(key);
            buffer.waiters.push(tx);

            if buffer.keys.len() >= self.inner.config.batch_size {
                Some(Flush::Now(Self::take(&mut buffer)))
            } else if buffer.keys.len() == 1 {
                Some(Flush::After(buffer.generation))
            } else {
                None
            }
        };

        // Outside a runtime the flush starts when the returned future is first polled
        let deferred = match action {
            Some(action) if tokio::runtime::Handle::try_current().is_ok() => {
                self.start(action);
                None
            }
            action => action,
        };

        let loader = self.clone();
        async move {
            if let Some(action) = deferred {
                loader.start(action);
            }
            rx.await.unwrap_or(Err(ResilienceError::Cancelled))
        }
    }

    fn start(&self, action: Flush<K, V>) {
        match action {
            Flush::Now((keys, waiters)) => self.spawn_batch(keys, waiters),
            Flush::After(generation) => self.spawn_timer(generation),
        }
    }

    /// Keys buffered and not yet flushed
    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().keys.len()
    }

    fn take(buffer: &mut Buffer<K, V>) -> (Vec<K>, Vec<Waiter<V>>) {
        buffer.generation += 1;
        (mem::take(&mut buffer.keys), mem::take(&mut buffer.waiters))
    }

    fn spawn_timer(&self, generation: u64) {
        let loader = self.clone();
        let delay = self.inner.config.batch_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let taken = {
                let mut buffer = loader.inner.buffer.lock();
                if buffer.generation != generation || buffer.keys.is_empty() {
                    return;
                }
                Self::take(&mut buffer)
            };
            let (keys, waiters) = taken;
            loader.run_batch(keys, waiters).await;
        });
    }

    fn spawn_batch(&self, keys: Vec<K>, waiters: Vec<Waiter<V>>) {
        let loader = self.clone();
        tokio::spawn(async move {
            loader.run_batch(keys, waiters).await;
        });
    }

    async fn run_batch(&self, keys: Vec<K>, waiters: Vec<Waiter<V>>) {
        let expected = keys.len();
        debug!(size = expected, "Flushing batch");

        match (self.inner.batch_fn)(keys).await {
            Ok(values) if values.len() == expected => {
                for (waiter, value) in waiters.into_iter().zip(values) {
                    let _ = waiter.send(Ok(value));
                }
            }
            Ok(values) => {
                let err = ResilienceError::BatchMismatch {
                    expected,
                    actual: values.len(),
                };
                warn!(error = %err, "Batch result count mismatch");
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
            Err(err) => {
                warn!(size = expected, error = %err, "Batch call failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }
}

enum Flush<K, V> {
    Now((Vec<K>, Vec<Waiter<V>>)),
    After(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording_loader(
        config: BatchConfig,
    ) -> (BatchLoader<u32, String>, Arc<Mutex<Vec<Vec<u32>>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let loader = BatchLoader::new(config, move |keys: Vec<u32>| {
            recorded.lock().push(keys.clone());
            async move { Ok(keys.iter().map(|k| format!("hotel-{k}")).collect()) }
        });
        (loader, calls)
    }

    #[test]
    fn test_loaded_outside_runtime_flushes_when_awaited() {
        let (loader, calls) = recording_loader(BatchConfig {
            batch_size: 2,
            ..Default::default()
        });
        let first = loader.load(1);
        let second = loader.load(2);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (first, second) = runtime.block_on(async { tokio::join!(first, second) });

        assert_eq!(first.unwrap(), "hotel-1");
        assert_eq!(second.unwrap(), "hotel-2");
        assert_eq!(*calls.lock(), vec![vec![1, 2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_size() {
        let (loader, calls) = recording_loader(BatchConfig {
            batch_size: 3,
            batch_delay: Duration::from_secs(60),
        });

        let (a, b, c) = tokio::join!(loader.load(1), loader.load(2), loader.load(3));

        assert_eq!(a.unwrap(), "hotel-1");
        assert_eq!(b.unwrap(), "hotel-2");
        assert_eq!(c.unwrap(), "hotel-3");
        assert_eq!(*calls.lock(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_delay() {
        let (loader, calls) = recording_loader(BatchConfig {
            batch_size: 10,
            batch_delay: Duration::from_millis(10),
        });

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(loader.load(7), loader.load(8));

        assert_eq!(a.unwrap(), "hotel-7");
        assert_eq!(b.unwrap(), "hotel-8");
        assert_eq!(start.elapsed(), Duration::from_millis(10));
        assert_eq!(*calls.lock(), vec![vec![7, 8]]);
        assert_eq!(loader.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_starts_new_batch() {
        let (loader, calls) = recording_loader(BatchConfig {
            batch_size: 2,
            batch_delay: Duration::from_millis(10),
        });

        let results =
            futures::future::join_all((1..=5).map(|k| loader.load(k)).collect::<Vec<_>>()).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(*calls.lock(), vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rejects_whole_batch() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = invocations.clone();
        let loader: BatchLoader<u32, String> = BatchLoader::new(
            BatchConfig {
                batch_size: 2,
                batch_delay: Duration::from_millis(5),
            },
            move |_keys| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ResilienceError::from_status(503, "maintenance")) }
            },
        );

        let (a, b) = tokio::join!(loader.load(1), loader.load(2));
        assert!(matches!(a, Err(ResilienceError::Server { status: 503, .. })));
        assert!(matches!(b, Err(ResilienceError::Server { status: 503, .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_result_is_reported() {
        let loader: BatchLoader<u32, u32> = BatchLoader::new(
            BatchConfig {
                batch_size: 2,
                batch_delay: Duration::from_millis(5),
            },
            |_keys| async { Ok(vec![1]) },
        );

        let (a, b) = tokio::join!(loader.load(1), loader.load(2));
        assert_eq!(
            a.unwrap_err(),
            ResilienceError::BatchMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert!(b.is_err());
    }
}
