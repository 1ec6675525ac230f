use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

struct Entry<T> {
    id: u64,
    outcome: Shared<BoxFuture<'static, Result<T>>>,
}

/// Request coalescing: at most one execution per key is outstanding.
///
/// A caller arriving while the key is in flight awaits the same outcome
/// instead of starting a second execution. Each execution runs on its own
/// task and removes its entry when it finishes, so callers that give up
/// early neither stall it nor leave the key stuck in flight.
pub struct Coalescer<K, T> {
    inflight: Arc<Mutex<HashMap<K, Entry<T>>>>,
    next_id: AtomicU64,
}

impl<K, T> Coalescer<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs `make()` for `key`, or joins the execution already running.
    ///
    /// # Arguments
    ///
    /// * `key` - Identity of the logical request.
    /// * `make` - Builds the execution; only called when nothing is in flight.
    ///
    /// # Returns
    ///
    /// The shared outcome, or `Internal` if the execution task died.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let outcome = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&key) {
                Some(entry) => {
                    tracing::debug!("🔗 Joining in-flight request {:?}", key);
                    entry.outcome.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let execution = make();
                    let registry = Arc::clone(&self.inflight);
                    let task_key = key.clone();

                    // The entry is inserted below while this lock is still
                    // held, so the task cannot try to remove it earlier.
                    let handle = tokio::spawn(async move {
                        let result = execution.await;
                        let mut inflight = registry.lock().await;
                        if inflight.get(&task_key).is_some_and(|entry| entry.id == id) {
                            inflight.remove(&task_key);
                        }
                        result
                    });

                    let outcome = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(AppError::Internal(format!("Request task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();

                    inflight.insert(
                        key,
                        Entry {
                            id,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };

        outcome.await
    }

    #[cfg(test)]
    async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

impl<K, T> Default for Coalescer<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
