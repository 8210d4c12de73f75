//! Suppresses duplicate concurrent executions of the same keyed operation.
//!
//! When many tasks miss the cache for the same key at the same time, only one of them should
//! actually hit the origin (or a peer). [SingleFlight] guarantees exactly that: among all calls
//! for one key which overlap in time, a single operation runs and its outcome is published to
//! every caller - including callers which join after the operation has started but before it
//! has finished. Once the outcome has been published, the next call for the same key starts a
//! fresh execution.
//!
//! There is deliberately no way to abandon a pending call. A caller which no longer cares
//! simply awaits the shared outcome and discards it; anything else would compromise the
//! at-most-one guarantee.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::watch;

/// The role a caller ends up with after the map lookup.
enum Role<T> {
    /// This caller won the race and executes the operation.
    Execute(watch::Sender<Option<T>>),
    /// Another caller is already executing; await its published outcome.
    Wait(watch::Receiver<Option<T>>),
}

/// Coalesces concurrent calls per key into a single execution.
///
/// The internal mutex only guards the call map and is never held while an operation runs.
/// Duplicate callers block on the per-call channel instead, so operations for distinct keys
/// proceed fully in parallel.
pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T: Clone> SingleFlight<T> {
    /// Creates a new, empty flight group.
    pub fn new() -> Self {
        SingleFlight {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `operation` for the given key, unless a call for this key is already in flight,
    /// in which case its outcome is awaited and returned instead.
    ///
    /// The operation is only invoked by the caller winning the race; all others receive a
    /// clone of the winner's result. Note that errors are outcomes too: a failed operation is
    /// published to every waiter verbatim, and the key is released either way so that a later
    /// call can retry.
    pub async fn execute<F, Fut>(&self, key: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut operation = Some(operation);

        loop {
            let role = {
                let mut calls = self.calls.lock().unwrap();
                match calls.get(key) {
                    Some(receiver) => Role::Wait(receiver.clone()),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        let _ = calls.insert(key.to_owned(), receiver);
                        Role::Execute(sender)
                    }
                }
            };

            match role {
                Role::Execute(sender) => {
                    let operation = match operation.take() {
                        Some(operation) => operation,
                        None => unreachable!("A single-flight caller can win the race at most once!"),
                    };

                    let result = operation().await;

                    // Publish before releasing the key, so that every caller which joined
                    // while the operation was running observes this outcome rather than
                    // starting a second execution.
                    let _ = sender.send(Some(result.clone()));
                    let _ = self.calls.lock().unwrap().remove(key);

                    return result;
                }
                Role::Wait(mut receiver) => {
                    loop {
                        let published = receiver.borrow_and_update().clone();
                        if let Some(result) = published {
                            return result;
                        }

                        if receiver.changed().await.is_err() {
                            // The executing future was dropped before publishing. Clean up
                            // the dead entry (unless a newer call replaced it already) and
                            // restart the race.
                            let mut calls = self.calls.lock().unwrap();
                            let stale = calls
                                .get(key)
                                .map(|current| current.same_channel(&receiver))
                                .unwrap_or(false);
                            if stale {
                                let _ = calls.remove(key);
                            }
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::CacheError;
    use crate::singleflight::SingleFlight;

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_execution() {
        let flight = Arc::new(SingleFlight::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let flight = flight.clone();
            let executions = executions.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .execute("x", || async move {
                        let _ = executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        "result".to_owned()
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), "result");
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_calls_execute_again() {
        let flight: SingleFlight<usize> = SingleFlight::new();
        let executions = AtomicUsize::new(0);

        for expected in 1..=3 {
            let result = flight
                .execute("x", || async {
                    executions.fetch_add(1, Ordering::SeqCst) + 1
                })
                .await;
            assert_eq!(result, expected);
        }

        assert_eq!(executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_do_not_serialize() {
        let flight = Arc::new(SingleFlight::new());

        let slow_flight = flight.clone();
        let slow = tokio::spawn(async move {
            slow_flight
                .execute("slow", || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    "slow".to_owned()
                })
                .await
        });

        // A different key must complete even though "slow" runs for an hour...
        let result = flight.execute("fast", || async { "fast".to_owned() }).await;
        assert_eq!(result, "fast");

        slow.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_published_to_all_waiters() {
        let flight: Arc<SingleFlight<Result<String, CacheError>>> = Arc::new(SingleFlight::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let flight = flight.clone();
            let executions = executions.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .execute("broken", || async move {
                        let _ = executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(CacheError::Configuration("origin is down".to_owned()))
                    })
                    .await
            }));
        }

        for task in tasks {
            let error = task.await.unwrap().unwrap_err();
            assert_eq!(error.to_string().contains("origin is down"), true);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        // The failure also released the key, so the next call runs again...
        let result: Result<String, CacheError> = flight
            .execute("broken", || async { Ok("recovered".to_owned()) })
            .await;
        assert_eq!(result.unwrap(), "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn a_dropped_execution_releases_the_key() {
        let flight: Arc<SingleFlight<String>> = Arc::new(SingleFlight::new());

        let winner_flight = flight.clone();
        let winner = tokio::spawn(async move {
            winner_flight
                .execute("x", || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    "never".to_owned()
                })
                .await
        });

        // Let the winner start executing, then kill it mid-flight...
        tokio::task::yield_now().await;
        winner.abort();
        let _ = winner.await;

        // ...a follow-up call must not hang on the dead execution.
        let result = flight.execute("x", || async { "fresh".to_owned() }).await;
        assert_eq!(result, "fresh");
    }
}
