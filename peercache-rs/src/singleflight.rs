//! Coalesces concurrent computations for the same key.
//!
//! If many callers ask for the same missing key at once, only the first one (the **leader**)
//! actually performs the computation. All others join the call which is already in flight and
//! receive a clone of the very same result, be it a value or an error.
//!
//! The leader registers a shared future which is completed using a **oneshot** channel. As soon
//! as the computation is done, the result is sent to all waiters and the key is deregistered.
//! Therefore this is not a cache, a caller which arrives after the computation has completed
//! triggers a new one.
//!
//! If the leader is dropped (cancelled) before completing, the key is deregistered as well and
//! all waiters receive an error created from [Cancelled](Cancelled).
//!
//! # Examples
//! ```
//! # use peercache::singleflight::{SingleFlight, Cancelled};
//! # #[derive(Clone, Debug)]
//! # struct MyError;
//! # impl From<Cancelled> for MyError { fn from(_: Cancelled) -> Self { MyError } }
//! # #[tokio::main]
//! # async fn main() {
//! let flight: SingleFlight<String, String, MyError> = SingleFlight::new();
//!
//! let result = flight
//!     .call("Tom".to_owned(), || async { Ok("630".to_owned()) })
//!     .await;
//! assert_eq!(result.unwrap(), "630");
//! assert_eq!(flight.in_flight(), 0);
//! # }
//! ```
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

type SharedCall<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

/// Signals that the leader of a call was dropped before it could complete.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cancelled;

impl Display for Cancelled {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "The in-flight computation was cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Keeps track of all computations currently in flight.
pub struct SingleFlight<K, V, E> {
    calls: Mutex<HashMap<K, SharedCall<V, E>>>,
}

enum Registration<V, E> {
    Lead(oneshot::Sender<Result<V, E>>),
    Join(SharedCall<V, E>),
}

/// Deregisters the key of the leader, even if its future is dropped midway.
struct CallGuard<'a, K: Eq + Hash, V, E> {
    flight: &'a SingleFlight<K, V, E>,
    key: &'a K,
}

impl<'a, K: Eq + Hash, V, E> Drop for CallGuard<'a, K, V, E> {
    fn drop(&mut self) {
        let _ = self
            .flight
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<Cancelled> + 'static,
{
    /// Creates a new instance without any calls in flight.
    pub fn new() -> Self {
        SingleFlight {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes the given computation for the given key unless one is already in flight.
    ///
    /// If another caller is already computing a result for this key, the given **compute** is
    /// dropped without being invoked and the result of the other computation is returned.
    pub async fn call<F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let registration = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(call) = calls.get(&key).cloned() {
                Registration::Join(call)
            } else {
                let (sender, receiver) = oneshot::channel::<Result<V, E>>();
                let call: SharedCall<V, E> = async move {
                    receiver
                        .await
                        .unwrap_or_else(|_| Err(E::from(Cancelled)))
                }
                .boxed()
                .shared();
                let _ = calls.insert(key.clone(), call);

                Registration::Lead(sender)
            }
        };

        match registration {
            Registration::Join(call) => call.await,
            Registration::Lead(sender) => {
                let guard = CallGuard {
                    flight: self,
                    key: &key,
                };

                let result = compute().await;
                let _ = sender.send(result.clone());
                std::mem::drop(guard);

                result
            }
        }
    }

    /// Returns the number of keys for which a computation is currently running.
    pub fn in_flight(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<Cancelled> + 'static,
{
    fn default() -> Self {
        SingleFlight::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::singleflight::{Cancelled, SingleFlight};
    use crate::testing::test_async;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Clone, Debug, PartialEq)]
    enum TestError {
        Failed(String),
        Cancelled,
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    #[test]
    fn concurrent_calls_are_coalesced() {
        test_async(async {
            let flight: SingleFlight<String, String, TestError> = SingleFlight::new();
            let invocations = Arc::new(AtomicUsize::new(0));

            let compute = || {
                let invocations = invocations.clone();
                async move {
                    let _ = invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok("630".to_owned())
                }
            };

            // Start 10 calls at once. The first one performs the computation, all others join...
            let results = futures::future::join_all(
                (0..10).map(|_| flight.call("Tom".to_owned(), compute)),
            )
            .await;

            assert_eq!(invocations.load(Ordering::SeqCst), 1);
            for result in results {
                assert_eq!(result.unwrap(), "630");
            }

            // The key has been deregistered, therefore a later call computes again...
            assert_eq!(flight.in_flight(), 0);
            assert_eq!(
                flight.call("Tom".to_owned(), compute).await.unwrap(),
                "630"
            );
            assert_eq!(invocations.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn different_keys_are_computed_independently() {
        test_async(async {
            let flight: SingleFlight<String, String, TestError> = SingleFlight::new();

            let (tom, jack) = futures::join!(
                flight.call("Tom".to_owned(), || async { Ok("630".to_owned()) }),
                flight.call("Jack".to_owned(), || async { Ok("589".to_owned()) })
            );

            assert_eq!(tom.unwrap(), "630");
            assert_eq!(jack.unwrap(), "589");
        });
    }

    #[test]
    fn all_waiters_observe_the_same_error() {
        test_async(async {
            let flight: SingleFlight<String, String, TestError> = SingleFlight::new();
            let compute = || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(TestError::Failed("database down".to_owned()))
            };

            let results = futures::future::join_all(
                (0..5).map(|_| flight.call("Sam".to_owned(), compute)),
            )
            .await;

            for result in results {
                assert_eq!(
                    result.unwrap_err(),
                    TestError::Failed("database down".to_owned())
                );
            }
            assert_eq!(flight.in_flight(), 0);
        });
    }

    #[test]
    fn waiters_are_released_if_the_leader_is_dropped() {
        test_async(async {
            let flight: SingleFlight<String, String, TestError> = SingleFlight::new();

            let leader = flight.call("Tom".to_owned(), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("630".to_owned())
            });
            let waiter = flight.call("Tom".to_owned(), || async { Ok("never".to_owned()) });

            // The leader registers first and is dropped once its timeout elapses. The waiter
            // joined its call and is therefore released with an error...
            let (leader_result, waiter_result) = futures::join!(
                tokio::time::timeout(Duration::from_millis(10), leader),
                waiter
            );

            assert!(leader_result.is_err());
            assert_eq!(waiter_result.unwrap_err(), TestError::Cancelled);
            assert_eq!(flight.in_flight(), 0);
        });
    }
}
