//! Provides a mechanism to suppress duplicate concurrent computations.
//!
//! A [FlightGroup](FlightGroup) ensures that for a given key, at most one computation is in
//! flight at any time. The first caller for a key (the leader) runs the computation, all callers
//! which arrive for the same key while it is running simply wait for its result. Once the
//! computation is done, every waiting caller receives a clone of the very same result.
//!
//! Note that results are never kept around. As soon as the computation has completed, the key
//! is released so that the next caller starts a fresh computation. Therefore a failed
//! computation is never served twice.
//!
//! The internal lock only guards the bookkeeping of in-flight keys and is never held while a
//! computation runs, so that distinct keys are processed fully in parallel.
//!
//! # Examples
//!
//! ```
//! # use peercache::singleflight::FlightGroup;
//! # use std::sync::atomic::{AtomicUsize, Ordering};
//! # #[tokio::main]
//! # async fn main() {
//! let group = FlightGroup::new();
//! let computations = AtomicUsize::new(0);
//! let counter = &computations;
//!
//! let compute = move || async move {
//!     let _ = counter.fetch_add(1, Ordering::SeqCst);
//!     tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!     42
//! };
//!
//! // Both calls arrive while the first one is still running...
//! let (first, second) = tokio::join!(group.call("x", compute), group.call("x", compute));
//!
//! // ...therefore the computation ran once and its result was shared.
//! assert_eq!(first, (42, false));
//! assert_eq!(second, (42, true));
//! assert_eq!(computations.load(Ordering::SeqCst), 1);
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

/// Keeps track of all computations which are currently in flight.
///
/// Each [Group](crate::group::Group) owns its own flight group so that equal keys of distinct
/// groups are never merged.
pub struct FlightGroup<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

/// Releases the key of a leader once it is done or if it has been cancelled.
///
/// If the leader is dropped before its computation completed, the sender is dropped as well,
/// which wakes up all waiting callers so that one of them can take over.
struct Flight<'a, T> {
    group: &'a FlightGroup<T>,
    key: &'a str,
}

/// Determines whether a caller runs the computation or waits for another caller to do so.
enum Role<T> {
    Leader(watch::Sender<Option<T>>),
    Follower(watch::Receiver<Option<T>>),
}

impl<T> Drop for Flight<'_, T> {
    fn drop(&mut self) {
        let _ = self.group.lock().remove(self.key);
    }
}

impl<T> FlightGroup<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Receiver<Option<T>>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for FlightGroup<T> {
    fn default() -> Self {
        FlightGroup::new()
    }
}

impl<T: Clone> FlightGroup<T> {
    /// Creates a new and empty flight group.
    pub fn new() -> Self {
        FlightGroup {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes and returns the result of the given computation, making sure that only one
    /// computation for the given key is in flight at a time.
    ///
    /// If a computation for the key is already running, this waits for its result instead of
    /// invoking **compute**. The returned flag indicates whether the result was shared with
    /// (i.e. computed by) another caller.
    pub async fn call<F, Fut>(&self, key: &str, compute: F) -> (T, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let role = {
                let mut calls = self.lock();
                match calls.get(key) {
                    Some(receiver) => Role::Follower(receiver.clone()),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        let _ = calls.insert(key.to_owned(), receiver);
                        Role::Leader(sender)
                    }
                }
            };

            let mut receiver = match role {
                Role::Leader(sender) => return (self.lead(key, sender, compute).await, false),
                Role::Follower(receiver) => receiver,
            };

            // An error means that the leader was cancelled before it produced a result. Its
            // key is being released, so we simply try again...
            if let Ok(result) = receiver.wait_for(Option::is_some).await {
                if let Some(value) = result.as_ref() {
                    return (value.clone(), true);
                }
            }

            log::debug!(
                "The computation for '{}' was abandoned. Starting over...",
                key
            );
        }
    }

    async fn lead<F, Fut>(&self, key: &str, sender: watch::Sender<Option<T>>, compute: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let flight = Flight { group: self, key };
        let value = compute().await;

        // Release the key before publishing the result, so that any caller arriving from now on
        // starts a fresh computation. Callers already waiting still hold their receiver.
        drop(flight);
        let _ = sender.send_replace(Some(value.clone()));

        value
    }

    /// Returns the number of computations which are currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
