//! Single-flight registry: at most one in-flight call per key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};

use crate::retry::TaskError;
use crate::util::lock;

/// A call that may be awaited by any number of callers; all get the same result.
pub type SharedCall<V> = Shared<BoxFuture<'static, Result<V, TaskError>>>;

struct Flight<V: Clone> {
    id: u64,
    /// Weak so that a call nobody awaits any more is dropped, not kept alive here.
    call: WeakShared<BoxFuture<'static, Result<V, TaskError>>>,
}

/// Registry of in-flight calls keyed by request identity.
///
/// The registration is removed as soon as the call settles, success or error,
/// so a later call with the same key starts a fresh window. A call abandoned by
/// every waiter before settling is aborted, and the next caller starts over.
pub struct FlightRegistry<V: Clone> {
    flights: Arc<Mutex<HashMap<String, Flight<V>>>>,
    next_id: AtomicU64,
}

impl<V> Default for FlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Join the in-flight call for `key`, or start one with `factory`.
    ///
    /// `factory` runs at most once per window and must not call back into the
    /// same registry.
    pub fn join_or_start<F, Fut>(&self, key: &str, factory: F) -> SharedCall<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, TaskError>> + Send + 'static,
    {
        let mut flights = lock(&self.flights);
        if let Some(call) = flights.get(key).and_then(|f| f.call.upgrade()) {
            tracing::debug!(key, "joining in-flight request");
            return call;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.flights);
        let owned_key = key.to_string();
        let inner = factory();
        let call = async move {
            let result = inner.await;
            let mut flights = lock(&registry);
            // Only drop our own registration; a newer window may own the key.
            if flights.get(&owned_key).map(|f| f.id) == Some(id) {
                flights.remove(&owned_key);
            }
            result
        }
        .boxed()
        .shared();

        if let Some(weak) = call.downgrade() {
            flights.insert(key.to_string(), Flight { id, call: weak });
        }
        call
    }

    /// Number of keys with a call in flight.
    pub fn len(&self) -> usize {
        let mut flights = lock(&self.flights);
        flights.retain(|_, f| f.call.upgrade().is_some());
        flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.flights)
            .get(key)
            .is_some_and(|f| f.call.upgrade().is_some())
    }
}
