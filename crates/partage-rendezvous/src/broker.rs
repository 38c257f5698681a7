//! Correlation-id response broker

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

/// Default number of correlation ids kept in the early-arrival cache
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Channel buffer used when a collector has no threshold
pub const DEFAULT_WAITER_BUFFER: usize = 100;

struct BrokerState<K, V> {
    /// One waiter per correlation id
    waiters: HashMap<K, mpsc::Sender<V>>,
    /// Values nobody was waiting for yet
    cache: HashMap<K, Vec<V>>,
    /// Cache keys, oldest first
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BrokerState<K, V> {
    fn cache_value(&mut self, id: K, value: V, limits: CacheLimits) {
        let capacity = limits.ids;
        match self.cache.get_mut(&id) {
            Some(values) if values.len() >= limits.values_per_id => {
                tracing::trace!("rendezvous cache full for id, dropping value");
            }
            Some(values) => values.push(value),
            None => {
                self.cache.insert(id.clone(), vec![value]);
                self.order.push_back(id);
                while self.cache.len() > capacity {
                    match self.order.pop_front() {
                        Some(oldest) => {
                            self.cache.remove(&oldest);
                            tracing::trace!("rendezvous cache evicted oldest id");
                        }
                        None => break,
                    }
                }
            }
        }
    }

    fn take_cached(&mut self, id: &K) -> Vec<V> {
        match self.cache.remove(id) {
            Some(values) => {
                self.order.retain(|k| k != id);
                values
            }
            None => Vec::new(),
        }
    }
}

/// Bounds of the early-arrival cache
#[derive(Clone, Copy, Debug)]
struct CacheLimits {
    ids: usize,
    values_per_id: usize,
}

/// Hands values dispatched under a correlation id to whoever waits for it
pub struct ResponseBroker<K, V> {
    state: Arc<Mutex<BrokerState<K, V>>>,
    limits: CacheLimits,
}

impl<K, V> Clone for ResponseBroker<K, V> {
    fn clone(&self) -> Self {
        ResponseBroker {
            state: Arc::clone(&self.state),
            limits: self.limits,
        }
    }
}

impl<K, V> Default for ResponseBroker<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    fn default() -> Self {
        ResponseBroker::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl<K, V> ResponseBroker<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    /// Broker caching at most `cache_capacity` early correlation ids, each
    /// holding up to [`DEFAULT_WAITER_BUFFER`] values
    pub fn new(cache_capacity: usize) -> Self {
        ResponseBroker {
            state: Arc::new(Mutex::new(BrokerState {
                waiters: HashMap::new(),
                cache: HashMap::new(),
                order: VecDeque::new(),
            })),
            limits: CacheLimits {
                ids: cache_capacity.max(1),
                values_per_id: DEFAULT_WAITER_BUFFER,
            },
        }
    }

    /// Cap the values cached under one id; further values are dropped
    pub fn with_values_per_id(mut self, limit: usize) -> Self {
        self.limits.values_per_id = limit.max(1);
        self
    }

    /// Deliver `value` to the waiter for `id`, or cache it.
    ///
    /// Never blocks: a waiter whose buffer is full gets the value through the
    /// cache instead.
    pub fn dispatch(&self, id: K, value: V) {
        let mut state = self.state.lock();
        let value = match state.waiters.get(&id) {
            Some(tx) => match tx.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(value)) | Err(TrySendError::Closed(value)) => value,
            },
            None => value,
        };
        state.cache_value(id, value, self.limits);
    }

    /// Collect values for `id` until `threshold` arrived or `timeout` passed.
    ///
    /// `None` collects everything until the timeout. Cached values count
    /// towards the threshold.
    pub async fn collect(&self, id: K, timeout: Duration, threshold: Option<usize>) -> Vec<V> {
        let buffer = threshold.unwrap_or(DEFAULT_WAITER_BUFFER).max(1);
        self.collect_until(id, timeout, buffer, |values| {
            threshold.map_or(false, |t| values.len() >= t)
        })
        .await
    }

    /// Wait for the first value for `id`
    pub async fn collect_one(&self, id: K, timeout: Duration) -> Option<V> {
        self.collect(id, timeout, Some(1)).await.into_iter().next()
    }

    /// Collect values for `id` until `done` holds or `timeout` passed.
    ///
    /// The waiter is deregistered on return and when the future is dropped;
    /// values still buffered at that point go back to the cache.
    pub async fn collect_until<F>(&self, id: K, timeout: Duration, buffer: usize, mut done: F) -> Vec<V>
    where
        F: FnMut(&[V]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let mut collected = {
            let mut state = self.state.lock();
            state.waiters.insert(id.clone(), tx.clone());
            state.take_cached(&id)
        };
        let mut waiter = Waiter {
            broker: self,
            id,
            tx,
            rx,
        };

        while !done(&collected) {
            match tokio::time::timeout_at(deadline, waiter.rx.recv()).await {
                Ok(Some(value)) => collected.push(value),
                // Replaced by a newer waiter for the same id
                Ok(None) => break,
                Err(_) => break,
            }
        }

        collected
    }

    /// Whether a collector is currently registered for `id`
    pub fn is_waiting(&self, id: &K) -> bool {
        self.state.lock().waiters.contains_key(id)
    }

    /// Number of correlation ids in the cache
    pub fn cached_ids(&self) -> usize {
        self.state.lock().cache.len()
    }

    /// Values cached for `id`
    pub fn cached_len(&self, id: &K) -> usize {
        self.state.lock().cache.get(id).map_or(0, Vec::len)
    }
}

/// Registration of one collector, undone on drop
struct Waiter<'a, K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    broker: &'a ResponseBroker<K, V>,
    id: K,
    tx: mpsc::Sender<V>,
    rx: mpsc::Receiver<V>,
}

impl<K, V> Drop for Waiter<'_, K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Send,
{
    fn drop(&mut self) {
        let mut state = self.broker.state.lock();
        if state
            .waiters
            .get(&self.id)
            .map_or(false, |tx| tx.same_channel(&self.tx))
        {
            state.waiters.remove(&self.id);
        }
        self.rx.close();
        while let Ok(value) = self.rx.try_recv() {
            state.cache_value(self.id.clone(), value, self.broker.limits);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::Poll;

    #[tokio::test]
    async fn test_early_value_is_cached() {
        let broker: ResponseBroker<&str, u32> = ResponseBroker::new(8);
        broker.dispatch("a", 1);
        assert_eq!(broker.cached_len(&"a"), 1);

        let got = broker.collect_one("a", Duration::from_millis(10)).await;
        assert_eq!(got, Some(1));
        assert_eq!(broker.cached_ids(), 0);
    }

    #[tokio::test]
    async fn test_collect_until_threshold() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(8);
        let sender = broker.clone();
        let handle = tokio::spawn(async move {
            for i in 0..5 {
                tokio::task::yield_now().await;
                sender.dispatch(7, i);
            }
        });

        let got = broker.collect(7, Duration::from_secs(5), Some(3)).await;
        handle.await.unwrap();
        assert_eq!(got.len(), 3);
        assert!(!broker.is_waiting(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_all_until_timeout() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(8);
        broker.dispatch(1, 10);
        broker.dispatch(1, 11);
        let got = broker.collect(1, Duration::from_millis(100), None).await;
        assert_eq!(got, vec![10, 11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(8);
        broker.dispatch(1, 10);
        let got = broker.collect(1, Duration::from_millis(100), Some(2)).await;
        assert_eq!(got, vec![10]);
        assert!(!broker.is_waiting(&1));
    }

    #[tokio::test]
    async fn test_full_buffer_spills_to_cache() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(8);
        let waiter = broker.clone();
        let collector = tokio::spawn(async move {
            waiter
                .collect_until(1, Duration::from_secs(5), 1, |values| values.len() >= 1)
                .await
        });
        while !broker.is_waiting(&1) {
            tokio::task::yield_now().await;
        }
        broker.dispatch(1, 1);
        broker.dispatch(1, 2);
        broker.dispatch(1, 3);

        assert_eq!(collector.await.unwrap(), vec![1]);
        // Both later values overflowed the one-slot buffer.
        assert_eq!(broker.cached_len(&1), 2);
    }

    #[tokio::test]
    async fn test_dropped_collector_deregisters() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(8);
        let mut fut = Box::pin(broker.collect_one(3, Duration::from_secs(60)));
        // Poll once so the waiter registers, then abandon it.
        assert!(poll_once(fut.as_mut()).await.is_none());
        assert!(broker.is_waiting(&3));
        drop(fut);
        assert!(!broker.is_waiting(&3));

        broker.dispatch(3, 9);
        assert_eq!(broker.cached_len(&3), 1);
    }

    #[test]
    fn test_cache_evicts_oldest_id() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(2);
        broker.dispatch(1, 1);
        broker.dispatch(2, 2);
        broker.dispatch(2, 3);
        broker.dispatch(3, 4);
        assert_eq!(broker.cached_ids(), 2);
        assert_eq!(broker.cached_len(&1), 0);
        assert_eq!(broker.cached_len(&2), 2);
        assert_eq!(broker.cached_len(&3), 1);
    }

    #[test]
    fn test_values_per_id_are_capped() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(4).with_values_per_id(3);
        for i in 0..10 {
            broker.dispatch(1, i);
        }
        assert_eq!(broker.cached_len(&1), 3);

        let default: ResponseBroker<u64, u32> = ResponseBroker::new(4);
        for i in 0..(DEFAULT_WAITER_BUFFER as u32 + 50) {
            default.dispatch(2, i);
        }
        assert_eq!(default.cached_len(&2), DEFAULT_WAITER_BUFFER);
    }

    #[tokio::test]
    async fn test_capped_cache_keeps_earliest_values() {
        let broker: ResponseBroker<u64, u32> = ResponseBroker::new(4).with_values_per_id(2);
        for i in 0..5 {
            broker.dispatch(7, i);
        }
        let got = broker.collect(7, Duration::from_millis(10), Some(2)).await;
        assert_eq!(got, vec![0, 1]);
    }

    async fn poll_once<F: Future + Unpin>(mut fut: F) -> Option<F::Output> {
        std::future::poll_fn(|cx| {
            Poll::Ready(match Pin::new(&mut fut).poll(cx) {
                Poll::Ready(v) => Some(v),
                Poll::Pending => None,
            })
        })
        .await
    }

    proptest::proptest! {
        #[test]
        fn test_cache_stays_within_capacity(
            capacity in 1usize..8,
            ids in proptest::collection::vec(0u64..16, 0..64),
        ) {
            let broker: ResponseBroker<u64, u64> = ResponseBroker::new(capacity);
            for (n, id) in ids.iter().enumerate() {
                broker.dispatch(*id, n as u64);
                proptest::prop_assert!(broker.cached_ids() <= capacity);
            }
            // The most recent id always survives eviction.
            if let Some(last) = ids.last() {
                proptest::prop_assert!(broker.cached_len(last) >= 1);
            }
        }
    }
}
