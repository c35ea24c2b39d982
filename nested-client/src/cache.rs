use std::{fmt::Debug, hash::Hash, sync::Arc, time::Duration};

use futures03::Future;
use metrics::counter;
use mini_moka::sync::Cache;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{instrument, trace, Level};

/// A cache slot. The value sits behind an async mutex so that callers arriving while the value is
/// being fetched wait for the in-flight request instead of issuing their own.
struct Slot<V> {
    value: Mutex<Option<V>>,
}

impl<V> Slot<V> {
    /// Creates an empty slot, used to signal that a request is in flight.
    fn placeholder() -> Self {
        Self { value: Mutex::new(None) }
    }

    fn update(&self, new_value: V, mut guard: MutexGuard<'_, Option<V>>) {
        *guard = Some(new_value);
    }
}

/// A get-or-populate cache shared by every order of a session.
///
/// Concurrent requests for the same key share a single call to the producer. If the producer
/// fails, the entry is evicted so that a later request can retry.
pub struct SharedCache<K, V> {
    name: String,
    cache: Cache<K, Arc<Slot<V>>>,
}

impl<K, V> SharedCache<K, V>
where
    K: Clone + Hash + Eq + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &str, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { name: name.to_string(), cache }
    }

    #[instrument(
        name = "cache.get",
        level = Level::TRACE,
        fields(miss, resource = self.name),
        skip(self, producer))
    ]
    pub async fn get_or_populate<E, Fut, F>(&self, key: K, producer: F) -> Result<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send,
        F: FnOnce(K) -> Fut + Send,
    {
        if let Some(slot) = self.cache.get(&key) {
            // The slot is either filled or being filled. An empty slot after the lock means the
            // in-flight producer failed: behave as a miss.
            if let Some(value) = slot.value.lock().await.clone() {
                tracing::Span::current().record("miss", false);
                trace!("CacheHit");
                counter!("cache_hits", "cache" => self.name.clone()).increment(1);
                return Ok(value);
            }
        }

        tracing::Span::current().record("miss", true);
        trace!("CacheMiss");
        counter!("cache_misses", "cache" => self.name.clone()).increment(1);

        let slot = Arc::new(Slot::placeholder());
        let guard = slot.value.lock().await;
        self.cache
            .insert(key.clone(), slot.clone());
        trace!("SavedPlaceholder");

        let value = producer(key.clone())
            .await
            .inspect_err(|_| {
                self.cache.invalidate(&key);
                trace!("ProducerFailure");
            })?;

        slot.update(value.clone(), guard);
        Ok(value)
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use futures03::future::{join_all, try_join_all};

    use super::*;

    fn cache() -> SharedCache<String, u8> {
        SharedCache::new("test", 100, Duration::from_secs(3600))
    }

    async fn count_and_return(counter: Arc<AtomicU32>, value: u8) -> Result<u8, String> {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(value)
    }

    #[test_log::test(tokio::test)]
    async fn test_sequential_access() {
        let counter = Arc::new(AtomicU32::new(0));
        let cache = cache();

        for _ in 0..2 {
            let value = cache
                .get_or_populate("k0".to_string(), |_| count_and_return(counter.clone(), 6))
                .await
                .unwrap();
            assert_eq!(value, 6);
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_parallel_access_shares_in_flight_request() {
        let counter = Arc::new(AtomicU32::new(0));
        let cache = cache();
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                cache.get_or_populate("k0".to_string(), |_| count_and_return(counter.clone(), 18))
            })
            .collect();

        let values = try_join_all(tasks)
            .await
            .expect("a task failed");

        assert!(values.iter().all(|v| *v == 18));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_failure_evicts_entry() {
        let counter = Arc::new(AtomicU32::new(0));
        let cache = cache();

        let first = cache
            .get_or_populate("k0".to_string(), |_| async {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<u8, _>("network down".to_string())
            })
            .await;
        assert_eq!(first, Err("network down".to_string()));

        let second = cache
            .get_or_populate("k0".to_string(), |_| count_and_return(counter.clone(), 8))
            .await;

        assert_eq!(second, Ok(8));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_waiters_retry_after_failed_in_flight_request() {
        let counter = Arc::new(AtomicU32::new(0));
        let cache = cache();

        let failing = cache.get_or_populate("k0".to_string(), |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u8, _>("boom".to_string())
            }
        });
        let waiting = async {
            // let the failing request install its placeholder first
            tokio::task::yield_now().await;
            cache
                .get_or_populate("k0".to_string(), |_| count_and_return(counter.clone(), 9))
                .await
        };

        let results = join_all(vec![
            Box::pin(failing) as std::pin::Pin<Box<dyn Future<Output = Result<u8, String>> + Send>>,
            Box::pin(waiting),
        ])
        .await;

        assert_eq!(results[0], Err("boom".to_string()));
        assert_eq!(results[1], Ok(9));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_distinct_keys_are_fetched_separately() {
        let counter = Arc::new(AtomicU32::new(0));
        let cache = cache();

        let a = cache
            .get_or_populate("a".to_string(), |_| count_and_return(counter.clone(), 6))
            .await;
        let b = cache
            .get_or_populate("b".to_string(), |_| count_and_return(counter.clone(), 18))
            .await;

        assert_eq!((a, b), (Ok(6), Ok(18)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
