//! Cache backed by a shared key-value store such as Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::{CACHE_KEY_PREFIX, CACHE_KEY_VERSION, CacheStats, EmbeddingCache, cache_key, model_prefix};
use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::types::EmbeddingType;

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Minimal string key-value operations a remote cache needs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Values for `keys`, in the same order.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Store `value`, expiring natively after `ttl` when given.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// All keys matching a glob `pattern`.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    /// Delete `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;
}

fn cache_err(err: redis::RedisError) -> EmbeddingError {
    EmbeddingError::Cache(err.to_string())
}

/// [`KeyValueStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://localhost:6379/0`) and check the
    /// server answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(cache_err)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(cache_err)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        info!("Connected to Redis embedding cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(cache_err)?;
        Ok(())
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(cache_err)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: usize = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(cache_err)?;
        Ok(removed)
    }
}

/// Cache on a shared key-value store. Vectors are stored as JSON arrays and
/// expiry is left to the store.
pub struct RemoteCache<S> {
    store: S,
    default_ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: KeyValueStore> RemoteCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            default_ttl: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Expiry applied when `put` is called without a TTL.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn decode(key: &str, raw: &str) -> Result<Embedding> {
        serde_json::from_str(raw)
            .map_err(|e| EmbeddingError::Cache(format!("corrupt cache entry {key}: {e}")))
    }

    fn record(&self, hits: usize, misses: usize) {
        self.hits.fetch_add(hits as u64, Ordering::Relaxed);
        self.misses.fetch_add(misses as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl<S: KeyValueStore> EmbeddingCache for RemoteCache<S> {
    async fn get(
        &self,
        text: &str,
        embedding_type: EmbeddingType,
        model: &str,
    ) -> Result<Option<Embedding>> {
        let key = cache_key(text, embedding_type, model);
        match self.store.get(&key).await? {
            Some(raw) => {
                let embedding = Self::decode(&key, &raw)?;
                self.record(1, 0);
                Ok(Some(embedding))
            }
            None => {
                self.record(0, 1);
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        text: &str,
        embedding: &[f32],
        embedding_type: EmbeddingType,
        model: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::Cache(format!(
                "refusing to cache a non-finite embedding for model {model}"
            )));
        }
        let key = cache_key(text, embedding_type, model);
        let value = serde_json::to_string(embedding)
            .map_err(|e| EmbeddingError::Cache(format!("failed to encode embedding: {e}")))?;
        self.store
            .set(&key, value, ttl.or(self.default_ttl))
            .await
    }

    async fn get_batch(
        &self,
        texts: &[String],
        embedding_type: EmbeddingType,
        model: &str,
    ) -> Result<HashMap<String, Embedding>> {
        let keys: Vec<String> = texts
            .iter()
            .map(|t| cache_key(t, embedding_type, model))
            .collect();
        let values = self.store.mget(&keys).await?;

        let mut found = HashMap::new();
        for ((text, key), raw) in texts.iter().zip(&keys).zip(values) {
            if let Some(raw) = raw {
                found.insert(text.clone(), Self::decode(key, &raw)?);
            }
        }
        self.record(found.len(), texts.len().saturating_sub(found.len()));
        debug!("Remote cache batch: {}/{} hits", found.len(), texts.len());
        Ok(found)
    }

    async fn clear(&self, model: Option<&str>) -> Result<usize> {
        let pattern = match model {
            Some(model) => format!("{}*", model_prefix(model)),
            None => format!("{CACHE_KEY_PREFIX}:{CACHE_KEY_VERSION}:*"),
        };
        let keys = self.store.scan(&pattern).await?;
        let removed = self.store.delete(&keys).await?;
        info!("Cleared {removed} cached embedding(s) matching {pattern}");
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    /// In-process stand-in for Redis. Patterns support a trailing `*` only.
    #[derive(Default)]
    struct FakeStore {
        values: Mutex<HashMap<String, (String, Option<Duration>)>>,
        fail: bool,
    }

    impl FakeStore {
        fn check(&self) -> Result<()> {
            if self.fail {
                Err(EmbeddingError::Cache("connection refused".to_string()))
            } else {
                Ok(())
            }
        }

        fn ttl_of(&self, key: &str) -> Option<Duration> {
            self.values.lock().unwrap().get(key).and_then(|(_, ttl)| *ttl)
        }
    }

    #[async_trait]
    impl KeyValueStore for FakeStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.check()?;
            Ok(self.values.lock().unwrap().get(key).map(|(v, _)| v.clone()))
        }

        async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
            self.check()?;
            let values = self.values.lock().unwrap();
            Ok(keys
                .iter()
                .map(|k| values.get(k).map(|(v, _)| v.clone()))
                .collect())
        }

        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
            self.check()?;
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), (value, ttl));
            Ok(())
        }

        async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
            self.check()?;
            let prefix = pattern.trim_end_matches('*');
            Ok(self
                .values
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn delete(&self, keys: &[String]) -> Result<usize> {
            self.check()?;
            let mut values = self.values.lock().unwrap();
            Ok(keys.iter().filter(|k| values.remove(*k).is_some()).count())
        }
    }

    #[tokio::test]
    async fn test_round_trip_json() {
        let cache = RemoteCache::new(FakeStore::default());
        cache
            .put("a", &[0.5, -0.25], EmbeddingType::Code, "m", None)
            .await
            .unwrap();

        assert_eq!(
            cache.get("a", EmbeddingType::Code, "m").await.unwrap(),
            Some(vec![0.5, -0.25])
        );
        let key = cache_key("a", EmbeddingType::Code, "m");
        let stored = cache.store().values.lock().unwrap()[&key].0.clone();
        assert_eq!(stored, "[0.5,-0.25]");
    }

    #[tokio::test]
    async fn test_ttl_passed_to_store() {
        let cache = RemoteCache::new(FakeStore::default())
            .with_default_ttl(Some(Duration::from_secs(3600)));
        cache
            .put("a", &[1.0], EmbeddingType::Code, "m", None)
            .await
            .unwrap();
        cache
            .put("b", &[1.0], EmbeddingType::Code, "m", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let store = cache.store();
        assert_eq!(
            store.ttl_of(&cache_key("a", EmbeddingType::Code, "m")),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            store.ttl_of(&cache_key("b", EmbeddingType::Code, "m")),
            Some(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_batch_and_stats() {
        let cache = RemoteCache::new(FakeStore::default());
        cache
            .put("a", &[1.0], EmbeddingType::Query, "m", None)
            .await
            .unwrap();

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let found = cache
            .get_batch(&texts, EmbeddingType::Query, "m")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], vec![1.0]);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 2, None));
    }

    #[tokio::test]
    async fn test_clear_scoped_to_model() {
        let cache = RemoteCache::new(FakeStore::default());
        for model in ["org/model-a", "model-b"] {
            cache
                .put("x", &[1.0], EmbeddingType::Code, model, None)
                .await
                .unwrap();
        }

        assert_eq!(cache.clear(Some("org/model-a")).await.unwrap(), 1);
        assert!(
            cache
                .get("x", EmbeddingType::Code, "model-b")
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(cache.clear(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_ignores_models_sharing_a_prefix() {
        let cache = RemoteCache::new(FakeStore::default());
        for model in ["nomic", "nomic:latest", "nomic*"] {
            cache
                .put("x", &[1.0], EmbeddingType::Code, model, None)
                .await
                .unwrap();
        }

        assert_eq!(cache.clear(Some("nomic")).await.unwrap(), 1);
        assert_eq!(cache.clear(Some("nomic*")).await.unwrap(), 1);
        assert_eq!(
            cache
                .get("x", EmbeddingType::Code, "nomic:latest")
                .await
                .unwrap(),
            Some(vec![1.0])
        );
    }

    #[tokio::test]
    async fn test_non_finite_values_are_not_cached() {
        let cache = RemoteCache::new(FakeStore::default());
        let err = cache
            .put("a", &[1.0, f32::NAN], EmbeddingType::Code, "m", None)
            .await
            .unwrap_err();

        assert!(matches!(err, EmbeddingError::Cache(_)));
        assert!(cache.store().values.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_surface_as_cache_errors() {
        let cache = RemoteCache::new(FakeStore {
            fail: true,
            ..Default::default()
        });
        assert!(matches!(
            cache.get("a", EmbeddingType::Code, "m").await,
            Err(EmbeddingError::Cache(_))
        ));
        assert!(matches!(
            cache.clear(None).await,
            Err(EmbeddingError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_cache_error() {
        let store = FakeStore::default();
        store
            .set(
                &cache_key("a", EmbeddingType::Code, "m"),
                "not json".to_string(),
                None,
            )
            .await
            .unwrap();
        let cache = RemoteCache::new(store);
        assert!(matches!(
            cache.get("a", EmbeddingType::Code, "m").await,
            Err(EmbeddingError::Cache(_))
        ));
    }
}
