pub mod redis_store;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Read-side capabilities of the marketplace index. The index itself is
/// populated by an external ingest process; nothing here writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Members of the sorted set `key` whose score falls in `[min, max]`.
    async fn range_by_score(&self, key: &str, min: i64, max: i64)
        -> Result<Vec<String>, StoreError>;

    /// Intersection of the named index sets.
    async fn intersect(&self, keys: &[String]) -> Result<Vec<String>, StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Pipelined `hash_get_all` over many keys. A missing key yields an
    /// empty map at its position.
    async fn hash_get_all_bulk(
        &self,
        keys: &[String],
    ) -> Result<Vec<HashMap<String, String>>, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}
