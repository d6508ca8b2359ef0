use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

/// Key-addressed memoization with a caller-specified TTL. A broken cache
/// must degrade to recomputation, never to a failed query, so
/// implementations swallow their own transport errors.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn put(&self, key: &str, value: String, ttl: Duration);
}

pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Cache read failed for {}: {}", key, err);
                None
            }
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        let mut conn = self.conn.clone();
        let ttl_seconds = ttl.as_secs().max(1);
        if let Err(err) = conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await {
            warn!("Cache write failed for {}: {}", key, err);
        }
    }
}

/// In-process cache for tests and cache-less deployments. Expired entries
/// are dropped on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires)) if Instant::now() < *expires => {
                    return Some(value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.entries.write().await.remove(key);
        None
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        let expires = Instant::now() + ttl;
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value, expires));
    }
}
