//! Redis product cache.
//!
//! Entries live under `{prefix}:{product_id}` as bincode-serialized
//! [`Product`] values with a fixed TTL. Write-through uses `SET EX`; fills
//! from the read path use `SET NX EX` so they never replace an entry. The
//! cache is never authoritative; callers treat every [`CacheError`] as a miss.

use catalog_core::product::{Product, ProductId};
use catalog_core::repository::{CacheError, ProductCache};
use futures::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Redis-backed [`ProductCache`].
#[derive(Clone)]
pub struct RedisProductCache {
    conn_manager: ConnectionManager,
    key_prefix: String,
    ttl: Duration,
}

impl RedisProductCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Connection`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn new(redis_url: &str, key_prefix: &str, ttl: Duration) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            key_prefix: key_prefix.to_string(),
            ttl,
        })
    }

    fn key(&self, id: ProductId) -> String {
        format!("{}:{id}", self.key_prefix)
    }

    fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

fn command_error(e: &redis::RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        CacheError::Connection(e.to_string())
    } else {
        CacheError::Command(e.to_string())
    }
}

impl ProductCache for RedisProductCache {
    fn get(&self, id: ProductId) -> BoxFuture<'_, Result<Option<Product>, CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let bytes: Option<Vec<u8>> = conn
                .get(self.key(id))
                .await
                .map_err(|e| command_error(&e))?;

            bytes
                .map(|bytes| {
                    bincode::deserialize(&bytes)
                        .map_err(|e| CacheError::Serialization(e.to_string()))
                })
                .transpose()
        })
    }

    fn put(&self, product: Product) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let bytes =
                bincode::serialize(&product).map_err(|e| CacheError::Serialization(e.to_string()))?;

            let _: () = conn
                .set_ex(self.key(product.id), bytes, self.ttl_seconds())
                .await
                .map_err(|e| command_error(&e))?;

            tracing::trace!(product_id = %product.id, "Cached product");
            Ok(())
        })
    }

    fn fill(&self, product: Product) -> BoxFuture<'_, Result<bool, CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let bytes =
                bincode::serialize(&product).map_err(|e| CacheError::Serialization(e.to_string()))?;

            let reply: Option<String> = redis::cmd("SET")
                .arg(self.key(product.id))
                .arg(bytes)
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_seconds())
                .query_async(&mut conn)
                .await
                .map_err(|e| command_error(&e))?;

            Ok(reply.is_some())
        })
    }

    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn.del(self.key(id)).await.map_err(|e| command_error(&e))?;
            Ok(())
        })
    }
}
