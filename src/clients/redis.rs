use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    error::{DispatchError, DispatchResult},
    models::{retry::RetryConfig, status::IdempotencyStatus},
    utils::retry_with_backoff,
};

/// Tracks producer idempotency keys so a re-sent business event does not
/// create a second signal.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    async fn check(&self, key: &str) -> DispatchResult<IdempotencyStatus>;
    /// Atomically claims `key`. Returns `false` if it was already claimed.
    async fn try_begin(&self, key: &str) -> DispatchResult<bool>;
    async fn mark_as_sent(&self, key: &str) -> DispatchResult<()>;
    /// Forgets `key` so the producer can deliver the event again.
    async fn release(&self, key: &str) -> DispatchResult<()>;
}

pub struct RedisClient {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisClient {
    pub async fn connect(
        redis_url: &str,
        idempotency_ttl_seconds: u64,
        retry_config: RetryConfig,
    ) -> DispatchResult<Self> {
        info!("Connecting to Redis");

        let client = Client::open(redis_url)
            .map_err(|e| DispatchError::storage(format!("Failed to create redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DispatchError::storage(format!("Failed to connect to redis: {}", e)))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds,
            retry_config,
        })
    }

    fn key(idempotency_key: &str) -> String {
        format!("idempotency:signal:{}", idempotency_key)
    }

    async fn set_status(&self, idempotency_key: &str, status: &'static str) -> DispatchResult<()> {
        let key = Self::key(idempotency_key);

        retry_with_backoff(&self.retry_config, || {
            let key = key.clone();
            let mut conn = self.connection.clone();
            let ttl = self.idempotency_ttl_seconds;

            async move {
                conn.set_ex::<_, _, ()>(&key, status, ttl)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| DispatchError::storage(format!("marking key as {} failed: {}", status, e)))
    }

    pub async fn ping(&self) -> DispatchResult<()> {
        let mut conn = self.connection.clone();
        conn.ping::<String>()
            .await
            .map_err(|e| DispatchError::storage(format!("Ping failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyGuard for RedisClient {
    async fn check(&self, idempotency_key: &str) -> DispatchResult<IdempotencyStatus> {
        let key = Self::key(idempotency_key);
        let mut conn = self.connection.clone();

        let value: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| DispatchError::storage(format!("Failed to get cached value: {}", e)))?;

        match value.as_deref() {
            None => Ok(IdempotencyStatus::NotFound),
            Some("processing") => Ok(IdempotencyStatus::Processing),
            Some("sent") => Ok(IdempotencyStatus::Sent),
            Some(other) => {
                warn!(key = %key, status = other, "Unknown idempotency status");
                Ok(IdempotencyStatus::NotFound)
            }
        }
    }

    async fn try_begin(&self, idempotency_key: &str) -> DispatchResult<bool> {
        let key = Self::key(idempotency_key);
        let mut conn = self.connection.clone();

        let claimed: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("processing")
            .arg("NX")
            .arg("EX")
            .arg(self.idempotency_ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| DispatchError::storage(format!("Failed to claim key: {}", e)))?;

        Ok(claimed.is_some())
    }

    async fn mark_as_sent(&self, idempotency_key: &str) -> DispatchResult<()> {
        self.set_status(idempotency_key, "sent").await
    }

    async fn release(&self, idempotency_key: &str) -> DispatchResult<()> {
        let key = Self::key(idempotency_key);
        let mut conn = self.connection.clone();

        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| DispatchError::storage(format!("Failed to release key: {}", e)))
    }
}

/// In-process guard used when Redis is not configured. Only deduplicates
/// within one process.
pub struct LocalIdempotencyGuard {
    ttl: Duration,
    keys: Mutex<HashMap<String, (IdempotencyStatus, Instant)>>,
}

impl LocalIdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            keys: Mutex::new(HashMap::new()),
        }
    }

    async fn set(&self, key: &str, status: IdempotencyStatus) {
        self.keys
            .lock()
            .await
            .insert(key.to_string(), (status, Instant::now() + self.ttl));
    }
}

#[async_trait]
impl IdempotencyGuard for LocalIdempotencyGuard {
    async fn check(&self, key: &str) -> DispatchResult<IdempotencyStatus> {
        let mut keys = self.keys.lock().await;
        let current = keys
            .get(key)
            .map(|(status, expires_at)| (status.clone(), *expires_at));

        match current {
            Some((_, expires_at)) if expires_at <= Instant::now() => {
                keys.remove(key);
                Ok(IdempotencyStatus::NotFound)
            }
            Some((status, _)) => Ok(status),
            None => Ok(IdempotencyStatus::NotFound),
        }
    }

    async fn try_begin(&self, key: &str) -> DispatchResult<bool> {
        let mut keys = self.keys.lock().await;
        let now = Instant::now();

        if keys.get(key).is_some_and(|(_, expires_at)| *expires_at > now) {
            return Ok(false);
        }
        keys.insert(
            key.to_string(),
            (IdempotencyStatus::Processing, now + self.ttl),
        );
        Ok(true)
    }

    async fn mark_as_sent(&self, key: &str) -> DispatchResult<()> {
        self.set(key, IdempotencyStatus::Sent).await;
        Ok(())
    }

    async fn release(&self, key: &str) -> DispatchResult<()> {
        self.keys.lock().await.remove(key);
        Ok(())
    }
}
