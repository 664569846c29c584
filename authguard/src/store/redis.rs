//! Redis-backed stores
//!
//! Counter records and flow contexts are stored as JSON strings with a
//! millisecond TTL derived from their `expire_at`, so Redis purges lapsed
//! state on its own. `SET NX` and `SET XX` give the create/update conflict
//! contract the engine relies on.

use std::ops::DerefMut;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{StoreError, StoreErrorKind, StoreOperation, StoreResult};
use super::traits::{ContextStore, CounterStore};
use crate::config::RedisConfig;
use crate::context::AuthenticationFlowContext;
use crate::counter::CounterRecord;
use crate::criteria::CounterKey;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Redis store for counters and flow contexts
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    key_prefix: String,
}

impl RedisStore {
    /// Wrap an existing pool
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    /// Build a pool from configuration, retrying with exponential backoff
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let mut attempt = 0;
        let base_delay = Duration::from_millis(config.retry_delay_ms);

        loop {
            match try_create_pool(config).await {
                Ok(pool) => {
                    tracing::info!(
                        max_connections = config.max_connections,
                        attempts = attempt + 1,
                        "Redis store connected"
                    );
                    return Ok(Self::new(pool, config.key_prefix.clone()));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > config.max_retries {
                        tracing::error!(
                            attempts = attempt,
                            error = %e,
                            "Failed to connect to Redis"
                        );
                        return Err(e);
                    }

                    let delay = backoff_delay(base_delay, attempt);
                    tracing::warn!(
                        attempt = attempt,
                        error = %e,
                        "Redis connection attempt failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn counter_key(&self, key: &CounterKey) -> String {
        format!("{}:counter:{}", self.key_prefix, key.storage_key())
    }

    fn context_key(&self, transaction_id: &str) -> String {
        format!("{}:context:{}", self.key_prefix, transaction_id)
    }

    async fn connection(&self, operation: StoreOperation) -> StoreResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| {
            StoreError::connection_failed(format!("Failed to get Redis connection: {}", e))
                .with_operation(operation)
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        redis_key: &str,
    ) -> StoreResult<Option<T>> {
        let mut conn = self.connection(StoreOperation::Find).await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(redis_key)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| map_redis_error(StoreOperation::Find, e))?;
        raw.map(|json| decode(StoreOperation::Find, &json)).transpose()
    }

    /// `SET key value PX ttl [NX|XX]`; returns whether Redis applied it
    async fn set_json<T: Serialize>(
        &self,
        operation: StoreOperation,
        redis_key: &str,
        value: &T,
        expire_at: DateTime<Utc>,
        condition: Option<&str>,
    ) -> StoreResult<bool> {
        let json = encode(operation, value)?;
        let mut conn = self.connection(operation).await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(redis_key).arg(json).arg("PX").arg(ttl_millis(expire_at));
        if let Some(condition) = condition {
            cmd.arg(condition);
        }
        let reply: Option<String> = cmd
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| map_redis_error(operation, e))?;
        Ok(reply.is_some())
    }

    async fn del(&self, redis_key: &str) -> StoreResult<bool> {
        let mut conn = self.connection(StoreOperation::Delete).await?;
        let removed: i64 = redis::cmd("DEL")
            .arg(redis_key)
            .query_async(conn.deref_mut())
            .await
            .map_err(|e| map_redis_error(StoreOperation::Delete, e))?;
        Ok(removed > 0)
    }
}

impl CounterStore for RedisStore {
    async fn find(&self, key: &CounterKey) -> StoreResult<Option<CounterRecord>> {
        self.get_json(&self.counter_key(key)).await
    }

    async fn create(&self, record: CounterRecord) -> StoreResult<CounterRecord> {
        let redis_key = self.counter_key(&record.key);
        let applied = self
            .set_json(StoreOperation::Create, &redis_key, &record, record.expire_at, Some("NX"))
            .await?;
        if applied {
            Ok(record)
        } else {
            Err(StoreError::already_exists("CounterRecord", redis_key))
        }
    }

    async fn update(&self, record: CounterRecord) -> StoreResult<CounterRecord> {
        let redis_key = self.counter_key(&record.key);
        let applied = self
            .set_json(StoreOperation::Update, &redis_key, &record, record.expire_at, Some("XX"))
            .await?;
        if applied {
            Ok(record)
        } else {
            Err(StoreError::not_found(StoreOperation::Update, "CounterRecord", redis_key))
        }
    }

    async fn delete(&self, key: &CounterKey) -> StoreResult<bool> {
        self.del(&self.counter_key(key)).await
    }
}

impl ContextStore for RedisStore {
    async fn find_last(&self, transaction_id: &str) -> StoreResult<Option<AuthenticationFlowContext>> {
        self.get_json(&self.context_key(transaction_id)).await
    }

    async fn create(&self, context: AuthenticationFlowContext) -> StoreResult<AuthenticationFlowContext> {
        let redis_key = self.context_key(&context.transaction_id);
        self.set_json(StoreOperation::Create, &redis_key, &context, context.expire_at, None)
            .await?;
        Ok(context)
    }

    async fn delete(&self, transaction_id: &str) -> StoreResult<bool> {
        self.del(&self.context_key(transaction_id)).await
    }
}

async fn try_create_pool(config: &RedisConfig) -> StoreResult<Pool> {
    let cfg = DeadpoolConfig::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| StoreError::connection_failed(format!("Failed to build Redis pool: {}", e)))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| StoreError::connection_failed(format!("Failed to create Redis pool: {}", e)))?;

    // Test the connection
    let conn = pool
        .get()
        .await
        .map_err(|e| StoreError::connection_failed(format!("Failed to get Redis connection: {}", e)))?;
    drop(conn);

    Ok(pool)
}

/// Doubling delay before connection retry `attempt`, capped at `MAX_BACKOFF`
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn ttl_millis(expire_at: DateTime<Utc>) -> i64 {
    // PX rejects zero and negative values
    (expire_at - Utc::now()).num_milliseconds().max(1)
}

fn encode<T: Serialize>(operation: StoreOperation, value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::serialization_error(operation, e.to_string()))
}

fn decode<T: DeserializeOwned>(operation: StoreOperation, json: &str) -> StoreResult<T> {
    serde_json::from_str(json).map_err(|e| StoreError::serialization_error(operation, e.to_string()))
}

fn map_redis_error(operation: StoreOperation, error: redis::RedisError) -> StoreError {
    let kind = if error.is_timeout() {
        StoreErrorKind::Timeout
    } else if error.is_connection_refusal() || error.is_connection_dropped() || error.is_io_error() {
        StoreErrorKind::ConnectionFailed
    } else {
        StoreErrorKind::BackendError
    };
    StoreError::new(operation, kind, error.to_string())
}
