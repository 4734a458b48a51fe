//! Redis-backed queue store shared by every service instance.
//!
//! Layout mirrors the original deployment: one sorted set per bucket with the
//! skill rating as score, plus a hash recording each candidate's wait-start
//! timestamp. The group claim runs as a Lua script so the check-then-remove is
//! atomic even with concurrent scheduler ticks on other instances.

use std::sync::Arc;

use futures::future::BoxFuture;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::dao::{
    queue_store::{QueueEntry, QueueKey, QueueStore},
    storage::{StorageError, StorageResult},
};

const KEY_PREFIX: &str = "race";

/// Verifies every member is still queued before removing any of them.
/// Returns the wait-start timestamps on success and an empty array when the
/// claim must abort, leaving the bucket untouched.
const CLAIM_GROUP_SCRIPT: &str = r#"
local queue = KEYS[1]
local wait = KEYS[2]
for i = 1, #ARGV do
  if redis.call('ZSCORE', queue, ARGV[i]) == false then
    return {}
  end
end
local started = {}
for i = 1, #ARGV do
  started[i] = redis.call('HGET', wait, ARGV[i]) or '0'
  redis.call('ZREM', queue, ARGV[i])
  redis.call('HDEL', wait, ARGV[i])
end
return started
"#;

struct RedisInner {
    client: Client,
    connection: RwLock<ConnectionManager>,
    claim_script: Script,
}

impl RedisInner {
    async fn connection(&self) -> ConnectionManager {
        self.connection.read().await.clone()
    }

    async fn reconnect(&self) -> StorageResult<()> {
        let manager = self
            .client
            .get_connection_manager()
            .await
            .map_err(|source| {
                StorageError::unavailable("failed to reconnect to Redis".into(), source)
            })?;
        let mut guard = self.connection.write().await;
        *guard = manager;
        Ok(())
    }
}

/// Queue store persisting buckets in Redis sorted sets.
#[derive(Clone)]
pub struct RedisQueueStore {
    inner: Arc<RedisInner>,
}

impl RedisQueueStore {
    /// Connect to Redis and prepare the claim script.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let client = Client::open(url)
            .map_err(|source| StorageError::unavailable("invalid Redis URL".into(), source))?;
        let connection = client.get_connection_manager().await.map_err(|source| {
            StorageError::unavailable("failed to connect to Redis".into(), source)
        })?;

        info!("connected to Redis queue store");

        Ok(Self {
            inner: Arc::new(RedisInner {
                client,
                connection: RwLock::new(connection),
                claim_script: Script::new(CLAIM_GROUP_SCRIPT),
            }),
        })
    }

    fn queue_key(key: QueueKey) -> String {
        format!("{KEY_PREFIX}:queue:{}:{}", key.distance, key.group_size)
    }

    fn wait_key(key: QueueKey) -> String {
        format!("{KEY_PREFIX}:wait:{}:{}", key.distance, key.group_size)
    }
}

fn redis_error(message: &str) -> impl Fn(redis::RedisError) -> StorageError + '_ {
    move |source| StorageError::unavailable(message.to_string(), source)
}

fn parse_member(raw: &str) -> StorageResult<Uuid> {
    raw.parse()
        .map_err(|_| StorageError::Corrupt(format!("malformed queue member `{raw}`")))
}

impl QueueStore for RedisQueueStore {
    fn enqueue(
        &self,
        key: QueueKey,
        candidate_id: Uuid,
        rating: u32,
        enqueued_at_ms: u64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut connection = inner.connection().await;
            let member = candidate_id.to_string();
            // ZADD replaces the score when the member exists, which is exactly
            // the upsert the queue contract requires.
            redis::pipe()
                .atomic()
                .zadd(Self::queue_key(key), &member, rating)
                .hset(Self::wait_key(key), &member, enqueued_at_ms)
                .query_async::<()>(&mut connection)
                .await
                .map_err(redis_error("failed to enqueue candidate"))?;
            Ok(())
        })
    }

    fn peek_lowest_window(
        &self,
        key: QueueKey,
        window: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueEntry>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if window == 0 {
                return Ok(Vec::new());
            }
            let mut connection = inner.connection().await;
            let raw: Vec<(String, f64)> = connection
                .zrange_withscores(Self::queue_key(key), 0, window as isize - 1)
                .await
                .map_err(redis_error("failed to read queue window"))?;

            raw.iter()
                .map(|(member, score)| {
                    Ok(QueueEntry {
                        candidate_id: parse_member(member)?,
                        rating: *score as u32,
                    })
                })
                .collect()
        })
    }

    fn claim_group(
        &self,
        key: QueueKey,
        members: Vec<Uuid>,
    ) -> BoxFuture<'static, StorageResult<Option<Vec<u64>>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if members.is_empty() {
                return Ok(None);
            }
            let mut connection = inner.connection().await;
            let mut invocation = inner.claim_script.prepare_invoke();
            invocation
                .key(Self::queue_key(key))
                .key(Self::wait_key(key));
            for member in &members {
                invocation.arg(member.to_string());
            }

            let started: Vec<String> = invocation
                .invoke_async(&mut connection)
                .await
                .map_err(redis_error("failed to claim matched group"))?;

            if started.is_empty() {
                return Ok(None);
            }

            let timestamps = started
                .iter()
                .map(|raw| {
                    raw.parse::<u64>().map_err(|_| {
                        StorageError::Corrupt(format!("malformed wait timestamp `{raw}`"))
                    })
                })
                .collect::<StorageResult<Vec<u64>>>()?;
            Ok(Some(timestamps))
        })
    }

    fn cancel(
        &self,
        key: QueueKey,
        candidate_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut connection = inner.connection().await;
            let member = candidate_id.to_string();
            let (removed, _): (i64, i64) = redis::pipe()
                .atomic()
                .zrem(Self::queue_key(key), &member)
                .hdel(Self::wait_key(key), &member)
                .query_async(&mut connection)
                .await
                .map_err(redis_error("failed to cancel queue entry"))?;
            Ok(removed > 0)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut connection = inner.connection().await;
            redis::cmd("PING")
                .query_async::<String>(&mut connection)
                .await
                .map_err(redis_error("Redis ping failed"))?;
            Ok(())
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.reconnect().await })
    }
}
