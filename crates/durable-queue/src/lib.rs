// durable-queue: the Redis-backed handoff between the ingress gateway and
// the batch ingester. The gateway pushes encoded readings onto a per-node
// list and moves on; the ingester discovers active lists, pops them in
// batches, and allocates a gap-free sequence range for whatever it pops.
// This crate owns the key layout and the handful of atomic operations that
// make that handoff safe under concurrent flushers.

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;

pub type QueuePool = Pool<RedisConnectionManager>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("redis pool error: {0}")]
    Pool(#[from] bb8::RunError<redis::RedisError>),
}

pub type QueueResult<T> = Result<T, QueueError>;

const DEFAULT_QUEUE_PREFIX: &str = "queue:node:";
const SEQ_PREFIX: &str = "seq:node:";
const METRICS_PREFIX: &str = "metrics:";
const DLQ_PREFIX: &str = "dlq:node:";

/// How long a node's metrics hash survives without a flush before Redis
/// reclaims it. Matches the gateway's own device-timeout horizon: a node
/// that's been silent this long has nothing worth keeping metrics for.
pub const METRICS_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeMetrics {
    pub total_records: i64,
    pub last_flush: Option<i64>,
}

/// Handle to the durable queue, shared by the gateway (producer) and the
/// ingester (consumer). The queue key prefix is configurable (`QUEUE_PREFIX`
/// in the environment); the counter, metrics, and dead-letter prefixes are
/// fixed, since nothing external ever needs to address them by pattern.
#[derive(Clone)]
pub struct DurableQueue {
    pool: QueuePool,
    queue_prefix: String,
}

impl DurableQueue {
    pub async fn connect(redis_url: &str, queue_prefix: impl Into<String>) -> QueueResult<Self> {
        let manager = RedisConnectionManager::new(redis_url)?;
        let pool = Pool::builder().max_size(16).build(manager).await?;
        let queue_prefix = queue_prefix.into();
        tracing::info!(%queue_prefix, "durable queue pool ready");
        Ok(Self { pool, queue_prefix })
    }

    pub fn with_pool(pool: QueuePool, queue_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            queue_prefix: queue_prefix.into(),
        }
    }

    pub fn queue_key(&self, node_id: &str) -> String {
        format!("{}{node_id}", self.queue_prefix)
    }

    fn node_id_from_queue_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.queue_prefix.as_str())
    }

    /// Append one encoded reading to a node's queue. Called by the gateway
    /// on every accepted reading; never blocks on the ingester keeping up.
    pub async fn enqueue(&self, node_id: &str, encoded: &str) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        conn.rpush::<_, _, ()>(self.queue_key(node_id), encoded).await?;
        Ok(())
    }

    /// Append a whole buffer's worth of encoded readings in one `RPUSH`.
    /// `RPUSH key v1 v2 ... vN` is a single atomic command, so this is the
    /// handoff flush's durable half: either every entry lands or none does,
    /// and entries are visible to the ingester in buffer order.
    pub async fn enqueue_batch(&self, node_id: &str, encoded: &[String]) -> QueueResult<()> {
        if encoded.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        conn.rpush::<_, _, ()>(self.queue_key(node_id), encoded)
            .await?;
        Ok(())
    }

    /// Node ids with at least one pending entry, discovered via a
    /// non-blocking cursor scan rather than `KEYS`, so discovery never
    /// stalls the ingester behind a large keyspace.
    pub async fn discover_active_nodes(&self) -> QueueResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let pattern = format!("{}*", self.queue_prefix);
        let mut node_ids = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut *conn)
                .await?;
            node_ids.extend(
                keys.iter()
                    .filter_map(|k| self.node_id_from_queue_key(k))
                    .map(str::to_owned),
            );
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(node_ids)
    }

    pub async fn queue_len(&self, node_id: &str) -> QueueResult<i64> {
        let mut conn = self.pool.get().await?;
        let len: i64 = conn.llen(self.queue_key(node_id)).await?;
        Ok(len)
    }

    /// Pop up to `max` entries from the front of a node's queue, oldest
    /// first. `LPOP key count` is atomic, so concurrent pollers for the same
    /// node can never pop the same entry twice.
    pub async fn dequeue_batch(&self, node_id: &str, max: usize) -> QueueResult<Vec<String>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let entries: Option<Vec<String>> = conn
            .lpop(self.queue_key(node_id), std::num::NonZeroUsize::new(max))
            .await?;
        Ok(entries.unwrap_or_default())
    }

    /// Atomically reserve `count` consecutive sequence numbers for a node
    /// and return the first one in the range. Backed by `INCRBY`, the
    /// gap-free allocator the spec requires: two concurrent flushers for
    /// the same node can never be handed overlapping ranges.
    pub async fn allocate_seq_range(&self, node_id: &str, count: i64) -> QueueResult<i64> {
        if count <= 0 {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let new_high: i64 = conn.incr(format!("{SEQ_PREFIX}{node_id}"), count).await?;
        Ok(new_high - count + 1)
    }

    /// Record a successful flush in the node's metrics hash and refresh its TTL.
    pub async fn record_flush(&self, node_id: &str, count: i64, flushed_at_ms: i64) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        let key = format!("{METRICS_PREFIX}{node_id}");
        let () = redis::pipe()
            .atomic()
            .cmd("HINCRBY")
            .arg(&key)
            .arg("total_records")
            .arg(count)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg("last_flush")
            .arg(flushed_at_ms)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(METRICS_TTL_SECS)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn read_metrics(&self, node_id: &str) -> QueueResult<NodeMetrics> {
        let mut conn = self.pool.get().await?;
        let map: std::collections::HashMap<String, String> = conn
            .hgetall(format!("{METRICS_PREFIX}{node_id}"))
            .await?;
        Ok(NodeMetrics {
            total_records: map
                .get("total_records")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_flush: map.get("last_flush").and_then(|v| v.parse().ok()),
        })
    }

    /// Move entries that failed to persist into a node's dead-letter list,
    /// rather than dropping them or blocking the rest of the queue behind
    /// them.
    pub async fn dead_letter(&self, node_id: &str, entries: &[String]) -> QueueResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await?;
        conn.rpush::<_, _, ()>(format!("{DLQ_PREFIX}{node_id}"), entries)
            .await?;
        Ok(())
    }

    /// Write (or refresh) a heartbeat timestamp the gateway's
    /// `/api/ingester/health` endpoint reads back.
    pub async fn write_heartbeat(&self, key: &str, now_ms: i64) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        conn.set::<_, _, ()>(key, now_ms).await?;
        Ok(())
    }

    pub async fn read_heartbeat(&self, key: &str) -> QueueResult<Option<i64>> {
        let mut conn = self.pool.get().await?;
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }
}

pub fn default_queue_prefix() -> String {
    DEFAULT_QUEUE_PREFIX.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(prefix: &str) -> DurableQueue {
        let manager = RedisConnectionManager::new("redis://127.0.0.1:0/").unwrap();
        let pool = Pool::builder().max_size(1).build_unchecked(manager);
        DurableQueue::with_pool(pool, prefix)
    }

    #[test]
    fn queue_key_uses_configured_prefix() {
        let q = dummy("custom:prefix:");
        assert_eq!(q.queue_key("A"), "custom:prefix:A");
    }

    #[test]
    fn node_id_from_queue_key_strips_configured_prefix() {
        let q = dummy("queue:node:");
        assert_eq!(q.node_id_from_queue_key("queue:node:ESP32_A"), Some("ESP32_A"));
        assert_eq!(q.node_id_from_queue_key("metrics:ESP32_A"), None);
    }

    #[test]
    fn default_queue_prefix_matches_spec_default() {
        assert_eq!(default_queue_prefix(), "queue:node:");
    }
}
