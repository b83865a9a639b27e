//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! - **Stream**: one stream per queue (`edugen:content-requests` by default)
//! - **Consumer group**: all workers share one group; each entry goes to one consumer
//! - **Nack**: the entry stays pending and is reclaimed with `XCLAIM` once it has
//!   been idle for `redelivery_delay`; the delivery count comes from `XPENDING`
//! - **Dead-letter stream**: entries past `max_delivery_attempts` are copied to
//!   `<stream>:dlq` and acknowledged
//!
//! Redis calls use a blocking connection inside `spawn_blocking`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{DEFAULT_MAX_DELIVERY_ATTEMPTS, MessageQueue, QueueError, ReceivedMessage};

const DEFAULT_STREAM_KEY: &str = "edugen:content-requests";
const DEFAULT_GROUP: &str = "content-workers";
const DATA_FIELD: &str = "data";

#[derive(Debug, Clone)]
pub struct RedisStreamsQueue {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    max_delivery_attempts: u32,
    redelivery_delay: Duration,
    block: Duration,
}

/// One entry of an `XPENDING` extended reply: id, consumer, idle ms, deliveries.
type PendingEntry = (String, String, u64, u64);

impl RedisStreamsQueue {
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        group: Option<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        let stream_key = stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string());

        Ok(Self {
            client: Arc::new(client),
            dlq_key: format!("{stream_key}:dlq"),
            stream_key,
            group: group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            consumer: consumer.into(),
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            redelivery_delay: Duration::from_secs(60),
            block: Duration::from_secs(1),
        })
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// How long `pull` waits for new entries when the stream is empty.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn dlq_key(&self) -> &str {
        &self.dlq_key
    }

    fn connection(&self) -> Result<redis::Connection, QueueError> {
        self.client
            .get_connection()
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    /// Create the consumer group (and stream) if missing.
    pub fn ensure_consumer_group(&self) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Result<T, QueueError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| QueueError::Internal(format!("redis task failed: {e}")))?
    }

    fn pull_sync(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut conn = self.connection()?;
        let mut batch = self.reclaim_sync(&mut conn, max)?;
        if batch.len() < max {
            batch.extend(self.read_new_sync(&mut conn, max - batch.len())?);
        }
        Ok(batch)
    }

    /// Redeliver entries idle past `redelivery_delay`; dead-letter the ones
    /// that ran out of attempts.
    fn reclaim_sync(
        &self,
        conn: &mut redis::Connection,
        max: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let pending: Vec<PendingEntry> = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(max.max(1).to_string())
            .query(conn)
            .map_err(|e| QueueError::Command(format!("XPENDING failed: {e}")))?;

        let min_idle = self.redelivery_delay.as_millis() as u64;
        let mut redeliver = Vec::new();
        let mut exhausted = Vec::new();
        for (id, _consumer, idle_ms, deliveries) in pending {
            if idle_ms < min_idle {
                continue;
            }
            if deliveries >= self.max_delivery_attempts as u64 {
                exhausted.push((id, deliveries));
            } else {
                redeliver.push((id, deliveries));
            }
        }

        for (id, deliveries) in exhausted {
            self.dead_letter_sync(conn, &id, deliveries)?;
        }
        if redeliver.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = redeliver.iter().map(|(id, _)| id.as_str()).collect();
        let claimed: Vec<redis::Value> = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(min_idle.to_string())
            .arg(&ids[..])
            .query(conn)
            .map_err(|e| QueueError::Command(format!("XCLAIM failed: {e}")))?;

        let counts: HashMap<&str, u64> = redeliver
            .iter()
            .map(|(id, n)| (id.as_str(), *n))
            .collect();
        let mut messages = Vec::new();
        for entry in claimed {
            match parse_stream_entry(entry) {
                Ok((id, data)) => {
                    let previous = counts.get(id.as_str()).copied().unwrap_or(0);
                    messages.push(ReceivedMessage {
                        ack_id: id.clone(),
                        message_id: id,
                        data,
                        delivery_attempt: previous as u32 + 1,
                    });
                }
                Err(e) => warn!(error = %e, "skipping unreadable stream entry"),
            }
        }
        Ok(messages)
    }

    fn read_new_sync(
        &self,
        conn: &mut redis::Connection,
        count: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let result: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count.to_string())
            .arg("BLOCK")
            .arg((self.block.as_millis() as u64).to_string())
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(conn)
            .map_err(|e| QueueError::Command(format!("XREADGROUP failed: {e}")))?;

        let entries = stream_entries(result, &self.stream_key);

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_stream_entry(entry) {
                Ok((id, data)) => messages.push(ReceivedMessage {
                    ack_id: id.clone(),
                    message_id: id,
                    data,
                    delivery_attempt: 1,
                }),
                Err(e) => warn!(error = %e, "skipping unreadable stream entry"),
            }
        }
        Ok(messages)
    }

    fn ack_sync(&self, ids: &[String]) -> Result<(), QueueError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(ids)
            .query(&mut conn)
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    fn dead_letter_sync(
        &self,
        conn: &mut redis::Connection,
        id: &str,
        deliveries: u64,
    ) -> Result<(), QueueError> {
        let entries: Vec<redis::Value> = redis::cmd("XRANGE")
            .arg(&self.stream_key)
            .arg(id)
            .arg(id)
            .query(conn)
            .map_err(|e| QueueError::Command(format!("XRANGE failed: {e}")))?;
        let data = entries
            .into_iter()
            .next()
            .and_then(|entry| parse_stream_entry(entry).ok())
            .map(|(_, data)| data)
            .unwrap_or_default();

        let _: String = redis::cmd("XADD")
            .arg(&self.dlq_key)
            .arg("*")
            .arg("original_message_id")
            .arg(id)
            .arg("delivery_attempts")
            .arg(deliveries.to_string())
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg(DATA_FIELD)
            .arg(data)
            .query(conn)
            .map_err(|e| QueueError::Command(format!("DLQ XADD failed: {e}")))?;

        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(id)
            .query(conn)
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))?;

        warn!(
            message_id = %id,
            delivery_attempts = deliveries,
            "Message sent to dead-letter queue"
        );
        Ok(())
    }
}

/// Entries of `stream_key` in an `XREADGROUP` reply: `[[stream, [entry, ...]], ...]`,
/// or nil when the block timed out.
fn stream_entries(reply: redis::Value, stream_key: &str) -> Vec<redis::Value> {
    let redis::Value::Bulk(streams) = reply else {
        return Vec::new();
    };
    for stream in streams {
        let redis::Value::Bulk(mut pair) = stream else {
            continue;
        };
        if pair.len() != 2 {
            continue;
        }
        let entries = pair.pop();
        if let (Some(redis::Value::Data(name)), Some(redis::Value::Bulk(entries))) =
            (pair.pop(), entries)
        {
            if name.as_slice() == stream_key.as_bytes() {
                return entries;
            }
        }
    }
    Vec::new()
}

/// Entry format: `[id, [field1, value1, field2, value2, ...]]`.
fn parse_stream_entry(entry: redis::Value) -> Result<(String, Vec<u8>), QueueError> {
    let redis::Value::Bulk(parts) = entry else {
        return Err(QueueError::Command("invalid entry format".to_string()));
    };
    let mut parts = parts.into_iter();

    let id = match parts.next() {
        Some(redis::Value::Data(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
        _ => return Err(QueueError::Command("invalid message id format".to_string())),
    };
    let fields = match parts.next() {
        Some(redis::Value::Bulk(fields)) => fields,
        _ => return Err(QueueError::Command(format!("entry {id} has no fields"))),
    };

    for pair in fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
            if key.as_slice() == DATA_FIELD.as_bytes() {
                return Ok((id, value.clone()));
            }
        }
    }
    Err(QueueError::Command(format!("entry {id} has no '{DATA_FIELD}' field")))
}

#[async_trait]
impl MessageQueue for RedisStreamsQueue {
    #[instrument(skip(self), fields(stream_key = %self.stream_key), err)]
    async fn pull(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        self.blocking(move |q| q.pull_sync(max)).await
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        let ids = ack_ids.to_vec();
        self.blocking(move |q| q.ack_sync(&ids)).await
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        // Left pending; `pull` reclaims it after the redelivery delay.
        debug!(count = ack_ids.len(), "messages nacked");
        Ok(())
    }

    async fn reject(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        let ids = ack_ids.to_vec();
        self.blocking(move |q| q.ack_sync(&ids)).await
    }

    #[instrument(skip(self, data), fields(stream_key = %self.stream_key), err)]
    async fn publish(&self, data: Vec<u8>) -> Result<String, QueueError> {
        self.blocking(move |q| {
            let mut conn = q.connection()?;
            redis::cmd("XADD")
                .arg(&q.stream_key)
                .arg("*")
                .arg(DATA_FIELD)
                .arg(data)
                .query(&mut conn)
                .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))
        })
        .await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.blocking(|q| {
            let mut conn = q.connection()?;
            let _: String = redis::cmd("PING")
                .query(&mut conn)
                .map_err(|e| QueueError::Command(format!("PING failed: {e}")))?;
            Ok(())
        })
        .await
    }
}
