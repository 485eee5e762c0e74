//! Redis Streams queue implementation.
//!
//! Maps the queue contract onto stream commands: XADD with MAXLEN trimming,
//! XREADGROUP for grouped blocking reads, XACK/XDEL for completion,
//! XAUTOCLAIM for stale-entry reclaim (the broker provides the exclusivity
//! guarantee), and XPENDING for delivery counts. Entries carry a single
//! `payload` field.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Value;
use tracing::debug;

use super::{Delivery, EntryId, QueueError, TaskQueue};

/// Queue backed by Redis Streams.
pub struct RedisQueue {
    conn: MultiplexedConnection,
    max_len: usize,
}

impl RedisQueue {
    /// Connect to a Redis server, trimming streams to `max_len` on append.
    pub async fn connect(url: &str, max_len: usize) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(url).map_err(|e| QueueError::Transport(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Transport(e.to_string()))?;
        debug!(url = %url, "connected to redis");
        Ok(Self { conn, max_len })
    }
}

fn transport(e: redis::RedisError) -> QueueError {
    QueueError::Transport(e.to_string())
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse one `[id, [field, value, ...]]` pair, extracting the payload field.
fn parse_entry(value: &Value) -> Result<Delivery, QueueError> {
    let parts = match value {
        Value::Bulk(parts) if parts.len() >= 2 => parts,
        other => {
            return Err(QueueError::Transport(format!(
                "unexpected stream entry shape: {other:?}"
            )));
        }
    };

    let id_text = as_string(&parts[0])
        .ok_or_else(|| QueueError::Transport("stream entry id is not a string".into()))?;
    let id = EntryId::from_str(&id_text)?;

    let fields = match &parts[1] {
        Value::Bulk(fields) => fields,
        other => {
            return Err(QueueError::Transport(format!(
                "unexpected field list shape: {other:?}"
            )));
        }
    };

    for pair in fields.chunks(2) {
        if pair.len() == 2 && as_string(&pair[0]).as_deref() == Some("payload") {
            if let Value::Data(bytes) = &pair[1] {
                return Ok(Delivery {
                    id,
                    payload: bytes.clone(),
                });
            }
        }
    }

    Err(QueueError::Transport(format!(
        "entry {id} has no payload field"
    )))
}

/// Parse an `[[id, fields], ...]` entry list.
fn parse_entry_list(value: &Value) -> Result<Vec<Delivery>, QueueError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Bulk(items) => items.iter().map(parse_entry).collect(),
        other => Err(QueueError::Transport(format!(
            "unexpected entry list shape: {other:?}"
        ))),
    }
}

/// Parse an XREADGROUP reply — `[[stream, [[id, fields], ...]], ...]` — into
/// the entries of its single stream.
fn parse_read_reply(value: &Value) -> Result<Vec<Delivery>, QueueError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Bulk(streams) => {
            let mut deliveries = Vec::new();
            for stream in streams {
                if let Value::Bulk(parts) = stream {
                    if parts.len() >= 2 {
                        deliveries.extend(parse_entry_list(&parts[1])?);
                    }
                }
            }
            Ok(deliveries)
        }
        other => Err(QueueError::Transport(format!(
            "unexpected XREADGROUP reply: {other:?}"
        ))),
    }
}

/// Parse an XAUTOCLAIM reply — `[next-cursor, [[id, fields], ...], ...]`.
fn parse_autoclaim_reply(value: &Value) -> Result<Vec<Delivery>, QueueError> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Bulk(parts) if parts.len() >= 2 => parse_entry_list(&parts[1]),
        other => Err(QueueError::Transport(format!(
            "unexpected XAUTOCLAIM reply: {other:?}"
        ))),
    }
}

/// Parse an extended XPENDING reply for one id —
/// `[[id, consumer, idle-ms, delivery-count]]`.
fn parse_pending_reply(value: &Value, id: EntryId) -> Result<u32, QueueError> {
    let rows = match value {
        Value::Nil => return Err(QueueError::NotPending(id)),
        Value::Bulk(rows) => rows,
        other => {
            return Err(QueueError::Transport(format!(
                "unexpected XPENDING reply: {other:?}"
            )));
        }
    };

    for row in rows {
        if let Value::Bulk(parts) = row {
            if parts.len() >= 4 {
                if let Value::Int(count) = parts[3] {
                    return Ok(count.max(0) as u32);
                }
            }
        }
    }

    Err(QueueError::NotPending(id))
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn append(&self, stream: &str, payload: &[u8]) -> Result<EntryId, QueueError> {
        let mut conn = self.conn.clone();
        let value: Value = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(transport)?;

        let id_text = as_string(&value)
            .ok_or_else(|| QueueError::Transport("XADD did not return an id".into()))?;
        EntryId::from_str(&id_text)
    }

    async fn dequeue(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(max_count);
        // BLOCK 0 means "block forever" to Redis; a zero block duration
        // here means a non-blocking read instead.
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(stream).arg(">");

        let value: Value = cmd.query_async(&mut conn).await.map_err(transport)?;
        parse_read_reply(&value)
    }

    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        // XACK returns the number of acknowledged entries; 0 for an entry
        // that is no longer pending, which the contract treats as success.
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn delete(&self, stream: &str, id: EntryId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XDEL")
            .arg(stream)
            .arg(id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: EntryId,
        max_count: usize,
    ) -> Result<Vec<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let value: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(start.to_string())
            .arg("COUNT")
            .arg(max_count)
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        parse_autoclaim_reply(&value)
    }

    async fn pending_info(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<u32, QueueError> {
        let mut conn = self.conn.clone();
        let id_text = id.to_string();
        let value: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg(&id_text)
            .arg(&id_text)
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        parse_pending_reply(&value, id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let result: Result<Value, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            // Group already exists: fine, boot is idempotent
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::ConsumerGroup(e.to_string())),
        }
    }
}
