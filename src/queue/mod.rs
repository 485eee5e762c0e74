//! Stream-queue abstraction with consumer-group semantics.
//!
//! A queue is a set of named append-only streams. Consumers read through a
//! group: each entry is delivered to exactly one group member and tracked
//! as pending until acknowledged. Stalled pending entries are reassigned
//! through [`TaskQueue::reclaim_stale`], whose exclusivity guarantee is the
//! one piece of broker-level atomicity the rest of the system depends on.
//!
//! Two implementations: [`InMemoryQueue`] for tests and single-process
//! deployments, and `RedisQueue` (behind the `redis` feature) backed by
//! Redis Streams.

mod memory;
#[cfg(feature = "redis")]
mod redis_streams;

pub use memory::InMemoryQueue;
#[cfg(feature = "redis")]
pub use redis_streams::RedisQueue;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker is unreachable or a command failed in transit.
    #[error("queue transport error: {0}")]
    Transport(String),

    /// Consumer-group creation or lookup failed.
    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    /// The entry is not pending for the group.
    #[error("entry {0} is not pending")]
    NotPending(EntryId),

    /// An entry id failed to parse.
    #[error("invalid entry id: {0}")]
    InvalidEntryId(String),
}

/// Identifier of a stream entry: milliseconds timestamp plus a sequence
/// number, rendered `"1710000000000-0"` (the Redis Streams format).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    /// Millisecond component.
    pub ms: u64,
    /// Sequence component, disambiguating entries within one millisecond.
    pub seq: u64,
}

impl EntryId {
    /// The smallest id; used as the reclaim scan start.
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    /// Create an entry id from its components.
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Redis also accepts a bare millisecond id with an implied -0
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms
            .parse::<u64>()
            .map_err(|_| QueueError::InvalidEntryId(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| QueueError::InvalidEntryId(s.to_string()))?;
        Ok(EntryId { ms, seq })
    }
}

/// An entry handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The entry's id.
    pub id: EntryId,
    /// The opaque payload appended by the producer.
    pub payload: Vec<u8>,
}

/// A named-stream queue with consumer groups.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a payload to a stream. Never blocks on consumer readiness.
    /// The stream is trimmed to the implementation's max-length bound.
    async fn append(&self, stream: &str, payload: &[u8]) -> Result<EntryId, QueueError>;

    /// Read up to `max_count` new entries for `consumer` in `group`,
    /// blocking up to `block` when none are available. An empty result on
    /// timeout is not an error.
    async fn dequeue(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Mark an entry processed for the group. Idempotent.
    async fn acknowledge(&self, stream: &str, group: &str, id: EntryId)
        -> Result<(), QueueError>;

    /// Physically remove an entry from the stream. Idempotent; called
    /// together with [`acknowledge`](Self::acknowledge) to bound log growth.
    async fn delete(&self, stream: &str, id: EntryId) -> Result<(), QueueError>;

    /// Atomically transfer ownership of pending entries idle longer than
    /// `min_idle` to `consumer`, starting the scan at `start` and returning
    /// at most `max_count`. Each transfer resets the entry's idle clock and
    /// increments its delivery count; at most one concurrent caller wins a
    /// given entry.
    async fn reclaim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        start: EntryId,
        max_count: usize,
    ) -> Result<Vec<Delivery>, QueueError>;

    /// Delivery count of a pending entry.
    async fn pending_info(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<u32, QueueError>;

    /// Create the stream and group if absent, reading from the beginning.
    /// Invoked once at boot per stream/group pair.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError>;
}
