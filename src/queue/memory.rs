//! In-memory queue implementation.
//!
//! One async mutex guards all stream and group state; a notify wakes
//! blocked readers on append. Reclaim exclusivity falls out of the mutex:
//! the first reclaimer to run resets the entry's idle clock, so a
//! concurrent reclaimer no longer sees it as stale.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Delivery, EntryId, QueueError, TaskQueue};
use async_trait::async_trait;

/// Default per-stream length bound applied on append.
pub const DEFAULT_MAX_LEN: usize = 10_000;

/// Tracks the consumer that owns an unacknowledged entry.
#[derive(Debug)]
struct PendingClaim {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest id handed out to this group; new reads start past it.
    last_delivered: EntryId,
    pending: HashMap<EntryId, PendingClaim>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Vec<u8>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    /// Assign the next id: current milliseconds, or a bumped sequence when
    /// several appends land in the same millisecond.
    fn next_id(&mut self, now_ms: u64) -> EntryId {
        let id = if now_ms > self.last_id.ms {
            EntryId::new(now_ms, 0)
        } else {
            EntryId::new(self.last_id.ms, self.last_id.seq + 1)
        };
        self.last_id = id;
        id
    }
}

/// In-memory [`TaskQueue`].
pub struct InMemoryQueue {
    max_len: usize,
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

impl InMemoryQueue {
    /// Create a queue with the default length bound.
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_LEN)
    }

    /// Create a queue trimming each stream to `max_len` entries on append.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            streams: Mutex::new(HashMap::new()),
            appended: Notify::new(),
        }
    }

    fn now_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn append(&self, stream: &str, payload: &[u8]) -> Result<EntryId, QueueError> {
        let id = {
            let mut streams = self.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id(Self::now_ms());
            state.entries.insert(id, payload.to_vec());

            // Length bound: drop oldest entries. Pending claims for trimmed
            // entries are cleaned up lazily by reclaim.
            while state.entries.len() > self.max_len {
                let oldest = *state
                    .entries
                    .keys()
                    .next()
                    .ok_or_else(|| QueueError::Transport("trim on empty stream".into()))?;
                state.entries.remove(&oldest);
            }
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn dequeue(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + block;

        loop {
            // Enable the wakeup registration before checking, so an append
            // between the check and the await is not lost.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut streams = self.streams.lock().await;
                let state = streams.get_mut(stream).ok_or_else(|| {
                    QueueError::ConsumerGroup(format!("no group {group} on stream {stream}"))
                })?;
                let group_state = state.groups.get_mut(group).ok_or_else(|| {
                    QueueError::ConsumerGroup(format!("no group {group} on stream {stream}"))
                })?;

                let cursor = group_state.last_delivered;
                let fresh: Vec<(EntryId, Vec<u8>)> = state
                    .entries
                    .range((
                        std::ops::Bound::Excluded(cursor),
                        std::ops::Bound::Unbounded,
                    ))
                    .take(max_count)
                    .map(|(id, payload)| (*id, payload.clone()))
                    .collect();

                if !fresh.is_empty() {
                    let now = Instant::now();
                    let mut deliveries = Vec::with_capacity(fresh.len());
                    for (id, payload) in fresh {
                        group_state.pending.insert(
                            id,
                            PendingClaim {
                                consumer: consumer.to_string(),
                                delivered_at: now,
                                delivery_count: 1,
                            },
                        );
                        group_state.last_delivered = id;
                        deliveries.push(Delivery { id, payload });
                    }
                    return Ok(deliveries);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn acknowledge(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<(), QueueError> {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.remove(&id);
            }
        }
        // Acknowledging an unknown entry is a no-op, like XACK returning 0
        Ok(())
    }

    async fn delete(&self, stream: &str, id: EntryId) -> Result<(), QueueError> {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(stream) {
            state.entries.remove(&id);
        }
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
        let mut streams = self.streams.lock().await;
        let state = streams.get_mut(stream).ok_or_else(|| {
            QueueError::ConsumerGroup(format!("no group {group} on stream {stream}"))
        })?;
        let group_state = state.groups.get_mut(group).ok_or_else(|| {
            QueueError::ConsumerGroup(format!("no group {group} on stream {stream}"))
        })?;

        let now = Instant::now();
        let mut stale: Vec<EntryId> = group_state
            .pending
            .iter()
            .filter(|(id, claim)| {
                **id >= start && now.duration_since(claim.delivered_at) >= min_idle
            })
            .map(|(id, _)| *id)
            .collect();
        stale.sort();

        let mut deliveries = Vec::new();
        for id in stale {
            if deliveries.len() >= max_count {
                break;
            }
            match state.entries.get(&id) {
                Some(payload) => {
                    let claim = group_state
                        .pending
                        .get_mut(&id)
                        .ok_or(QueueError::NotPending(id))?;
                    claim.consumer = consumer.to_string();
                    claim.delivered_at = now;
                    claim.delivery_count += 1;
                    deliveries.push(Delivery {
                        id,
                        payload: payload.clone(),
                    });
                }
                None => {
                    // Entry was deleted (or trimmed): discard the claim
                    // instead of returning a payload-less delivery.
                    group_state.pending.remove(&id);
                }
            }
        }

        Ok(deliveries)
    }

    async fn pending_info(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<u32, QueueError> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .and_then(|group_state| group_state.pending.get(&id))
            .map(|claim| claim.delivery_count)
            .ok_or(QueueError::NotPending(id))
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }
}
