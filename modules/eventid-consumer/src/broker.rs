//! Broker seam and the in-process partitioned log.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use eventid_common::{EventEnvelope, EventIdError};
use eventid_engine::EventPublisher;
use tokio::sync::{Mutex, Notify};

/// One message as delivered to a consumer group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// An ordered, at-least-once stream of deliveries for one consumer group
/// member. Uncommitted deliveries come back after a restart or rebalance.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// The next delivery, or `None` once the source is closed.
    async fn next(&self) -> Result<Option<Delivery>, EventIdError>;

    /// Acknowledge `delivery` and everything before it on its partition.
    async fn commit(&self, delivery: &Delivery) -> Result<(), EventIdError>;
}

pub fn partition_for(key: &str, partitions: usize) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as i32
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Record {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Log {
    partitions: Vec<Vec<Record>>,
    /// Next offset to read, per (group, partition).
    committed: HashMap<(String, i32), i64>,
    closed: bool,
}

/// A partitioned in-process log with consumer-group offsets.
///
/// `close` makes consumers return `None` once they have caught up, which is
/// how tests bound an ingestor run. `rewind` moves a group's committed offset
/// back, simulating a crash before acknowledgement.
pub struct MemoryBroker {
    topic: String,
    log: Mutex<Log>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new(topic: impl Into<String>, partitions: usize) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.into(),
            log: Mutex::new(Log {
                partitions: vec![Vec::new(); partitions.max(1)],
                ..Log::default()
            }),
            notify: Notify::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn partition_count(&self) -> usize {
        self.log.lock().await.partitions.len()
    }

    /// Append raw bytes to a partition. Returns the offset.
    pub async fn publish_raw(&self, partition: i32, key: Option<&str>, payload: Vec<u8>) -> i64 {
        let offset = {
            let mut log = self.log.lock().await;
            let count = log.partitions.len();
            let slot = &mut log.partitions[(partition.max(0) as usize) % count];
            slot.push(Record {
                key: key.map(str::to_string),
                payload,
            });
            slot.len() as i64 - 1
        };
        self.notify.notify_waiters();
        offset
    }

    pub async fn close(&self) {
        self.log.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Committed (next-to-read) offset of `group` on `partition`.
    pub async fn committed(&self, group: &str, partition: i32) -> i64 {
        self.log
            .lock()
            .await
            .committed
            .get(&(group.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    pub async fn rewind(&self, group: &str, partition: i32, offset: i64) {
        self.log
            .lock()
            .await
            .committed
            .insert((group.to_string(), partition), offset.max(0));
    }

    /// Every decodable envelope on the topic, partition by partition.
    pub async fn envelopes(&self) -> Vec<EventEnvelope> {
        self.log
            .lock()
            .await
            .partitions
            .iter()
            .flatten()
            .filter_map(|r| EventEnvelope::decode(&r.payload).ok())
            .collect()
    }

    /// A new group member starting at the group's committed offsets.
    pub async fn consumer(self: &Arc<Self>, group: impl Into<String>) -> MemoryConsumer {
        let group = group.into();
        let positions = {
            let log = self.log.lock().await;
            (0..log.partitions.len() as i32)
                .map(|p| {
                    log.committed
                        .get(&(group.clone(), p))
                        .copied()
                        .unwrap_or(0)
                })
                .collect()
        };
        MemoryConsumer {
            broker: self.clone(),
            group,
            cursor: Mutex::new(Cursor {
                positions,
                next_partition: 0,
            }),
        }
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(&self, event: &EventEnvelope) -> Result<(), EventIdError> {
        let payload = event.encode()?;
        let key = event.partition_key();
        let partition = partition_for(key, self.partition_count().await);
        self.publish_raw(partition, Some(key), payload).await;
        Ok(())
    }
}

struct Cursor {
    positions: Vec<i64>,
    next_partition: usize,
}

pub struct MemoryConsumer {
    broker: Arc<MemoryBroker>,
    group: String,
    cursor: Mutex<Cursor>,
}

#[async_trait]
impl MessageSource for MemoryConsumer {
    async fn next(&self) -> Result<Option<Delivery>, EventIdError> {
        loop {
            let notified = self.broker.notify.notified();
            {
                let log = self.broker.log.lock().await;
                let mut cursor = self.cursor.lock().await;
                let count = log.partitions.len();

                // Round-robin so one busy partition cannot starve the others.
                for i in 0..count {
                    let partition = (cursor.next_partition + i) % count;
                    let position = cursor.positions[partition];
                    if let Some(record) = log.partitions[partition].get(position as usize) {
                        cursor.positions[partition] = position + 1;
                        cursor.next_partition = (partition + 1) % count;
                        return Ok(Some(Delivery {
                            topic: self.broker.topic.clone(),
                            partition: partition as i32,
                            offset: position,
                            key: record.key.clone(),
                            payload: record.payload.clone(),
                        }));
                    }
                }
                if log.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    async fn commit(&self, delivery: &Delivery) -> Result<(), EventIdError> {
        let mut log = self.broker.log.lock().await;
        let next = delivery.offset + 1;
        let entry = log
            .committed
            .entry((self.group.clone(), delivery.partition))
            .or_insert(0);
        *entry = (*entry).max(next);
        Ok(())
    }
}
