//! Partition-routing, batching producer path (§4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};

use strmkit_protocol::api::{self, ProduceRequest, ProduceResponse};
use strmkit_protocol::record::{Record, RecordBatch};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// How a record without an explicit partition is routed (§4.6).
#[derive(Debug, Clone, Copy)]
pub enum Partitioner {
    /// Hash the key with FNV-1a (64-bit) when present; otherwise round-robin.
    /// Records sharing a key always land on the same partition for a given
    /// partition count.
    KeyHashRoundRobin,
    /// Always route to a fixed partition index; fails with `UnknownPartition`
    /// if that index is outside the configured partition count.
    Specific(i32),
}

/// One record queued for production: a value, an optional key, and optional
/// headers.
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<(String, Bytes)>,
}

impl ProducerRecord {
    #[must_use]
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            value: value.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }
}

struct BufferedRecord {
    record: ProducerRecord,
    completion: oneshot::Sender<Result<i64>>,
}

struct TopicState {
    partition_count: i32,
    round_robin: u32,
    buffer: Vec<BufferedRecord>,
}

impl TopicState {
    fn new() -> Self {
        Self {
            partition_count: 1,
            round_robin: 0,
            buffer: Vec::new(),
        }
    }
}

/// FNV-1a, 64-bit: a fixed, well-known, non-cryptographic hash, chosen
/// because it requires no external dependency and is stable across process
/// restarts and platforms.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Sends records to a topic, choosing partitions and optionally buffering
/// them behind a linger timer before producing one batch per partition.
pub struct Producer {
    connection: Arc<Connection>,
    partitioner: Partitioner,
    linger: Duration,
    batch_size: usize,
    timeout_ms: i32,
    metrics: Arc<dyn Metrics>,
    topics: Mutex<HashMap<String, TopicState>>,
    correlation_hint: AtomicI32,
}

impl Producer {
    #[must_use]
    pub fn new(
        connection: Arc<Connection>,
        partitioner: Partitioner,
        linger: Duration,
        batch_size: usize,
        timeout_ms: i32,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            connection,
            partitioner,
            linger,
            batch_size,
            timeout_ms,
            metrics,
            topics: Mutex::new(HashMap::new()),
            correlation_hint: AtomicI32::new(0),
        }
    }

    /// Sets the known partition count for a topic. Must be called before
    /// producing to a multi-partition topic; defaults to 1.
    pub async fn set_partition_count(&self, topic: &str, count: i32) {
        let mut topics = self.topics.lock().await;
        topics.entry(topic.to_owned()).or_insert_with(TopicState::new).partition_count = count;
    }

    fn choose_partition(&self, topic: &str, state: &mut TopicState, key: Option<&[u8]>) -> Result<i32> {
        if state.partition_count <= 0 {
            return Err(Error::UnknownPartition {
                topic: topic.to_owned(),
                partition: 0,
                available: 0,
            });
        }
        match self.partitioner {
            Partitioner::KeyHashRoundRobin => match key.filter(|k| !k.is_empty()) {
                Some(k) => {
                    let hash = fnv1a64(k);
                    Ok((hash % state.partition_count as u64) as i32)
                }
                None => {
                    let idx = state.round_robin;
                    state.round_robin = if idx + 1 >= state.partition_count as u32 {
                        0
                    } else {
                        idx + 1
                    };
                    Ok(idx as i32)
                }
            },
            Partitioner::Specific(p) => {
                if p < 0 || p >= state.partition_count {
                    return Err(Error::UnknownPartition {
                        topic: topic.to_owned(),
                        partition: p,
                        available: state.partition_count as usize,
                    });
                }
                Ok(p)
            }
        }
    }

    /// Sends one record, returning its assigned offset. Buffers behind the
    /// linger timer when batching is enabled; otherwise produces immediately.
    pub async fn send(self: &Arc<Self>, topic: &str, record: ProducerRecord) -> Result<i64> {
        if self.linger.is_zero() || self.batch_size <= 1 {
            let partition = {
                let mut topics = self.topics.lock().await;
                let state = topics.entry(topic.to_owned()).or_insert_with(TopicState::new);
                self.choose_partition(topic, state, record.key.as_deref())?
            };
            let offsets = self.produce(topic, partition, vec![record]).await?;
            return offsets.into_iter().next().ok_or(Error::Disconnected);
        }

        let (tx, rx) = oneshot::channel();
        let should_flush_now = {
            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_owned()).or_insert_with(TopicState::new);
            let _partition = self.choose_partition(topic, state, record.key.as_deref())?;
            state.buffer.push(BufferedRecord {
                record,
                completion: tx,
            });
            let is_first = state.buffer.len() == 1;
            let full = state.buffer.len() >= self.batch_size;
            if is_first && !full {
                self.spawn_linger_timer(topic.to_owned());
            }
            full
        };
        if should_flush_now {
            self.flush_topic(topic).await?;
        }
        rx.await.map_err(|_| Error::Disconnected)?
    }

    fn spawn_linger_timer(self: &Arc<Self>, topic: String) {
        let producer = Arc::clone(self);
        let linger = self.linger;
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            // A no-op if the buffer was already drained by a size trigger or
            // an explicit flush in the meantime.
            if let Err(e) = producer.flush_topic(&topic).await {
                tracing::warn!(topic, error = %e, "linger-triggered flush failed");
            }
        });
    }

    /// Triggers an immediate flush of a topic's linger buffer, producing one
    /// batch per partition present in the buffer.
    pub async fn flush(&self, topic: &str) -> Result<()> {
        self.flush_topic(topic).await
    }

    /// Flushes every topic with a non-empty buffer.
    pub async fn flush_all(&self) -> Result<()> {
        let names: Vec<String> = {
            let topics = self.topics.lock().await;
            topics
                .iter()
                .filter(|(_, s)| !s.buffer.is_empty())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in names {
            self.flush_topic(&name).await?;
        }
        Ok(())
    }

    async fn flush_topic(&self, topic: &str) -> Result<()> {
        let drained = {
            let mut topics = self.topics.lock().await;
            let Some(state) = topics.get_mut(topic) else {
                return Ok(());
            };
            std::mem::take(&mut state.buffer)
        };
        if drained.is_empty() {
            return Ok(());
        }

        let mut by_partition: HashMap<i32, Vec<BufferedRecord>> = HashMap::new();
        {
            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_owned()).or_insert_with(TopicState::new);
            for buffered in drained {
                let partition = match self.choose_partition(topic, state, buffered.record.key.as_deref()) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = buffered.completion.send(Err(e));
                        continue;
                    }
                };
                by_partition.entry(partition).or_default().push(buffered);
            }
        }

        for (partition, group) in by_partition {
            let records: Vec<ProducerRecord> = group.iter().map(|b| b.record.clone()).collect();
            match self.produce(topic, partition, records).await {
                Ok(offsets) => {
                    for (buffered, offset) in group.into_iter().zip(offsets) {
                        let _ = buffered.completion.send(Ok(offset));
                    }
                }
                Err(e) => {
                    let mut iter = group.into_iter();
                    if let Some(first) = iter.next() {
                        let _ = first.completion.send(Err(e));
                    }
                    for rest in iter {
                        let _ = rest.completion.send(Err(Error::Disconnected));
                    }
                }
            }
        }
        Ok(())
    }

    /// Sends a batch of records to one partition immediately, bypassing the
    /// linger buffer. Returns a contiguous sequence of offsets.
    pub async fn send_batch(self: &Arc<Self>, topic: &str, records: Vec<ProducerRecord>) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let partition = {
            let mut topics = self.topics.lock().await;
            let state = topics.entry(topic.to_owned()).or_insert_with(TopicState::new);
            self.choose_partition(topic, state, records[0].key.as_deref())?
        };
        self.produce(topic, partition, records).await
    }

    async fn produce(&self, topic: &str, partition: i32, records: Vec<ProducerRecord>) -> Result<Vec<i64>> {
        let count = records.len();
        let wire_records: Vec<Record> = records
            .into_iter()
            .map(|r| {
                let mut rec = Record::new(r.value);
                if let Some(key) = r.key {
                    rec = rec.with_key(key);
                }
                for (name, value) in r.headers {
                    rec = rec.with_header(name, value);
                }
                rec
            })
            .collect();

        let now_unix_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let batch = RecordBatch::encode(&wire_records, now_unix_ms, None);

        let request = ProduceRequest {
            timeout_ms: self.timeout_ms,
            topic: topic.to_owned(),
            partition,
            batch,
        };
        let mut buf = bytes::BytesMut::new();
        request.encode(&mut buf);

        self.correlation_hint.fetch_add(1, Ordering::Relaxed);
        self.metrics.request_sent(api::api_key::PRODUCE);
        let response_bytes = self
            .connection
            .send_unary(api::api_key::PRODUCE, api::PRODUCE_VERSION, buf.freeze())
            .await
            .inspect_err(|_| self.metrics.request_failed(api::api_key::PRODUCE))?;
        let mut response_buf = response_bytes;
        let response = ProduceResponse::decode(&mut response_buf)?;

        let base_offset = response
            .topics
            .first()
            .and_then(|t| t.partitions.first())
            .map(|p| p.base_offset)
            .ok_or(Error::Disconnected)?;
        self.metrics.records_produced(topic, count);
        Ok((0..count as i64).map(|i| base_offset + i).collect())
    }
}
