//! Persistent streaming consumer with bounded backpressure and offset
//! commit (§4.7).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use strmkit_protocol::api::{
    self, FetchConsumerOffsetsRequest, FetchConsumerOffsetsResponse, Isolation, StreamFetchFrame,
    StreamFetchRequest, UpdateConsumerOffsetRequest, UpdateConsumerOffsetResponse,
};
use strmkit_protocol::record::DecodedRecord;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// How to pick a starting offset when the caller doesn't supply one
/// explicitly (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
    StoredOrEarliest,
    StoredOrLatest,
}

const LATEST_OFFSET: i64 = -1;
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Configuration for an individual `stream()` call's auto-commit behavior.
#[derive(Debug, Clone)]
pub struct AutoCommit {
    pub consumer_id: String,
    pub commit_interval: Duration,
}

pub struct Consumer {
    connection: Arc<Connection>,
    metrics: Arc<dyn Metrics>,
}

impl Consumer {
    #[must_use]
    pub fn new(connection: Arc<Connection>, metrics: Arc<dyn Metrics>) -> Self {
        Self { connection, metrics }
    }

    /// Resolves an `OffsetReset` strategy against a stored offset, if any.
    async fn resolve_offset(
        &self,
        reset: OffsetReset,
        consumer_id: &str,
        topic: &str,
        partition: i32,
    ) -> Result<i64> {
        match reset {
            OffsetReset::Earliest => Ok(0),
            OffsetReset::Latest => Ok(LATEST_OFFSET),
            OffsetReset::StoredOrEarliest | OffsetReset::StoredOrLatest => {
                let stored = self.fetch_last_offset(consumer_id, topic, partition).await?;
                match stored {
                    Some(offset) => Ok(offset + 1),
                    None if reset == OffsetReset::StoredOrEarliest => Ok(0),
                    None => Ok(LATEST_OFFSET),
                }
            }
        }
    }

    /// Opens an infinite, non-restartable streaming session. Each call opens
    /// a fresh broker-side session; the returned receiver ends only when the
    /// session is cancelled or the broker reports a `StreamError`.
    pub async fn stream(
        self: &Arc<Self>,
        topic: &str,
        partition: i32,
        offset: Option<i64>,
        reset: OffsetReset,
        consumer_id: Option<String>,
        auto_commit: Option<AutoCommit>,
    ) -> Result<mpsc::Receiver<Result<DecodedRecord>>> {
        let start_offset = match offset {
            Some(o) => o,
            None => {
                self.resolve_offset(
                    reset,
                    consumer_id.as_deref().unwrap_or(""),
                    topic,
                    partition,
                )
                .await?
            }
        };

        let request = StreamFetchRequest {
            topic: topic.to_owned(),
            partition,
            start_offset,
            max_bytes: 1024 * 1024,
            isolation: Isolation::ReadUncommitted,
            consumer_id: consumer_id.clone(),
        };
        let mut buf = bytes::BytesMut::new();
        request.encode(&mut buf);

        let (correlation_id, mut raw_rx) = self
            .connection
            .open_stream(
                api::api_key::STREAM_FETCH,
                api::STREAM_FETCH_VERSION,
                buf.freeze(),
                STREAM_CHANNEL_CAPACITY,
            )
            .await?;

        let (out_tx, out_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let connection = Arc::clone(&self.connection);
        let metrics = Arc::clone(&self.metrics);
        let topic = topic.to_owned();

        tokio::spawn(async move {
            let last_offset = AtomicI64::new(start_offset - 1);
            let mut last_committed: Option<i64> = None;
            let mut last_commit_at = Instant::now();
            // Populated from the first decoded frame; commits are scoped to
            // the broker-assigned stream session, not the client's local
            // correlation id.
            let mut stream_id: Option<u32> = None;

            while let Some(frame) = raw_rx.recv().await {
                let bytes = match frame {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = out_tx.send(Err(e)).await;
                        break;
                    }
                };
                let mut body = bytes;
                let decoded = match StreamFetchFrame::decode(&mut body) {
                    Ok(f) => f,
                    Err(e) => {
                        let _ = out_tx.send(Err(Error::from(e))).await;
                        break;
                    }
                };
                if stream_id.is_none() {
                    stream_id = Some(decoded.stream_id);
                }
                for batch in &decoded.batches {
                    metrics.records_consumed(&topic, batch.records.len());
                    for record in batch.decoded_records() {
                        last_offset.store(record.offset, Ordering::SeqCst);
                        if out_tx.send(Ok(record)).await.is_err() {
                            connection.close_stream(correlation_id).await;
                            return;
                        }
                    }
                }

                if let (Some(ref ac), Some(session_id)) = (auto_commit.as_ref(), stream_id) {
                    let current = last_offset.load(Ordering::SeqCst);
                    let should_commit = last_committed.map(|c| c != current).unwrap_or(true);
                    if should_commit && last_commit_at.elapsed() >= ac.commit_interval {
                        let commit_req = UpdateConsumerOffsetRequest {
                            session_id,
                            offset: current,
                        };
                        let mut commit_buf = bytes::BytesMut::new();
                        commit_req.encode(&mut commit_buf);
                        if connection
                            .send_unary(
                                api::api_key::UPDATE_CONSUMER_OFFSET,
                                api::UPDATE_CONSUMER_OFFSET_VERSION,
                                commit_buf.freeze(),
                            )
                            .await
                            .is_ok()
                        {
                            last_committed = Some(current);
                            last_commit_at = Instant::now();
                        }
                    }
                }
            }

            if let (Some(_), Some(session_id)) = (auto_commit.as_ref(), stream_id) {
                let current = last_offset.load(Ordering::SeqCst);
                if current >= start_offset {
                    let commit_req = UpdateConsumerOffsetRequest {
                        session_id,
                        offset: current,
                    };
                    let mut commit_buf = bytes::BytesMut::new();
                    commit_req.encode(&mut commit_buf);
                    let _ = connection
                        .send_unary(
                            api::api_key::UPDATE_CONSUMER_OFFSET,
                            api::UPDATE_CONSUMER_OFFSET_VERSION,
                            commit_buf.freeze(),
                        )
                        .await;
                }
            }
        });

        Ok(out_rx)
    }

    /// Fetches a single finite batch of records starting at `offset`.
    pub async fn fetch_batch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_bytes: i32,
    ) -> Result<Vec<DecodedRecord>> {
        let request = StreamFetchRequest {
            topic: topic.to_owned(),
            partition,
            start_offset: offset,
            max_bytes,
            isolation: Isolation::ReadUncommitted,
            consumer_id: None,
        };
        let mut buf = bytes::BytesMut::new();
        request.encode(&mut buf);

        let (correlation_id, mut raw_rx) = self
            .connection
            .open_stream(api::api_key::STREAM_FETCH, api::STREAM_FETCH_VERSION, buf.freeze(), 1)
            .await?;

        let result = match raw_rx.recv().await {
            Some(Ok(bytes)) => {
                let mut body = bytes;
                let frame = StreamFetchFrame::decode(&mut body)?;
                Ok(frame
                    .batches
                    .iter()
                    .flat_map(strmkit_protocol::record::RecordBatch::decoded_records)
                    .collect())
            }
            Some(Err(e)) => Err(Error::from(e)),
            None => Err(Error::Disconnected),
        };
        self.connection.close_stream(correlation_id).await;
        result
    }

    /// Fetches the last committed offset for a consumer, if any (API key =
    /// 1005, the fetch-consumer-offsets request).
    pub async fn fetch_last_offset(
        &self,
        consumer_id: &str,
        topic: &str,
        partition: i32,
    ) -> Result<Option<i64>> {
        let request = FetchConsumerOffsetsRequest {
            consumer_id: consumer_id.to_owned(),
            topic: topic.to_owned(),
            partition,
        };
        let mut buf = bytes::BytesMut::new();
        request.encode(&mut buf);
        let response_bytes = self
            .connection
            .send_unary(
                api::api_key::FETCH_CONSUMER_OFFSETS,
                api::FETCH_CONSUMER_OFFSETS_VERSION,
                buf.freeze(),
            )
            .await?;
        let mut response_buf = response_bytes;
        let response = FetchConsumerOffsetsResponse::decode(&mut response_buf)?;
        Ok(response.offset)
    }

    /// Commits an offset for a consumer/session explicitly (API key = 1006).
    pub async fn commit_offset(&self, session_id: u32, offset: i64) -> Result<()> {
        let request = UpdateConsumerOffsetRequest { session_id, offset };
        let mut buf = bytes::BytesMut::new();
        request.encode(&mut buf);
        let response_bytes = self
            .connection
            .send_unary(
                api::api_key::UPDATE_CONSUMER_OFFSET,
                api::UPDATE_CONSUMER_OFFSET_VERSION,
                buf.freeze(),
            )
            .await?;
        let mut response_buf = response_bytes;
        let _response = UpdateConsumerOffsetResponse::decode(&mut response_buf)?;
        Ok(())
    }
}
