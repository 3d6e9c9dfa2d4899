//! The multiplexed connection: correlation-ID allocation, the single write
//! lock, the reader task, and the reconnect state machine (§4.3).

pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use strmkit_protocol::api::{RequestHeader, ResponseHeader};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::resilience::ReconnectPolicy;
use transport::{FrameReader, FrameWriter};

/// Connection lifecycle (§3, §4.3). Transitions happen only through
/// [`Connection::set_state_if`]; an attempted transition from a state not in
/// the caller's allow-list is a no-op, matching "illegal transitions are
/// treated as no-ops" (e.g. connecting from already-connected).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// A lightweight, cloneable error used to fan a single failure out to every
/// pending completion and every open streaming sink at once. Converted to
/// the full [`Error`] at each call site.
#[derive(Debug, Clone)]
enum SinkError {
    Disconnected,
    Protocol(String),
}

impl From<SinkError> for Error {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Disconnected => Error::Disconnected,
            SinkError::Protocol(msg) => {
                Error::Protocol(strmkit_protocol::Error::MalformedFrame(msg))
            }
        }
    }
}

type PendingBody = std::result::Result<Bytes, SinkError>;

pub struct Connection {
    role: &'static str,
    endpoint: String,
    use_tls: bool,
    client_id: Option<String>,
    connection_timeout: Duration,
    request_timeout: Duration,
    enable_auto_reconnect: bool,
    reconnect_policy: ReconnectPolicy,
    metrics: Arc<dyn Metrics>,

    state: Mutex<ConnectionState>,
    writer: Mutex<Option<FrameWriter>>,
    correlation: AtomicU32,
    oneshots: Mutex<HashMap<u32, oneshot::Sender<PendingBody>>>,
    streams: Mutex<HashMap<u32, mpsc::Sender<PendingBody>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    last_success: Mutex<Option<Instant>>,
}

impl Connection {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: &'static str,
        endpoint: String,
        use_tls: bool,
        client_id: Option<String>,
        connection_timeout: Duration,
        request_timeout: Duration,
        enable_auto_reconnect: bool,
        reconnect_policy: ReconnectPolicy,
        metrics: Arc<dyn Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            role,
            endpoint,
            use_tls,
            client_id,
            connection_timeout,
            request_timeout,
            enable_auto_reconnect,
            reconnect_policy,
            metrics,
            state: Mutex::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            correlation: AtomicU32::new(0),
            oneshots: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            reader_task: Mutex::new(None),
            last_success: Mutex::new(None),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    async fn set_state_if(&self, allowed_from: &[ConnectionState], to: ConnectionState) -> bool {
        let mut state = self.state.lock().await;
        if allowed_from.contains(&state) {
            *state = to;
            true
        } else {
            false
        }
    }

    fn next_correlation(&self) -> u32 {
        let id = self.correlation.fetch_add(1, Ordering::SeqCst) + 1;
        if id == 0 {
            // wrapped past u32::MAX; restart the sequence from 1.
            self.correlation.store(1, Ordering::SeqCst);
            1
        } else {
            id
        }
    }

    /// Dials the endpoint and spawns the reader task. A connect attempted
    /// while already `Connecting`/`Connected` is a legality no-op.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if !self
            .set_state_if(
                &[ConnectionState::Disconnected, ConnectionState::Failed],
                ConnectionState::Connecting,
            )
            .await
        {
            return Ok(());
        }
        match transport::dial(&self.endpoint, self.use_tls, self.connection_timeout).await {
            Ok((reader, writer)) => {
                *self.writer.lock().await = Some(writer);
                self.spawn_reader(reader);
                self.set_state_if(&[ConnectionState::Connecting], ConnectionState::Connected)
                    .await;
                self.metrics.connection_opened(self.role);
                Ok(())
            }
            Err(e) => {
                self.set_state_if(&[ConnectionState::Connecting], ConnectionState::Failed)
                    .await;
                Err(e)
            }
        }
    }

    fn spawn_reader(self: &Arc<Self>, reader: FrameReader) {
        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move { conn.reader_loop(reader).await });
        // Replacing without aborting the previous handle is safe: a reader
        // task only ever exists while Connected, and we only get here right
        // after dialing a fresh socket.
        if let Ok(mut slot) = self.reader_task.try_lock() {
            *slot = Some(handle);
        }
    }

    async fn reader_loop(self: Arc<Self>, mut reader: FrameReader) {
        loop {
            match reader.next().await {
                Some(Ok(frame)) => {
                    let mut body = frame.freeze();
                    match ResponseHeader::decode(&mut body) {
                        Ok(header) => {
                            *self.last_success.lock().await = Some(Instant::now());
                            self.dispatch(header.correlation_id as u32, body).await;
                        }
                        Err(e) => {
                            tracing::warn!(role = self.role, error = %e, "malformed response header, tearing down connection");
                            self.teardown(SinkError::Protocol(e.to_string())).await;
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(role = self.role, error = %e, "read error, tearing down connection");
                    self.teardown(SinkError::Disconnected).await;
                    return;
                }
                None => {
                    tracing::info!(role = self.role, "peer closed the connection");
                    self.teardown(SinkError::Disconnected).await;
                    return;
                }
            }
        }
    }

    /// Dispatch rules for an inbound frame (§4.3): streaming sink first, then
    /// one-shot completion, then a logged-and-dropped stray response.
    async fn dispatch(&self, correlation_id: u32, body: Bytes) {
        let stream_sender = {
            let streams = self.streams.lock().await;
            streams.get(&correlation_id).cloned()
        };
        if let Some(sender) = stream_sender {
            // Blocking here on a full channel is the intended backpressure:
            // it stalls the single reader, which stalls the socket read,
            // which throttles the broker's send rate.
            if sender.send(Ok(body)).await.is_err() {
                self.streams.lock().await.remove(&correlation_id);
            }
            return;
        }

        let oneshot_sender = self.oneshots.lock().await.remove(&correlation_id);
        if let Some(tx) = oneshot_sender {
            let _ = tx.send(Ok(body));
            return;
        }

        tracing::warn!(role = self.role, correlation_id, "stray response, dropping frame");
    }

    async fn teardown(self: &Arc<Self>, err: SinkError) {
        self.set_state_if(&[ConnectionState::Connected], ConnectionState::Disconnected)
            .await;

        let mut oneshots = self.oneshots.lock().await;
        for (_, tx) in oneshots.drain() {
            let _ = tx.send(Err(err.clone()));
        }
        drop(oneshots);

        let mut streams = self.streams.lock().await;
        for (_, sender) in streams.drain() {
            let _ = sender.try_send(Err(err.clone()));
        }
        drop(streams);

        *self.writer.lock().await = None;
        self.metrics.connection_closed(self.role);

        if self.enable_auto_reconnect
            && self
                .set_state_if(&[ConnectionState::Disconnected], ConnectionState::Reconnecting)
                .await
        {
            let conn = Arc::clone(self);
            tokio::spawn(async move { conn.reconnect_loop().await });
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        for attempt in 1..=self.reconnect_policy.max_attempts {
            tokio::time::sleep(self.reconnect_policy.delay_for_attempt(attempt)).await;
            tracing::info!(role = self.role, attempt, "attempting reconnect");
            match transport::dial(&self.endpoint, self.use_tls, self.connection_timeout).await {
                Ok((reader, writer)) => {
                    *self.writer.lock().await = Some(writer);
                    self.spawn_reader(reader);
                    self.set_state_if(&[ConnectionState::Reconnecting], ConnectionState::Connected)
                        .await;
                    self.metrics.connection_opened(self.role);
                    return;
                }
                Err(e) => {
                    tracing::warn!(role = self.role, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
        self.set_state_if(&[ConnectionState::Reconnecting], ConnectionState::Failed)
            .await;
        tracing::error!(role = self.role, "reconnect attempts exhausted");
    }

    fn build_frame(&self, api_key: i16, api_version: i16, correlation_id: u32, body: Bytes) -> Bytes {
        let header = RequestHeader {
            api_key,
            api_version,
            correlation_id: correlation_id as i32,
            client_id: self.client_id.clone(),
        };
        let mut buf = BytesMut::with_capacity(16 + body.len());
        header.encode(&mut buf);
        buf.extend_from_slice(&body);
        buf.freeze()
    }

    /// Sends one request and awaits its single response. Registration
    /// happens before the bytes are written, under the same write-lock
    /// critical section, so a same-host response can never race ahead of
    /// its own completion slot.
    pub async fn send_unary(self: &Arc<Self>, api_key: i16, api_version: i16, body: Bytes) -> Result<Bytes> {
        let correlation_id = self.next_correlation();
        let (tx, rx) = oneshot::channel();
        self.oneshots.lock().await.insert(correlation_id, tx);

        let frame = self.build_frame(api_key, api_version, correlation_id, body);
        {
            let mut writer = self.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                self.oneshots.lock().await.remove(&correlation_id);
                return Err(Error::Disconnected);
            };
            if let Err(e) = sink.send(frame).await {
                self.oneshots.lock().await.remove(&correlation_id);
                self.teardown(SinkError::Disconnected).await;
                return Err(Error::Io(e));
            }
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(body))) => Ok(body),
            Ok(Ok(Err(sink_err))) => Err(sink_err.into()),
            Ok(Err(_recv_error)) => Err(Error::Disconnected),
            Err(_elapsed) => {
                self.oneshots.lock().await.remove(&correlation_id);
                Err(Error::Timeout(self.request_timeout))
            }
        }
    }

    /// Opens a streaming session: one request, an unbounded series of
    /// correlated responses delivered into a bounded channel of the given
    /// capacity.
    pub async fn open_stream(
        self: &Arc<Self>,
        api_key: i16,
        api_version: i16,
        body: Bytes,
        capacity: usize,
    ) -> Result<(u32, mpsc::Receiver<Result<Bytes>>)> {
        let correlation_id = self.next_correlation();
        let (tx, rx) = mpsc::channel(capacity);
        self.streams.lock().await.insert(correlation_id, tx);

        let frame = self.build_frame(api_key, api_version, correlation_id, body);
        {
            let mut writer = self.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                self.streams.lock().await.remove(&correlation_id);
                return Err(Error::Disconnected);
            };
            if let Err(e) = sink.send(frame).await {
                self.streams.lock().await.remove(&correlation_id);
                self.teardown(SinkError::Disconnected).await;
                return Err(Error::Io(e));
            }
        }

        Ok((correlation_id, map_stream_errors(rx)))
    }

    /// Closes a streaming session from the caller's side: removes the
    /// registration so any late-arriving frame for this correlation is
    /// treated as stray (§4.3 cancellation).
    pub async fn close_stream(&self, correlation_id: u32) {
        self.streams.lock().await.remove(&correlation_id);
    }

    /// Cancels a pending unary call's registration so a late response is
    /// treated as stray instead of completing a dead future.
    pub async fn cancel_unary(&self, correlation_id: u32) {
        self.oneshots.lock().await.remove(&correlation_id);
    }

    /// Cancels the reader task and drops the socket.
    pub async fn dispose(self: &Arc<Self>) {
        if let Some(handle) = self.reader_task.lock().await.take() {
            handle.abort();
        }
        *self.writer.lock().await = None;
        *self.state.lock().await = ConnectionState::Disconnected;
        self.metrics.connection_closed(self.role);
    }
}

/// Re-wraps the internal `SinkError` channel as the public `Result<Bytes>`
/// channel consumers see, without exposing `SinkError` outside this module.
fn map_stream_errors(mut rx: mpsc::Receiver<PendingBody>) -> mpsc::Receiver<Result<Bytes>> {
    let (tx, out_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let mapped = item.map_err(Error::from);
            if tx.send(mapped).await.is_err() {
                break;
            }
        }
    });
    out_rx
}
