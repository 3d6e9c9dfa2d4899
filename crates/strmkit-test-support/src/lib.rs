//! An in-process mock broker for exercising `strmkit` without a real
//! cluster, adapted from the reference mock WebSocket server to this
//! crate's raw length-prefixed binary framing.
//!
//! Binds to `127.0.0.1:0`, accepts connections in a background task, and
//! lets tests script exact response byte sequences per API key.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use strmkit_protocol::api::RequestHeader;

const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Produces zero or more response bodies (correlation id excluded — the
/// broker prepends it) for a single request body (request header excluded —
/// already consumed by the dispatcher). Multiple bodies are sent as
/// separate frames sharing the request's correlation id, matching the
/// broker's streaming behavior.
pub type RouteHandler = Arc<dyn Fn(Bytes) -> Vec<Bytes> + Send + Sync>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .big_endian()
        .new_codec()
}

/// A mock broker for integration testing.
///
/// Each test spins up its own isolated instance bound to a random port.
pub struct MockBroker {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
pub struct MockBrokerBuilder {
    routes: HashMap<i16, RouteHandler>,
}

impl MockBrokerBuilder {
    #[must_use]
    pub fn route(mut self, api_key: i16, handler: impl Fn(Bytes) -> Vec<Bytes> + Send + Sync + 'static) -> Self {
        self.routes.insert(api_key, Arc::new(handler));
        self
    }

    /// Convenience for a route that always returns the same single response
    /// body regardless of the request.
    #[must_use]
    pub fn route_static(self, api_key: i16, response: Bytes) -> Self {
        self.route(api_key, move |_body| vec![response.clone()])
    }

    pub async fn start(self) -> std::io::Result<MockBroker> {
        MockBroker::start(self.routes).await
    }
}

impl MockBroker {
    #[must_use]
    pub fn builder() -> MockBrokerBuilder {
        MockBrokerBuilder::default()
    }

    /// Starts the broker, binding to a random available port. Returns once
    /// the listener is bound; connections are handled in background tasks.
    pub async fn start(routes: HashMap<i16, RouteHandler>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let routes = Arc::new(routes);

        let task = tokio::spawn(async move {
            Self::accept_loop(listener, routes).await;
        });

        Ok(Self { addr, _task: task })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    async fn accept_loop(listener: TcpListener, routes: Arc<HashMap<i16, RouteHandler>>) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    let routes = Arc::clone(&routes);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, routes).await {
                            tracing::debug!(error = %e, "mock broker connection ended");
                        }
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        routes: Arc<HashMap<i16, RouteHandler>>,
    ) -> std::io::Result<()> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, codec());
        let mut writer = FramedWrite::new(write_half, codec());

        while let Some(frame) = reader.next().await {
            let mut body = frame?.freeze();
            let header = match RequestHeader::decode(&mut body) {
                Ok(h) => h,
                Err(_) => continue,
            };

            let Some(handler) = routes.get(&header.api_key) else {
                continue;
            };
            for response_body in handler(body.clone()) {
                let mut out = BytesMut::with_capacity(4 + response_body.len());
                out.put_i32(header.correlation_id);
                out.put_slice(&response_body);
                writer.send(out.freeze()).await?;
            }
        }
        Ok(())
    }
}
