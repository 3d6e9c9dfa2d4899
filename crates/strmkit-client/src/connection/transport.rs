//! Socket dial + optional TLS wrap, split into independent read/write halves
//! so the connection can hold the write half behind a single lock while the
//! reader task owns the read half outright (§4.3: the write lock guarantees
//! non-interleaving; reads are naturally serialized by the single reader).

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use strmkit_protocol::frame::MAX_FRAME_SIZE;

use crate::error::{Error, Result};

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

pub type FrameReader = FramedRead<BoxedReader, LengthDelimitedCodec>;
pub type FrameWriter = FramedWrite<BoxedWriter, LengthDelimitedCodec>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE as usize)
        .big_endian()
        .new_codec()
}

/// Dials `endpoint`, optionally negotiating TLS, and returns the split
/// framed halves ready for the reader task and the write-locked sender.
pub async fn dial(
    endpoint: &str,
    use_tls: bool,
    connection_timeout: std::time::Duration,
) -> Result<(FrameReader, FrameWriter)> {
    let connect = TcpStream::connect(endpoint);
    let tcp = tokio::time::timeout(connection_timeout, connect)
        .await
        .map_err(|_| Error::ConnectionFailed {
            endpoint: endpoint.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|e| Error::ConnectionFailed {
            endpoint: endpoint.to_owned(),
            source: e,
        })?;
    tcp.set_nodelay(true).ok();

    let (reader, writer): (BoxedReader, BoxedWriter) = if use_tls {
        let host = endpoint
            .rsplit_once(':')
            .map(|(h, _)| h)
            .unwrap_or(endpoint)
            .to_owned();
        let tls_stream = wrap_tls(tcp, &host).await?;
        let (r, w) = tokio::io::split(tls_stream);
        (Box::new(r), Box::new(w))
    } else {
        let (r, w) = tokio::io::split(tcp);
        (Box::new(r), Box::new(w))
    };

    Ok((FramedRead::new(reader, codec()), FramedWrite::new(writer, codec())))
}

async fn wrap_tls(
    tcp: TcpStream,
    host: &str,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let server_name = rustls::pki_types::ServerName::try_from(host.to_owned())
        .map_err(|_| Error::InvalidConfiguration(format!("invalid TLS server name: {host}")))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::ConnectionFailed {
            endpoint: host.to_owned(),
            source: e,
        })
}
