mod support;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use strmkit::ClientConfig;
use strmkit_protocol::api::{api_key, RequestHeader};

use support::{build_produce_response, parse_produce_request};

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(100 * 1024 * 1024)
        .big_endian()
        .new_codec()
}

async fn serve_connection_until_closed(stream: tokio::net::TcpStream, drop_after_one: bool) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, codec());
    let mut writer = FramedWrite::new(write_half, codec());

    while let Some(Ok(frame)) = reader.next().await {
        let mut body = frame.freeze();
        let Ok(header) = RequestHeader::decode(&mut body) else {
            continue;
        };
        if header.api_key != api_key::PRODUCE {
            continue;
        }
        let (topic, partition, _batch) = parse_produce_request(body);
        let response = build_produce_response(&topic, partition, 0);
        let mut out = BytesMut::new();
        out.extend_from_slice(&header.correlation_id.to_be_bytes());
        out.extend_from_slice(&response);
        if writer.send(out.freeze()).await.is_err() {
            return;
        }
        if drop_after_one {
            return; // socket closes here, mid-session from the client's view
        }
    }
}

/// First accepted connection answers one request then disappears; every
/// connection after that serves requests indefinitely, simulating the
/// broker coming back.
async fn accept_loop_fail_once_then_recover(listener: TcpListener) {
    let mut first = true;
    loop {
        let Ok((stream, _peer)) = listener.accept().await else {
            return;
        };
        let drop_after_one = first;
        first = false;
        tokio::spawn(serve_connection_until_closed(stream, drop_after_one));
    }
}

#[tokio::test]
async fn unary_call_fails_when_broker_closes_mid_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(accept_loop_fail_once_then_recover(listener));

    let config = ClientConfig::builder()
        .data_endpoint(addr.to_string())
        .control_endpoint(addr.to_string())
        .enable_auto_reconnect(false)
        .build()
        .unwrap();
    let client = strmkit::Client::connect(config).await.unwrap();
    let producer = client.producer();

    let first = producer
        .send("t", strmkit::ProducerRecord::new(Bytes::from_static(b"first")))
        .await;
    assert!(first.is_ok());

    let second = producer
        .send("t", strmkit::ProducerRecord::new(Bytes::from_static(b"second")))
        .await;
    assert!(matches!(
        second,
        Err(strmkit::Error::Disconnected) | Err(strmkit::Error::Io(_))
    ));

    client.dispose().await;
}

#[tokio::test]
async fn auto_reconnect_recovers_without_caller_intervention() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(accept_loop_fail_once_then_recover(listener));

    let config = ClientConfig::builder()
        .data_endpoint(addr.to_string())
        .control_endpoint(addr.to_string())
        .enable_auto_reconnect(true)
        .max_reconnect_attempts(5u32)
        .reconnect_base_delay(std::time::Duration::from_millis(20))
        .build()
        .unwrap();
    let client = strmkit::Client::connect(config).await.unwrap();
    let producer = client.producer();

    // This call's connection is torn down by the broker right after the
    // response lands, kicking off the background reconnect loop.
    let first = producer
        .send("t", strmkit::ProducerRecord::new(Bytes::from_static(b"first")))
        .await;
    assert!(first.is_ok());

    // Give the reconnect loop a moment to redial the listener's second
    // accepted connection (which serves forever).
    let mut last_err = None;
    let mut recovered = false;
    for _ in 0..50 {
        match producer
            .send("t", strmkit::ProducerRecord::new(Bytes::from_static(b"retry")))
            .await
        {
            Ok(_) => {
                recovered = true;
                break;
            }
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        }
    }
    assert!(recovered, "producer never recovered after reconnect, last error: {last_err:?}");

    client.dispose().await;
}
