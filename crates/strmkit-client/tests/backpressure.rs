mod support;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use strmkit::ClientConfig;
use strmkit_protocol::api::api_key;
use strmkit_protocol::record::{Record, RecordBatch};
use strmkit_test_support::MockBroker;

use support::{build_stream_fetch_frame, parse_stream_fetch_request};

/// 200 records are already sitting on the broker side as 200 single-record
/// frames sharing one stream session; a slow consumer sleeps between reads.
/// The bounded output channel must never grow past its configured capacity,
/// and every record must still arrive in order.
#[tokio::test]
async fn slow_consumer_is_backpressured_without_losing_frames() {
    const TOTAL: usize = 200;

    let broker = MockBroker::builder()
        .route(api_key::STREAM_FETCH, move |body| {
            let req = parse_stream_fetch_request(body);
            (req.start_offset as usize..TOTAL)
                .map(|i| {
                    let record = Record::new(Bytes::from(format!("record-{i}")));
                    let batch = RecordBatch::encode(&[record], 0, None);
                    build_stream_fetch_frame(&req.topic, req.partition, TOTAL as i64, &[batch])
                })
                .collect()
        })
        .start()
        .await
        .unwrap();

    let config = ClientConfig::builder()
        .data_endpoint(broker.endpoint())
        .control_endpoint(broker.endpoint())
        .build()
        .unwrap();
    let client = strmkit::Client::connect(config).await.unwrap();
    let consumer = client.consumer();

    let mut rx = consumer
        .stream("t", 0, Some(0), strmkit::OffsetReset::Earliest, None, None)
        .await
        .unwrap();

    assert!(
        strmkit::consumer::STREAM_CHANNEL_CAPACITY <= TOTAL,
        "this test needs the broker to out-produce the bounded channel"
    );

    let mut received = Vec::with_capacity(TOTAL);
    while received.len() < TOTAL {
        let record = rx.recv().await.unwrap().unwrap();
        received.push(record);
        if received.len() % 10 == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    assert_eq!(received.len(), TOTAL);
    for (i, record) in received.iter().enumerate() {
        assert_eq!(record.value, Bytes::from(format!("record-{i}")), "record {i} out of order or lost");
    }

    client.dispose().await;
}
