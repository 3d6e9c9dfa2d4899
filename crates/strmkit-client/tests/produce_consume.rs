mod support;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use strmkit::{ClientConfig, ProducerRecord};
use strmkit_protocol::api::api_key;
use strmkit_protocol::record::{Record, RecordBatch};
use strmkit_test_support::MockBroker;

use support::{build_produce_response, build_stream_fetch_frame, parse_produce_request, parse_stream_fetch_request};

#[tokio::test]
async fn produce_then_fetch_batch_returns_contiguous_offsets() {
    let log: Arc<std::sync::Mutex<Vec<Record>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let next_offset = Arc::new(AtomicI64::new(0));

    let produce_log = Arc::clone(&log);
    let produce_offset = Arc::clone(&next_offset);
    let fetch_log = Arc::clone(&log);

    let broker = MockBroker::builder()
        .route(api_key::PRODUCE, move |body| {
            let (topic, partition, batch) = parse_produce_request(body);
            let mut region = batch;
            let decoded = RecordBatch::decode(&mut region).unwrap();
            let base_offset = produce_offset.fetch_add(decoded.records.len() as i64, Ordering::SeqCst);
            produce_log.lock().unwrap().extend(decoded.records);
            vec![build_produce_response(&topic, partition, base_offset)]
        })
        .route(api_key::STREAM_FETCH, move |body| {
            let req = parse_stream_fetch_request(body);
            let records = fetch_log.lock().unwrap();
            let slice = &records[req.start_offset as usize..];
            let batch = RecordBatch::encode(slice, 0, None);
            vec![build_stream_fetch_frame(&req.topic, req.partition, records.len() as i64, &[batch])]
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

    let producer = client.producer();
    let mut offsets = Vec::new();
    for value in ["m1", "m2", "m3"] {
        offsets.push(producer.send("t", ProducerRecord::new(Bytes::from_static(value.as_bytes()))).await.unwrap());
    }
    assert_eq!(offsets, vec![0, 1, 2]);

    let consumer = client.consumer();
    let fetched = consumer.fetch_batch("t", 0, 0, 1024 * 1024).await.unwrap();
    assert_eq!(fetched.len(), 3);
    assert_eq!(fetched[0].offset, 0);
    assert_eq!(fetched[1].offset, 1);
    assert_eq!(fetched[2].offset, 2);
    assert_eq!(&fetched[0].value[..], b"m1");
    assert_eq!(&fetched[1].value[..], b"m2");
    assert_eq!(&fetched[2].value[..], b"m3");

    client.dispose().await;
}

#[tokio::test]
async fn linger_batches_records_into_one_produce_call() {
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let calls_in_handler = Arc::clone(&calls);

    let broker = MockBroker::builder()
        .route(api_key::PRODUCE, move |body| {
            calls_in_handler.fetch_add(1, Ordering::SeqCst);
            let (topic, partition, batch) = parse_produce_request(body);
            let mut region = batch;
            let decoded = RecordBatch::decode(&mut region).unwrap();
            assert_eq!(decoded.records.len(), 3, "expected the whole batch in a single produce call");
            vec![build_produce_response(&topic, partition, 0)]
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
    let producer = client.producer_with_batching(
        strmkit::Partitioner::Specific(0),
        Duration::from_millis(50),
        3,
    );
    producer.set_partition_count("t", 1).await;

    let p = Arc::clone(&producer);
    let a = tokio::spawn({
        let p = Arc::clone(&p);
        async move { p.send("t", ProducerRecord::new(Bytes::from_static(b"a"))).await }
    });
    let b = tokio::spawn({
        let p = Arc::clone(&p);
        async move { p.send("t", ProducerRecord::new(Bytes::from_static(b"b"))).await }
    });
    let c = tokio::spawn(async move { p.send("t", ProducerRecord::new(Bytes::from_static(b"c"))).await });

    let mut offsets = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap(), c.await.unwrap().unwrap()];
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 1, 2]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client.dispose().await;
}
