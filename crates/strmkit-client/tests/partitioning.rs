mod support;

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use strmkit::{ClientConfig, Partitioner, ProducerRecord};
use strmkit_protocol::api::api_key;
use strmkit_test_support::MockBroker;

use support::{build_produce_response, parse_produce_request};

#[tokio::test]
async fn same_key_always_lands_on_one_partition() {
    let partitions_seen: Arc<std::sync::Mutex<HashSet<i32>>> = Arc::new(std::sync::Mutex::new(HashSet::new()));
    let seen = Arc::clone(&partitions_seen);

    let broker = MockBroker::builder()
        .route(api_key::PRODUCE, move |body| {
            let (topic, partition, _batch) = parse_produce_request(body);
            seen.lock().unwrap().insert(partition);
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
    let producer = client.producer_with_batching(Partitioner::KeyHashRoundRobin, std::time::Duration::ZERO, 1);
    producer.set_partition_count("t", 8).await;

    for i in 0..10 {
        producer
            .send(
                "t",
                ProducerRecord::new(Bytes::from(format!("v{i}"))).with_key(Bytes::from_static(b"same-key")),
            )
            .await
            .unwrap();
    }

    assert_eq!(partitions_seen.lock().unwrap().len(), 1, "same key must always hash to one partition");
    client.dispose().await;
}

#[tokio::test]
async fn distinct_keys_spread_across_partitions() {
    let partitions_seen: Arc<std::sync::Mutex<HashSet<i32>>> = Arc::new(std::sync::Mutex::new(HashSet::new()));
    let seen = Arc::clone(&partitions_seen);

    let broker = MockBroker::builder()
        .route(api_key::PRODUCE, move |body| {
            let (topic, partition, _batch) = parse_produce_request(body);
            seen.lock().unwrap().insert(partition);
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
    let producer = client.producer_with_batching(Partitioner::KeyHashRoundRobin, std::time::Duration::ZERO, 1);
    producer.set_partition_count("t", 8).await;

    for i in 0..30 {
        producer
            .send(
                "t",
                ProducerRecord::new(Bytes::from(format!("v{i}"))).with_key(Bytes::from(format!("key-{i}"))),
            )
            .await
            .unwrap();
    }

    assert!(
        partitions_seen.lock().unwrap().len() >= 2,
        "30 distinct keys over 8 partitions should not all collide onto one partition"
    );
    client.dispose().await;
}

#[tokio::test]
async fn specific_partitioner_rejects_out_of_range_index() {
    let broker = MockBroker::builder()
        .route_static(api_key::PRODUCE, build_produce_response("t", 0, 0))
        .start()
        .await
        .unwrap();

    let config = ClientConfig::builder()
        .data_endpoint(broker.endpoint())
        .control_endpoint(broker.endpoint())
        .build()
        .unwrap();
    let client = strmkit::Client::connect(config).await.unwrap();
    let producer = client.producer_with_batching(Partitioner::Specific(5), std::time::Duration::ZERO, 1);
    producer.set_partition_count("t", 2).await;

    let err = producer.send("t", ProducerRecord::new(Bytes::from_static(b"x"))).await.unwrap_err();
    assert!(matches!(err, strmkit::Error::UnknownPartition { .. }));

    client.dispose().await;
}
