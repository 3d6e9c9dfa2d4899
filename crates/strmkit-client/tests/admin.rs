mod support;

use bytes::{BufMut, BytesMut};

use strmkit::ClientConfig;
use strmkit_protocol::api::api_key;
use strmkit_protocol::primitives::put_string;
use strmkit_test_support::MockBroker;

use support::build_typed_envelope;

fn build_topic_operation_status(name: &str, error_code: i16, error_message: Option<&str>) -> bytes::Bytes {
    let mut body = BytesMut::new();
    put_string(&mut body, Some(name));
    body.put_i16(error_code);
    put_string(&mut body, error_message);
    build_typed_envelope("TopicOperationStatus", &body)
}

fn build_list_topics_response(names: &[&str]) -> bytes::Bytes {
    let mut body = BytesMut::new();
    body.put_i32(names.len() as i32);
    for name in names {
        put_string(&mut body, Some(name));
        body.put_i8(1); // tag 1: Computed
        body.put_i32(4); // partitions
        body.put_i32(3); // replication_factor
        body.put_i8(0); // ignore_rack_assignment
        body.put_i8(4); // resolution: Provisioned
        body.put_u16(0); // replica_count
        body.put_u16(0); // mirror_count
        put_string(&mut body, None); // reason
    }
    build_typed_envelope("ListTopicsResponse", &body)
}

#[tokio::test]
async fn create_topic_validates_name_before_touching_the_wire() {
    let broker = MockBroker::builder()
        .route_static(api_key::ADMIN_CREATE, build_topic_operation_status("t", 0, None))
        .start()
        .await
        .unwrap();
    let config = ClientConfig::builder()
        .data_endpoint(broker.endpoint())
        .control_endpoint(broker.endpoint())
        .build()
        .unwrap();
    let client = strmkit::Client::connect(config).await.unwrap();
    let admin = client.admin();

    let err = admin
        .create_topic(
            "Not_Valid",
            strmkit_protocol::api::TopicSpec::Computed {
                partitions: 1,
                replication_factor: 1,
                ignore_rack_assignment: false,
            },
            false,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, strmkit::Error::InvalidConfiguration(_)));

    client.dispose().await;
}

#[tokio::test]
async fn create_then_delete_topic_round_trip() {
    let broker = MockBroker::builder()
        .route_static(api_key::ADMIN_CREATE, build_topic_operation_status("my-topic", 0, None))
        .route_static(api_key::ADMIN_DELETE, build_topic_operation_status("my-topic", 0, None))
        .start()
        .await
        .unwrap();
    let config = ClientConfig::builder()
        .data_endpoint(broker.endpoint())
        .control_endpoint(broker.endpoint())
        .build()
        .unwrap();
    let client = strmkit::Client::connect(config).await.unwrap();
    let admin = client.admin();

    let created = admin
        .create_topic(
            "my-topic",
            strmkit_protocol::api::TopicSpec::Computed {
                partitions: 4,
                replication_factor: 3,
                ignore_rack_assignment: false,
            },
            false,
            Some(5000),
        )
        .await
        .unwrap();
    assert_eq!(created.name, "my-topic");
    assert_eq!(created.error_code, 0);

    let deleted = admin.delete_topic("my-topic", false).await.unwrap();
    assert_eq!(deleted.name, "my-topic");
    assert_eq!(deleted.error_code, 0);

    client.dispose().await;
}

#[tokio::test]
async fn list_topics_decodes_every_entry() {
    let broker = MockBroker::builder()
        .route_static(api_key::ADMIN_LIST, build_list_topics_response(&["a", "b", "c"]))
        .start()
        .await
        .unwrap();
    let config = ClientConfig::builder()
        .data_endpoint(broker.endpoint())
        .control_endpoint(broker.endpoint())
        .build()
        .unwrap();
    let client = strmkit::Client::connect(config).await.unwrap();
    let admin = client.admin();

    let listed = admin.list_topics(Vec::new(), false, false).await.unwrap();
    let names: Vec<&str> = listed.topics.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    client.dispose().await;
}
