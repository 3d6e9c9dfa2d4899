//! Hand-built wire bytes for broker responses the mock routes in these tests
//! return. The client crate only ever encodes requests and decodes
//! responses, so the broker side has to be built by hand here rather than
//! borrowed from `strmkit_protocol`.

use bytes::{BufMut, Bytes, BytesMut};

use strmkit_protocol::primitives::{get_bytes, get_i32, get_i64, get_i8, get_string, put_option_tag, put_string};

pub fn parse_produce_request(mut body: Bytes) -> (String, i32, Bytes) {
    let _transactional_id = get_string(&mut body).unwrap();
    let _isolation = get_i8(&mut body).unwrap();
    let _timeout_ms = get_i32(&mut body).unwrap();
    let _topic_count = get_i32(&mut body).unwrap();
    let topic = get_string(&mut body).unwrap().unwrap();
    let _partition_count = get_i32(&mut body).unwrap();
    let partition = get_i32(&mut body).unwrap();
    let batch = get_bytes(&mut body).unwrap().unwrap();
    (topic, partition, batch)
}

pub fn build_produce_response(topic: &str, partition: i32, base_offset: i64) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32(1); // topic count
    put_string(&mut buf, Some(topic));
    buf.put_i32(1); // partition count
    buf.put_i32(partition);
    buf.put_i16(0); // error_code
    buf.put_i64(base_offset);
    buf.put_i64(0); // log_append_time_ms
    buf.put_i64(0); // log_start_offset
    buf.put_i32(0); // throttle_time_ms
    buf.freeze()
}

pub struct ParsedStreamFetch {
    pub topic: String,
    pub partition: i32,
    pub start_offset: i64,
}

pub fn parse_stream_fetch_request(mut body: Bytes) -> ParsedStreamFetch {
    let topic = get_string(&mut body).unwrap().unwrap();
    let partition = get_i32(&mut body).unwrap();
    let start_offset = get_i64(&mut body).unwrap();
    ParsedStreamFetch {
        topic,
        partition,
        start_offset,
    }
}

/// Mirrors the private `wrap_typed_object` helper in `strmkit_protocol::api`:
/// a type-label string followed by a 32-bit body length and the body itself.
pub fn build_typed_envelope(type_label: &str, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + type_label.len() + 4 + body.len());
    put_string(&mut out, Some(type_label));
    out.put_u32(body.len() as u32);
    out.put_slice(body);
    out.freeze()
}

/// One `StreamFetchFrame`, carrying the given already-encoded record batches.
pub fn build_stream_fetch_frame(topic: &str, partition: i32, high_watermark: i64, batches: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, Some(topic));
    buf.put_u32(1); // stream_id
    buf.put_i32(partition);
    buf.put_i16(0); // error_code
    buf.put_i64(high_watermark);
    buf.put_i64(0); // log_start_offset
    put_option_tag(&mut buf, false); // no aborted transactions

    let mut record_set = BytesMut::new();
    for batch in batches {
        record_set.put_slice(batch);
    }
    let record_set = record_set.freeze();
    buf.put_i32(record_set.len() as i32);
    buf.put_slice(&record_set);
    buf.freeze()
}
