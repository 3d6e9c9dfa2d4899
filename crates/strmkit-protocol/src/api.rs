//! Request and response wire types for every API the client issues, plus the
//! common request/response headers that wrap all of them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ProtocolErrorKind, Result};
use crate::primitives::{
    get_bytes, get_i16, get_i32, get_i64, get_i8, get_option_tag, get_string, get_u16, get_u32,
    put_bytes, put_option_tag, put_string,
};
use crate::record::RecordBatch;

pub mod api_key {
    pub const PRODUCE: i16 = 0;
    pub const STREAM_FETCH: i16 = 1003;
    pub const FETCH_CONSUMER_OFFSETS: i16 = 1005;
    pub const UPDATE_CONSUMER_OFFSET: i16 = 1006;
    pub const ADMIN_CREATE: i16 = 1001;
    pub const ADMIN_DELETE: i16 = 1002;
    pub const ADMIN_LIST: i16 = 1003;
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl RequestHeader {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i16(self.api_key);
        buf.put_i16(self.api_version);
        buf.put_i32(self.correlation_id);
        put_string(buf, self.client_id.as_deref());
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            api_key: get_i16(buf)?,
            api_version: get_i16(buf)?,
            correlation_id: get_i32(buf)?,
            client_id: get_string(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub correlation_id: i32,
}

impl ResponseHeader {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            correlation_id: get_i32(buf)?,
        })
    }
}

fn status_to_result(name: Option<&str>, error_code: i16, error_message: Option<&str>) -> Result<()> {
    if error_code == 0 {
        return Ok(());
    }
    Err(Error::ProtocolError {
        kind: ProtocolErrorKind::from_code(error_code),
        name: name.map(str::to_owned),
        message: error_message.unwrap_or("broker returned a non-zero error code").to_owned(),
    })
}

// ---------------------------------------------------------------------------
// Produce (api_key = 0, version = 25)
// ---------------------------------------------------------------------------

pub const PRODUCE_VERSION: i16 = 25;

#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub timeout_ms: i32,
    pub topic: String,
    pub partition: i32,
    pub batch: Bytes,
}

impl ProduceRequest {
    pub fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, None); // transactional_id: always absent
        buf.put_i8(1); // isolation: read_uncommitted
        buf.put_i32(self.timeout_ms);
        buf.put_i32(1); // topic count
        put_string(buf, Some(&self.topic));
        buf.put_i32(1); // partition count
        buf.put_i32(self.partition);
        put_bytes(buf, Some(&self.batch));
        buf.put_i32(0); // smart-module count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducePartitionResponse {
    pub partition_index: i32,
    pub error_code: i16,
    pub base_offset: i64,
    pub log_append_time_ms: i64,
    pub log_start_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceTopicResponse {
    pub name: String,
    pub partitions: Vec<ProducePartitionResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResponse {
    pub topics: Vec<ProduceTopicResponse>,
    pub throttle_time_ms: i32,
}

impl ProduceResponse {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let topic_count = get_i32(buf)?;
        let mut topics = Vec::with_capacity(topic_count.max(0) as usize);
        for _ in 0..topic_count {
            let name = get_string(buf)?.unwrap_or_default();
            let partition_count = get_i32(buf)?;
            let mut partitions = Vec::with_capacity(partition_count.max(0) as usize);
            for _ in 0..partition_count {
                let p = ProducePartitionResponse {
                    partition_index: get_i32(buf)?,
                    error_code: get_i16(buf)?,
                    base_offset: get_i64(buf)?,
                    log_append_time_ms: get_i64(buf)?,
                    log_start_offset: get_i64(buf)?,
                };
                status_to_result(Some(&name), p.error_code, None)?;
                partitions.push(p);
            }
            topics.push(ProduceTopicResponse { name, partitions });
        }
        let throttle_time_ms = get_i32(buf)?;
        Ok(Self {
            topics,
            throttle_time_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// StreamFetch (api_key = 1003, version = 10)
// ---------------------------------------------------------------------------

pub const STREAM_FETCH_VERSION: i16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    ReadUncommitted = 0,
    ReadCommitted = 1,
}

#[derive(Debug, Clone)]
pub struct StreamFetchRequest {
    pub topic: String,
    pub partition: i32,
    pub start_offset: i64,
    pub max_bytes: i32,
    pub isolation: Isolation,
    pub consumer_id: Option<String>,
}

impl StreamFetchRequest {
    pub fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, Some(&self.topic));
        buf.put_i32(self.partition);
        buf.put_i64(self.start_offset);
        buf.put_i32(self.max_bytes);
        buf.put_i8(self.isolation as i8);
        buf.put_i32(0); // smart-module count
        put_string(buf, self.consumer_id.as_deref());
    }
}

#[derive(Debug, Clone)]
pub struct StreamFetchFrame {
    pub topic: String,
    pub stream_id: u32,
    pub partition_index: i32,
    pub high_watermark: i64,
    pub log_start_offset: i64,
    pub batches: Vec<RecordBatch>,
}

impl StreamFetchFrame {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let topic = get_string(buf)?.unwrap_or_default();
        let stream_id = get_u32(buf)?;
        let partition_index = get_i32(buf)?;
        let error_code = get_i16(buf)?;
        let high_watermark = get_i64(buf)?;
        let log_start_offset = get_i64(buf)?;
        if get_option_tag(buf)? {
            // aborted-transactions list: count-prefixed, each is (producer_id i64, first_offset i64)
            let count = get_i32(buf)?;
            for _ in 0..count {
                let _producer_id = get_i64(buf)?;
                let _first_offset = get_i64(buf)?;
            }
        }
        let record_set = get_bytes(buf)?.unwrap_or_default();
        if error_code != 0 {
            return Err(Error::StreamError {
                code: error_code,
                message: format!("stream-fetch session for {topic} ended with code {error_code}"),
            });
        }
        let mut region = record_set;
        let mut batches = Vec::new();
        while region.remaining() > 0 {
            batches.push(RecordBatch::decode(&mut region)?);
        }
        Ok(Self {
            topic,
            stream_id,
            partition_index,
            high_watermark,
            log_start_offset,
            batches,
        })
    }
}

// ---------------------------------------------------------------------------
// Consumer offsets
// ---------------------------------------------------------------------------

pub const FETCH_CONSUMER_OFFSETS_VERSION: i16 = 1;
pub const UPDATE_CONSUMER_OFFSET_VERSION: i16 = 1;

#[derive(Debug, Clone)]
pub struct FetchConsumerOffsetsRequest {
    pub consumer_id: String,
    pub topic: String,
    pub partition: i32,
}

impl FetchConsumerOffsetsRequest {
    pub fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, Some(&self.consumer_id));
        put_string(buf, Some(&self.topic));
        buf.put_i32(self.partition);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchConsumerOffsetsResponse {
    pub offset: Option<i64>,
}

impl FetchConsumerOffsetsResponse {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let offset = if get_option_tag(buf)? {
            Some(get_i64(buf)?)
        } else {
            None
        };
        Ok(Self { offset })
    }
}

#[derive(Debug, Clone)]
pub struct UpdateConsumerOffsetRequest {
    pub session_id: u32,
    pub offset: i64,
}

impl UpdateConsumerOffsetRequest {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.session_id);
        buf.put_i64(self.offset);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateConsumerOffsetResponse {
    pub error_code: i16,
}

impl UpdateConsumerOffsetResponse {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let error_code = get_i16(buf)?;
        status_to_result(None, error_code, None)?;
        Ok(Self { error_code })
    }
}

// ---------------------------------------------------------------------------
// Admin: tagged-union topic spec, create/delete/list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSpec {
    /// tag 1 — broker computes partition placement.
    Computed {
        partitions: i32,
        replication_factor: i32,
        ignore_rack_assignment: bool,
    },
    /// tag 0 — caller supplies an explicit partition → replica-set map.
    Assigned { assignments: Vec<(i32, Vec<i32>)> },
    /// tag 2 — reserved, unimplemented; encoding it is a programmer error.
    Mirror,
}

impl TopicSpec {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            TopicSpec::Assigned { assignments } => {
                buf.put_i8(0);
                buf.put_i32(assignments.len() as i32);
                for (partition, replicas) in assignments {
                    buf.put_i32(*partition);
                    buf.put_i32(replicas.len() as i32);
                    for r in replicas {
                        buf.put_i32(*r);
                    }
                }
            }
            TopicSpec::Computed {
                partitions,
                replication_factor,
                ignore_rack_assignment,
            } => {
                buf.put_i8(1);
                buf.put_i32(*partitions);
                buf.put_i32(*replication_factor);
                buf.put_i8(i8::from(*ignore_rack_assignment));
            }
            TopicSpec::Mirror => {
                return Err(Error::MalformedFrame(
                    "mirror topic specs are not implemented by this client".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

/// Resolution state of a topic, as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicResolutionState {
    Init,
    Pending,
    Insufficient,
    Invalid,
    Provisioned,
    Deleting,
}

impl TopicResolutionState {
    fn from_code(code: i8) -> Result<Self> {
        Ok(match code {
            0 => Self::Init,
            1 => Self::Pending,
            2 => Self::Insufficient,
            3 => Self::Invalid,
            4 => Self::Provisioned,
            5 => Self::Deleting,
            other => {
                return Err(Error::MalformedFrame(format!(
                    "unknown topic resolution state {other}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicStatus {
    pub resolution: TopicResolutionState,
    pub replicas: Vec<(i32, Vec<i32>)>,
    pub mirrors: Vec<(i32, Vec<i32>)>,
    pub reason: Option<String>,
}

impl TopicStatus {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let resolution = TopicResolutionState::from_code(get_i8(buf)?)?;
        // Protocol oddity (see design notes): this map uses a 16-bit count,
        // unlike the 32-bit counts used everywhere else on the wire.
        let replica_count = get_u16(buf)?;
        let mut replicas = Vec::with_capacity(replica_count as usize);
        for _ in 0..replica_count {
            let partition = get_i32(buf)?;
            let replica_set_len = get_i32(buf)?;
            let mut set = Vec::with_capacity(replica_set_len.max(0) as usize);
            for _ in 0..replica_set_len {
                set.push(get_i32(buf)?);
            }
            replicas.push((partition, set));
        }
        let mirror_count = get_u16(buf)?;
        let mut mirrors = Vec::with_capacity(mirror_count as usize);
        for _ in 0..mirror_count {
            let partition = get_i32(buf)?;
            let replica_set_len = get_i32(buf)?;
            let mut set = Vec::with_capacity(replica_set_len.max(0) as usize);
            for _ in 0..replica_set_len {
                set.push(get_i32(buf)?);
            }
            mirrors.push((partition, set));
        }
        let reason = get_string(buf)?;
        Ok(Self {
            resolution,
            replicas,
            mirrors,
            reason,
        })
    }
}

pub const ADMIN_VERSION: i16 = 25;

#[derive(Debug, Clone)]
pub struct CreateTopicRequest {
    pub name: String,
    pub dry_run: bool,
    pub timeout_ms: Option<i32>,
    pub topic_spec: TopicSpec,
}

impl CreateTopicRequest {
    pub fn encode_envelope(&self) -> Result<Bytes> {
        let mut body = BytesMut::new();
        put_string(&mut body, Some(&self.name));
        body.put_i8(i8::from(self.dry_run));
        match self.timeout_ms {
            None => put_option_tag(&mut body, false),
            Some(ms) => {
                put_option_tag(&mut body, true);
                body.put_i32(ms);
            }
        }
        self.topic_spec.encode(&mut body)?;
        put_option_tag(&mut body, false); // cleanup policy: reserved, absent
        put_option_tag(&mut body, false); // storage config: reserved, absent
        put_string(&mut body, Some("any")); // compression algorithm
        put_option_tag(&mut body, false); // deduplication: reserved, absent
        body.put_i8(0); // system flag

        Ok(wrap_typed_object("CreateTopicRequest", &body))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicOperationStatus {
    pub name: String,
    pub error_code: i16,
    pub error_message: Option<String>,
}

impl TopicOperationStatus {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let name = get_string(buf)?.unwrap_or_default();
        let error_code = get_i16(buf)?;
        let error_message = get_string(buf)?;
        status_to_result(Some(&name), error_code, error_message.as_deref())?;
        Ok(Self {
            name,
            error_code,
            error_message,
        })
    }

    /// Unwraps the typed-object envelope before decoding the status it carries.
    pub fn decode_envelope(buf: &mut Bytes) -> Result<Self> {
        let (_label, mut body) = unwrap_typed_object(buf)?;
        Self::decode(&mut body)
    }
}

#[derive(Debug, Clone)]
pub struct DeleteTopicRequest {
    pub name: String,
    pub force: bool,
}

impl DeleteTopicRequest {
    pub fn encode_envelope(&self) -> Bytes {
        let mut body = BytesMut::new();
        put_string(&mut body, Some(&self.name));
        body.put_i8(i8::from(self.force));
        wrap_typed_object("DeleteTopicRequest", &body)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListTopicsRequest {
    pub filters: Vec<String>,
    pub summary: bool,
    pub system: bool,
}

impl ListTopicsRequest {
    pub fn encode_envelope(&self) -> Bytes {
        let mut body = BytesMut::new();
        body.put_i32(self.filters.len() as i32);
        for f in &self.filters {
            put_string(&mut body, Some(f));
        }
        body.put_i8(i8::from(self.summary));
        body.put_i8(i8::from(self.system));
        wrap_typed_object("ListTopicsRequest", &body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicListEntry {
    pub name: String,
    pub topic_spec: TopicSpec,
    pub status: TopicStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTopicsResponse {
    pub topics: Vec<TopicListEntry>,
}

impl ListTopicsResponse {
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let (_type_label, mut body) = unwrap_typed_object(buf)?;
        let count = get_i32(&mut body)?;
        let mut topics = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let name = get_string(&mut body)?.unwrap_or_default();
            let tag = get_i8(&mut body)?;
            let topic_spec = match tag {
                0 => {
                    let count = get_i32(&mut body)?;
                    let mut assignments = Vec::with_capacity(count.max(0) as usize);
                    for _ in 0..count {
                        let partition = get_i32(&mut body)?;
                        let replica_len = get_i32(&mut body)?;
                        let mut set = Vec::with_capacity(replica_len.max(0) as usize);
                        for _ in 0..replica_len {
                            set.push(get_i32(&mut body)?);
                        }
                        assignments.push((partition, set));
                    }
                    TopicSpec::Assigned { assignments }
                }
                1 => TopicSpec::Computed {
                    partitions: get_i32(&mut body)?,
                    replication_factor: get_i32(&mut body)?,
                    ignore_rack_assignment: get_i8(&mut body)? != 0,
                },
                2 => TopicSpec::Mirror,
                other => {
                    return Err(Error::MalformedFrame(format!(
                        "unknown topic spec tag {other}"
                    )))
                }
            };
            let status = TopicStatus::decode(&mut body)?;
            topics.push(TopicListEntry {
                name,
                topic_spec,
                status,
            });
        }
        Ok(Self { topics })
    }
}

// ---------------------------------------------------------------------------
// Typed-object envelope shared by every admin request/response
// ---------------------------------------------------------------------------

fn wrap_typed_object(type_label: &str, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(2 + type_label.len() + 4 + body.len());
    put_string(&mut out, Some(type_label));
    out.put_u32(body.len() as u32);
    out.put_slice(body);
    out.freeze()
}

fn unwrap_typed_object(buf: &mut Bytes) -> Result<(String, Bytes)> {
    let type_label = get_string(buf)?.unwrap_or_default();
    let body_len = get_u32(buf)?;
    let body_len = body_len as usize;
    if buf.remaining() < body_len {
        return Err(Error::MalformedFrame(
            "typed-object body shorter than body_len advertises".to_owned(),
        ));
    }
    Ok((type_label, buf.copy_to_bytes(body_len)))
}

/// Topic name validation (client-side, before anything goes on the wire).
pub fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        return Err(Error::MalformedFrame(format!(
            "topic name must be 1-63 bytes, got {}",
            name.len()
        )));
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if !valid || name.starts_with('-') || name.ends_with('-') {
        return Err(Error::MalformedFrame(format!(
            "topic name {name:?} must contain only lowercase letters, digits, and '-', and must not start or end with '-'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_name_validation_accepts_and_rejects_per_spec() {
        assert!(validate_topic_name("a-b-c").is_ok());
        assert!(validate_topic_name("A").is_err());
        assert!(validate_topic_name("-x").is_err());
        assert!(validate_topic_name("x-").is_err());
        assert!(validate_topic_name(&"x".repeat(64)).is_err());
        assert!(validate_topic_name("x_y").is_err());
    }

    #[test]
    fn produce_request_round_trips_header_and_batch() {
        let req = ProduceRequest {
            timeout_ms: 5000,
            topic: "t".to_owned(),
            partition: 0,
            batch: Bytes::from_static(b"batch-bytes"),
        };
        let mut buf = BytesMut::new();
        req.encode(&mut buf);
        assert!(buf.len() > 0);
    }

    #[test]
    fn typed_object_envelope_round_trips() {
        let wrapped = wrap_typed_object("Foo", b"hello");
        let mut buf = wrapped;
        let (label, body) = unwrap_typed_object(&mut buf).unwrap();
        assert_eq!(label, "Foo");
        assert_eq!(&body[..], b"hello");
    }
}
