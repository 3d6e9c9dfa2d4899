//! Record batch wire format: the on-wire aggregation unit for one or more
//! records on a single (topic, partition), protected by a CRC-32C computed
//! over a subrange that begins at `attributes`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crc::crc32c;
use crate::error::{Error, Result};
use crate::primitives::{
    get_i16, get_i32, get_i64, get_i8, get_option_tag, get_u32, get_varint64, put_option_tag,
    put_varint64,
};

const MAGIC: i8 = 2;
const SCHEMA_PRESENT_BIT: i16 = 0x0010;

/// A unit of user data: an optional key, a value (always present), and an
/// ordered multimap of UTF-8 headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<(String, Bytes)>,
}

impl Record {
    #[must_use]
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            value: value.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn encode_body(&self, offset_delta: i64, timestamp_delta: i64, buf: &mut BytesMut) {
        buf.put_i8(0); // attributes: unused by the protocol today
        put_varint64(buf, timestamp_delta);
        put_varint64(buf, offset_delta);
        match &self.key {
            None => put_option_tag(buf, false),
            Some(k) => {
                put_option_tag(buf, true);
                put_varint64(buf, k.len() as i64);
                buf.put_slice(k);
            }
        }
        put_varint64(buf, self.value.len() as i64);
        buf.put_slice(&self.value);
        put_varint64(buf, self.headers.len() as i64);
        for (name, value) in &self.headers {
            put_varint64(buf, name.len() as i64);
            buf.put_slice(name.as_bytes());
            put_varint64(buf, value.len() as i64);
            buf.put_slice(value);
        }
    }

    fn decode(src: &mut Bytes) -> Result<Self> {
        let _attributes = get_i8(src)?;
        let _timestamp_delta = get_varint64(src)?;
        let _offset_delta = get_varint64(src)?;
        let key = if get_option_tag(src)? {
            let len = get_varint64(src)? as usize;
            if src.remaining() < len {
                return Err(Error::MalformedFrame("record key truncated".to_owned()));
            }
            Some(src.copy_to_bytes(len))
        } else {
            None
        };
        let value_len = get_varint64(src)? as usize;
        if src.remaining() < value_len {
            return Err(Error::MalformedFrame("record value truncated".to_owned()));
        }
        let value = src.copy_to_bytes(value_len);
        let header_count = get_varint64(src)?;
        if header_count < 0 {
            return Err(Error::MalformedFrame("negative header count".to_owned()));
        }
        let mut headers = Vec::with_capacity(header_count as usize);
        for _ in 0..header_count {
            let name_len = get_varint64(src)? as usize;
            if src.remaining() < name_len {
                return Err(Error::MalformedFrame("header name truncated".to_owned()));
            }
            let name_bytes = src.copy_to_bytes(name_len);
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|e| Error::MalformedFrame(format!("header name not utf-8: {e}")))?;
            let value_len = get_varint64(src)? as usize;
            if src.remaining() < value_len {
                return Err(Error::MalformedFrame("header value truncated".to_owned()));
            }
            let value = src.copy_to_bytes(value_len);
            headers.push((name, value));
        }
        Ok(Self { key, value, headers })
    }
}

/// A record decoded from a batch, with offset and timestamp resolved against
/// the batch's `base_offset` / `first_timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub offset: i64,
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<(String, Bytes)>,
}

/// A contiguous sequence of records for a single (topic, partition), produced
/// atomically. See the module docs for the wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBatch {
    pub base_offset: i64,
    pub partition_leader_epoch: i32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub first_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub first_sequence: i32,
    pub schema_id: Option<u32>,
    pub records: Vec<Record>,
}

impl RecordBatch {
    /// Builds a batch from `records`, stamping both timestamps with
    /// `now_unix_ms` and assigning sequential offset deltas, per the encoder
    /// contract: the CRC is computed last, over the subrange starting at
    /// `attributes` and ending at the last record.
    #[must_use]
    pub fn encode(records: &[Record], now_unix_ms: i64, schema_id: Option<u32>) -> Bytes {
        let count = records.len();
        let last_offset_delta = if count == 0 { -1 } else { count as i32 - 1 };
        let mut attributes: i16 = 0;
        if schema_id.is_some() {
            attributes |= SCHEMA_PRESENT_BIT;
        }

        let mut subrange = BytesMut::new();
        subrange.put_i16(attributes);
        subrange.put_i32(last_offset_delta);
        subrange.put_i64(now_unix_ms);
        subrange.put_i64(now_unix_ms);
        subrange.put_i64(-1); // producer_id
        subrange.put_i16(-1); // producer_epoch
        subrange.put_i32(-1); // first_sequence
        if let Some(id) = schema_id {
            subrange.put_u32(id);
        }
        subrange.put_i32(count as i32);
        for (idx, record) in records.iter().enumerate() {
            let mut body = BytesMut::new();
            record.encode_body(idx as i64, 0, &mut body);
            put_varint64(&mut subrange, body.len() as i64);
            subrange.put_slice(&body);
        }

        let crc = crc32c(&subrange);
        let partition_leader_epoch: i32 = -1;
        let batch_len = 4 + 1 + 4 + subrange.len() as i32;

        let mut out = BytesMut::with_capacity(8 + 4 + batch_len as usize);
        out.put_i64(0); // base_offset, broker-assigned
        out.put_i32(batch_len);
        out.put_i32(partition_leader_epoch);
        out.put_i8(MAGIC);
        out.put_u32(crc);
        out.put_slice(&subrange);
        out.freeze()
    }

    /// Parses fields 1-5, then the `batch_len - 9` byte subrange covering the
    /// header tail and the records payload.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        let base_offset = get_i64(src)?;
        let batch_len = get_i32(src)?;
        if batch_len < 9 {
            return Err(Error::MalformedFrame(format!(
                "batch_len {batch_len} is too small to contain a header"
            )));
        }
        let partition_leader_epoch = get_i32(src)?;
        let magic = get_i8(src)?;
        if magic != MAGIC {
            return Err(Error::CorruptBatch(format!(
                "unsupported magic byte {magic}, expected {MAGIC}"
            )));
        }
        let crc = get_u32(src)?;

        let region_len = (batch_len - 9) as usize;
        if src.remaining() < region_len {
            return Err(Error::MalformedFrame(
                "batch region shorter than batch_len advertises".to_owned(),
            ));
        }
        let mut region = src.copy_to_bytes(region_len);
        let computed_crc = crc32c(&region);
        if computed_crc != crc {
            return Err(Error::CorruptBatch(format!(
                "crc mismatch: wire={crc} computed={computed_crc}"
            )));
        }

        let attributes = get_i16(&mut region)?;
        let last_offset_delta = get_i32(&mut region)?;
        let first_timestamp = get_i64(&mut region)?;
        let max_timestamp = get_i64(&mut region)?;
        let producer_id = get_i64(&mut region)?;
        let producer_epoch = get_i16(&mut region)?;
        let first_sequence = get_i32(&mut region)?;
        let schema_present = attributes & SCHEMA_PRESENT_BIT != 0;
        let schema_id = if schema_present {
            Some(get_u32(&mut region)?)
        } else {
            None
        };

        let record_count = get_i32(&mut region)?;
        if record_count < 0 {
            return Err(Error::MalformedFrame("negative record count".to_owned()));
        }
        let mut records = Vec::with_capacity(record_count as usize);
        for _ in 0..record_count {
            let len = get_varint64(&mut region)? as usize;
            if region.remaining() < len {
                return Err(Error::MalformedFrame("record body truncated".to_owned()));
            }
            let mut body = region.copy_to_bytes(len);
            records.push(Record::decode(&mut body)?);
        }

        Ok(Self {
            base_offset,
            partition_leader_epoch,
            attributes,
            last_offset_delta,
            first_timestamp,
            max_timestamp,
            producer_id,
            producer_epoch,
            first_sequence,
            schema_id,
            records,
        })
    }

    /// Resolves each record's absolute offset/timestamp against this batch's
    /// `base_offset` and `first_timestamp`.
    #[must_use]
    pub fn decoded_records(&self) -> Vec<DecodedRecord> {
        self.records
            .iter()
            .enumerate()
            .map(|(idx, r)| DecodedRecord {
                offset: self.base_offset + idx as i64,
                timestamp: if self.first_timestamp >= 0 {
                    Some(self.first_timestamp)
                } else {
                    None
                },
                key: r.key.clone(),
                value: r.value.clone(),
                headers: r.headers.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record_batch_crc_matches_known_vector() {
        let record = Record::new(Bytes::from_static(&[0x74, 0x65, 0x73, 0x74]));
        let encoded = RecordBatch::encode(&[record], 1_555_478_494_747, None);
        let mut buf = encoded.clone();
        let decoded = RecordBatch::decode(&mut buf).unwrap();
        assert_eq!(decoded.records.len(), 1);
        // crc lives at bytes [17..21) of the frame (after base_offset[0..8),
        // batch_len[8..12), partition_leader_epoch[12..16), magic[16]).
        let crc = u32::from_be_bytes(encoded[17..21].try_into().unwrap());
        assert_eq!(crc, 1_430_948_200);
    }

    #[test]
    fn single_record_batch_with_schema_id_matches_known_vector() {
        let record = Record::new(Bytes::from_static(&[0x74, 0x65, 0x73, 0x74]));
        let encoded = RecordBatch::encode(&[record], 1_555_478_494_747, Some(42));
        let crc = u32::from_be_bytes(encoded[17..21].try_into().unwrap());
        assert_eq!(crc, 2_943_551_365);
    }

    #[test]
    fn decode_is_inverse_of_encode_for_keys_values_and_headers() {
        let records = vec![
            Record::new(Bytes::from_static(b"v0")).with_key(Bytes::from_static(b"k0")),
            Record::new(Bytes::from_static(b"v1")).with_header("trace", Bytes::from_static(b"abc")),
            Record::new(Bytes::from_static(b"v2")),
        ];
        let mut encoded = RecordBatch::encode(&records, 1000, None);
        let decoded = RecordBatch::decode(&mut encoded).unwrap();
        assert_eq!(decoded.last_offset_delta, 2);
        for (i, (original, roundtripped)) in records.iter().zip(decoded.records.iter()).enumerate() {
            assert_eq!(original.key, roundtripped.key, "record {i} key mismatch");
            assert_eq!(original.value, roundtripped.value, "record {i} value mismatch");
            assert_eq!(original.headers, roundtripped.headers, "record {i} headers mismatch");
        }
        let resolved = decoded.decoded_records();
        for (i, r) in resolved.iter().enumerate() {
            assert_eq!(r.offset, i as i64);
        }
    }

    #[test]
    fn batch_len_covers_partition_leader_epoch_through_records() {
        let records = vec![Record::new(Bytes::from_static(b"hello"))];
        let encoded = RecordBatch::encode(&records, 42, None);
        let batch_len = i32::from_be_bytes(encoded[8..12].try_into().unwrap());
        // total frame = base_offset(8) + batch_len(4) + batch_len bytes
        assert_eq!(encoded.len(), 8 + 4 + batch_len as usize);
    }

    #[test]
    fn corrupted_crc_is_rejected() {
        let records = vec![Record::new(Bytes::from_static(b"hello"))];
        let mut encoded = BytesMut::from(&RecordBatch::encode(&records, 42, None)[..]);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let mut frozen = encoded.freeze();
        assert!(matches!(
            RecordBatch::decode(&mut frozen),
            Err(Error::CorruptBatch(_))
        ));
    }
}
