//! Big-endian primitive I/O, zig-zag varints, and the length-prefixed
//! string/bytes/optional conventions used throughout the wire protocol.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

fn need(buf: &impl Buf, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::MalformedFrame(format!(
            "expected {n} more bytes, only {} remaining",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn get_i8(buf: &mut impl Buf) -> Result<i8> {
    need(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn get_i16(buf: &mut impl Buf) -> Result<i16> {
    need(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn get_i32(buf: &mut impl Buf) -> Result<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn get_i64(buf: &mut impl Buf) -> Result<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn get_u16(buf: &mut impl Buf) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut impl Buf) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_u64(buf: &mut impl Buf) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

// ---------------------------------------------------------------------------
// Zig-zag varints
// ---------------------------------------------------------------------------

const MAX_VARINT32_BYTES: usize = 5;
const MAX_VARINT64_BYTES: usize = 10;

fn zigzag_encode32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

fn zigzag_decode32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

fn zigzag_encode64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

pub fn put_varint32(buf: &mut impl BufMut, v: i32) {
    let mut n = zigzag_encode32(v);
    loop {
        if n & !0x7f == 0 {
            buf.put_u8(n as u8);
            break;
        }
        buf.put_u8((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
}

pub fn get_varint32(buf: &mut impl Buf) -> Result<i32> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT32_BYTES {
        need(buf, 1)?;
        let byte = buf.get_u8();
        result |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(zigzag_decode32(result));
        }
        shift += 7;
        let _ = i;
    }
    Err(Error::MalformedFrame(
        "varint32 exceeded 5 bytes without a terminator".to_owned(),
    ))
}

pub fn put_varint64(buf: &mut impl BufMut, v: i64) {
    let mut n = zigzag_encode64(v);
    loop {
        if n & !0x7f == 0 {
            buf.put_u8(n as u8);
            break;
        }
        buf.put_u8((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
}

pub fn get_varint64(buf: &mut impl Buf) -> Result<i64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT64_BYTES {
        need(buf, 1)?;
        let byte = buf.get_u8();
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(zigzag_decode64(result));
        }
        shift += 7;
        let _ = i;
    }
    Err(Error::MalformedFrame(
        "varint64 exceeded 10 bytes without a terminator".to_owned(),
    ))
}

// ---------------------------------------------------------------------------
// Length-prefixed strings and byte arrays
// ---------------------------------------------------------------------------

/// 16-bit signed length prefix; -1 denotes an absent string.
pub fn get_string(buf: &mut impl Buf) -> Result<Option<String>> {
    let len = get_i16(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    need(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| Error::MalformedFrame(format!("string is not valid utf-8: {e}")))
}

pub fn put_string(buf: &mut impl BufMut, value: Option<&str>) {
    match value {
        None => buf.put_i16(-1),
        Some(s) => {
            buf.put_i16(s.len() as i16);
            buf.put_slice(s.as_bytes());
        }
    }
}

/// 32-bit signed length prefix; -1 denotes an absent byte array.
pub fn get_bytes(buf: &mut impl Buf) -> Result<Option<Bytes>> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    need(buf, len)?;
    Ok(Some(buf.copy_to_bytes(len)))
}

pub fn put_bytes(buf: &mut impl BufMut, value: Option<&[u8]>) {
    match value {
        None => buf.put_i32(-1),
        Some(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
    }
}

/// One tag byte: 0 = absent, 1 = present (payload follows, read by the caller).
pub fn get_option_tag(buf: &mut impl Buf) -> Result<bool> {
    match get_i8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::MalformedFrame(format!(
            "invalid option tag byte: {other}"
        ))),
    }
}

pub fn put_option_tag(buf: &mut impl BufMut, present: bool) {
    buf.put_i8(i8::from(present));
}

/// Freezes an in-progress `BytesMut` into an immutable `Bytes` without a copy.
pub fn freeze(buf: BytesMut) -> Bytes {
    buf.freeze()
}
