//! Wire codec and protocol types for a partitioned, log-streaming broker.
//!
//! This crate has no socket and no async runtime dependency: it only knows
//! how to turn bytes into typed requests/responses and back. `strmkit`
//! (the client crate) owns the connection, multiplexing, and resilience
//! layers built on top of it.

pub mod api;
pub mod crc;
pub mod error;
pub mod frame;
pub mod primitives;
pub mod record;

pub use crc::crc32c;
pub use error::{Error, ProtocolErrorKind, Result};
pub use record::{DecodedRecord, Record, RecordBatch};
