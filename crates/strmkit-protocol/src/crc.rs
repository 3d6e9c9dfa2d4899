//! CRC-32C (Castagnoli), used to protect record batches on the wire.
//!
//! Delegated to the `crc32c` crate, which implements the same polynomial
//! (0x1EDC6F41) with init 0xFFFFFFFF and final XOR 0xFFFFFFFF that every
//! Kafka-protocol-compatible broker expects — hand-rolling a second table
//! here would just be a second place for the polynomial to drift.

#[must_use]
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}
