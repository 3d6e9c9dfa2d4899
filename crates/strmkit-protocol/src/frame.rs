//! The 4-byte big-endian length prefix shared by every frame on the wire.
//!
//! The actual read/write loop lives in `strmkit`'s connection module, built
//! on `tokio_util::codec::LengthDelimitedCodec` configured with these same
//! bounds; this module exists so both that codec and the in-process mock
//! broker agree on one definition of "too large" instead of two.

use crate::error::Error;

/// `0 < length <= 100 MiB`, per the frame transport contract.
pub const MAX_FRAME_SIZE: u32 = 100 * 1024 * 1024;

pub fn validate_frame_length(len: u32) -> Result<(), Error> {
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_is_rejected() {
        assert!(validate_frame_length(0).is_err());
    }

    #[test]
    fn oversized_length_is_rejected() {
        assert!(validate_frame_length(MAX_FRAME_SIZE + 1).is_err());
    }

    #[test]
    fn in_range_length_is_accepted() {
        assert!(validate_frame_length(1).is_ok());
        assert!(validate_frame_length(MAX_FRAME_SIZE).is_ok());
    }
}
