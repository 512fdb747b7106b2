// Error type for the CTMP codec.
//
// Only structural problems are errors. A frame that decodes but fails the
// magic or checksum check is not an error; it comes back as a `Frame` with
// `valid == false` and the caller decides what to do with it.

use thiserror::Error;

/// Errors raised by the codec.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer is too short to hold a frame header.
    #[error("malformed frame: {len} bytes is shorter than the 8-byte header")]
    MalformedFrame { len: usize },

    /// A payload does not fit in the 16-bit length field.
    #[error("payload too large: {len} bytes (max 65535)")]
    PayloadTooLarge { len: usize },
}

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
