// CTMP frame decoding and serialization.
//
// Wire layout (all multi-byte fields big-endian):
//
//   0      magic
//   1      options (bit 6 = sensitive)
//   2..4   payload length
//   4..6   checksum (only checked when sensitive)
//   6..8   reserved
//   8..    payload
//
// `decode` never fails on a short payload. If the buffer holds fewer than
// `8 + length` bytes it copies what is there and the frame's `payload` is
// shorter than `length`. The stream assembler relies on this to find out how
// many bytes a frame needs before all of them have arrived.

use crate::checksum::{CHECKSUM_OFFSET, checksum_of};
use crate::constants::{HEADER_LEN, ProtocolConstants, SENSITIVE_FLAG};
use crate::error::{CodecError, Result};

/// One decoded CTMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub magic: u8,
    pub options: u8,
    /// Declared payload length from the header.
    pub length: u16,
    /// Checksum as it appeared on the wire.
    pub checksum: u16,
    pub payload: Vec<u8>,
    /// Whether the frame passed the magic and (if sensitive) checksum checks.
    pub valid: bool,
}

impl Frame {
    /// True when option bit 6 is set.
    pub fn is_sensitive(&self) -> bool {
        self.options & SENSITIVE_FLAG != 0
    }

    /// Total wire size of the frame as declared by its header.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + usize::from(self.length)
    }

    /// True when the whole declared payload was present at decode time.
    pub fn is_complete(&self) -> bool {
        self.payload.len() == usize::from(self.length)
    }

    /// Canonical wire form used for re-broadcast.
    ///
    /// The checksum is written back exactly as received, not recomputed. The
    /// reserved bytes are replaced with `padding`, so whatever the sender put
    /// there never reaches listeners.
    pub fn to_wire(&self, padding: u8) -> Vec<u8> {
        let mut wire = Vec::with_capacity(HEADER_LEN + self.payload.len());
        write_header(&mut wire, self.magic, self.options, self.length, self.checksum, padding);
        wire.extend_from_slice(&self.payload);
        wire
    }
}

/// Decode a frame from the front of `buffer`.
///
/// The buffer must hold at least a full header. Anything past
/// `8 + length` is ignored, including for checksum purposes.
pub fn decode(buffer: &[u8], magic: u8) -> Result<Frame> {
    if buffer.len() < HEADER_LEN {
        return Err(CodecError::MalformedFrame { len: buffer.len() });
    }

    let options = buffer[1];
    let length = u16::from_be_bytes([buffer[2], buffer[3]]);
    let checksum = u16::from_be_bytes([buffer[4], buffer[5]]);

    // Checksum only this frame's own bytes, not the whole receive buffer:
    // a sensitive frame must verify the same whether or not the next frame
    // arrived in the same read.
    let end = buffer.len().min(HEADER_LEN + usize::from(length));
    let frame_bytes = &buffer[..end];

    let mut frame = Frame {
        magic: buffer[0],
        options,
        length,
        checksum,
        payload: frame_bytes[HEADER_LEN..].to_vec(),
        valid: false,
    };

    frame.valid = frame.magic == magic && (!frame.is_sensitive() || checksum_of(frame_bytes) == checksum);
    Ok(frame)
}

/// Build the wire bytes for a new frame.
///
/// The reserved bytes are filled with the padding constant. When `options`
/// carries the sensitive flag the checksum field is computed so the frame
/// verifies on decode; otherwise it is left as zero.
pub fn encode_frame(constants: &ProtocolConstants, options: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u16::try_from(payload.len())
        .map_err(|_| CodecError::PayloadTooLarge { len: payload.len() })?;

    let mut wire = Vec::with_capacity(HEADER_LEN + payload.len());
    write_header(&mut wire, constants.magic, options, length, 0, constants.padding);
    wire.extend_from_slice(payload);

    if options & SENSITIVE_FLAG != 0 {
        let checksum = checksum_of(&wire);
        wire[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
    }
    Ok(wire)
}

fn write_header(out: &mut Vec<u8>, magic: u8, options: u8, length: u16, checksum: u16, padding: u8) {
    out.push(magic);
    out.push(options);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&checksum.to_be_bytes());
    out.extend_from_slice(&[padding, padding]);
}
