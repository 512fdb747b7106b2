// ctmp_protocol — wire protocol for the CTMP relay.
//
// CTMP frames are an 8-byte header followed by an opaque payload. The header
// carries a magic byte, an options byte, a big-endian payload length and a
// big-endian checksum that is only enforced when the "sensitive" option bit
// is set. This crate is pure: no sockets, no threads, no logging. It is
// shared by the relay (`ctmp_relay`) and by anything that talks to it.
//
// Module overview:
// - `constants.rs`:  Header size, option bits, and `ProtocolConstants` (the
//                    configurable magic and padding bytes).
// - `checksum.rs`:   The ones'-complement checksum with its fixed 0xCCCC
//                    substitution for the checksum word.
// - `frame.rs`:      `Frame`, `decode`, canonical re-serialization, and
//                    `encode_frame` for building frames to send.
// - `assembler.rs`:  `FrameAssembler`, which turns a chunked byte stream back
//                    into frames.
// - `error.rs`:      `CodecError`.

pub mod assembler;
pub mod checksum;
pub mod constants;
pub mod error;
pub mod frame;

pub use assembler::FrameAssembler;
pub use checksum::checksum_of;
pub use constants::{
    CTMP_MAGIC, CTMP_PADDING, HEADER_LEN, MAX_PAYLOAD_LEN, ProtocolConstants, SENSITIVE_FLAG,
};
pub use error::{CodecError, Result};
pub use frame::{Frame, decode, encode_frame};
