// Protocol constants for CTMP framing.
//
// The header layout is fixed; only the magic byte and the padding byte are
// deployment inputs. Both travel together as `ProtocolConstants`, which the
// relay builds once from its configuration and hands to the codec. Nothing in
// this crate reads process-wide state.

use serde::{Deserialize, Serialize};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Options bit 6: checksum verification is mandatory for this frame.
pub const SENSITIVE_FLAG: u8 = 0b0100_0000;

/// Default magic byte.
pub const CTMP_MAGIC: u8 = 0xCC;

/// Default fill for the two reserved header bytes on re-broadcast.
pub const CTMP_PADDING: u8 = 0x00;

/// The two deployment-specific protocol bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConstants {
    pub magic: u8,
    pub padding: u8,
}

impl Default for ProtocolConstants {
    fn default() -> Self {
        Self {
            magic: CTMP_MAGIC,
            padding: CTMP_PADDING,
        }
    }
}
