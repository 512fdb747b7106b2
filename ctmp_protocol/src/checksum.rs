// CTMP integrity checksum.
//
// Internet-style ones'-complement sum over big-endian 16-bit words with
// end-around carry, complemented at the end. One protocol quirk: the word at
// offset 4 (the checksum field itself) always counts as 0xCCCC, never as its
// on-wire value and never as zero. Senders and receivers both apply the
// substitution, so a frame verifies against its own stored checksum.

/// Byte offset of the checksum field in the header.
pub const CHECKSUM_OFFSET: usize = 4;

/// Value summed in place of the checksum field.
pub const CHECKSUM_PLACEHOLDER: u16 = 0xCCCC;

/// Compute the CTMP checksum of `data` (header plus payload).
///
/// An odd trailing byte is summed as the high byte of a final word whose low
/// byte is zero.
pub fn checksum_of(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);

    for (index, pair) in words.by_ref().enumerate() {
        let word = if index * 2 == CHECKSUM_OFFSET {
            CHECKSUM_PLACEHOLDER
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        };
        sum = fold(sum + u32::from(word));
    }

    if let [last] = words.remainder() {
        sum = fold(sum + (u32::from(*last) << 8));
    }

    // `fold` keeps the sum within 16 bits.
    !(sum as u16)
}

/// Fold carries above bit 15 back into the low 16 bits.
fn fold(mut sum: u32) -> u32 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_only_uses_placeholder_for_checksum_word() {
        // CC 40 | 00 00 | <anything> | 00 00
        // Sum: 0xCC40 + 0x0000 + 0xCCCC + 0x0000 = 0x1990C -> 0x990D
        let with_zero = [0xCC, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let with_junk = [0xCC, 0x40, 0x00, 0x00, 0xAB, 0xCD, 0x00, 0x00];
        assert_eq!(checksum_of(&with_zero), !0x990D);
        assert_eq!(checksum_of(&with_zero), checksum_of(&with_junk));
    }

    #[test]
    fn odd_trailing_byte_is_high_byte() {
        let mut even = vec![0xCC, 0x40, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        let mut odd = even.clone();
        odd.push(0x7F);
        even.extend_from_slice(&[0x7F, 0x00]);
        assert_eq!(checksum_of(&odd), checksum_of(&even));
    }

    #[test]
    fn carries_fold_back_in() {
        // Two 0xFFFF words: 0x1FFFE -> 0xFFFF, plus placeholder.
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00];
        let sum = fold(fold(0xFFFF + 0xFFFF) + 0xCCCC);
        assert_eq!(checksum_of(&data), !(sum as u16));
    }

    #[test]
    fn short_buffer_without_checksum_word() {
        // Fewer than six bytes never reaches offset 4.
        assert_eq!(checksum_of(&[0x12, 0x34]), !0x1234);
        assert_eq!(checksum_of(&[]), 0xFFFF);
    }
}
