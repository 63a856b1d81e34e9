use std::fmt;

use crc::{Crc, CRC_32_ISCSI};

const CRC_MASK_DELTA: u32 = 0xa282ead8;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A Castagnoli CRC-32 passed through the masking permutation used by the
/// record framing: rotate right by 15 bits, then add a fixed constant mod
/// 2^32.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MaskedCrc(pub u32);

impl MaskedCrc {
    /// Computes the masked checksum of a buffer.
    pub fn compute(bytes: &[u8]) -> Self {
        MaskedCrc(
            CASTAGNOLI
                .checksum(bytes)
                .rotate_right(15)
                .wrapping_add(CRC_MASK_DELTA),
        )
    }
}

impl fmt::Display for MaskedCrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_checksum() {
        // Checksum extracted from a real event file with record
        // Event(file_version=b"CRC test, one two").
        let data = b"\x1a\x11CRC test, one two";
        assert_eq!(MaskedCrc::compute(data), MaskedCrc(0x5794d08a));
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(MaskedCrc(0x5794d08a).to_string(), "0x5794d08a");
    }
}
