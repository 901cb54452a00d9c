// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Rolling CRC-32 shared by both ends of the binary transfer protocol.
//!
//! Normal form (MSB first) of polynomial 0x04C11DB7 with a zero initial
//! value and no final XOR. The running value is carried across chunk
//! boundaries, so `crc32(crc32(0, a), b) == crc32(0, a ++ b)`.

use crc::{Algorithm, Crc};

/// The STM32 hardware CRC unit's algorithm, minus its 0xFFFFFFFF preset.
pub const CRC_32_MXPROG: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
    refin: false,
    refout: false,
    xorout: 0x0000_0000,
    check: 0x89a1_897f,
    residue: 0x0000_0000,
};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MXPROG);

/// Continue a CRC computation over `data`, starting from `crc`.
///
/// Pass 0 to start a new transfer.
pub fn crc32(crc: u32, data: &[u8]) -> u32 {
    let mut digest = CRC32.digest_with_initial(crc);
    digest.update(data);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_matches_table() {
        // Table-driven form: crc = (crc << 8) ^ table[(crc >> 24) ^ byte]
        assert_eq!(crc32(0, &[0x01]), 0x04c1_1db7);
        assert_eq!(crc32(0, &[0x80]), 0x690c_e0ee);
        assert_eq!(crc32(0, &[0xff]), 0xb1f7_40b4);
    }

    #[test]
    fn test_check_value() {
        assert_eq!(crc32(0, b"123456789"), CRC_32_MXPROG.check);
    }

    #[test]
    fn test_zero_bytes_keep_zero() {
        assert_eq!(crc32(0, &[0u8; 64]), 0);
    }
}
