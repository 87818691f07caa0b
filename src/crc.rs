//! CRC engine.
//!
//! Three checksum widths protect the address, control and payload bytes
//! of every frame. All functions are seedable so the codec can feed
//! data incrementally; passing the previous return value continues the
//! computation.

use crate::types::CrcType;

/// Initial seed for [`crc8`].
pub const CRC8_INIT: u8 = 0x00;

/// Initial seed for [`crc16`].
pub const CRC16_INIT: u16 = 0xFFFF;

/// Initial seed for [`crc32`].
pub const CRC32_INIT: u32 = 0x0000_0000;

/// CRC-8 with the Maxim/Dallas reflected polynomial (0x8C).
pub fn crc8(seed: u8, data: &[u8]) -> u8 {
    let mut crc = seed;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8C;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC-16 CCITT, reflected polynomial 0x8408, no final XOR.
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC-32 (IEEE 802.3). A zero seed starts a fresh computation.
pub fn crc32(seed: u32, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(seed);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the configured CRC over `data`, zero-extended to 32 bits.
pub fn compute(crc_type: CrcType, data: &[u8]) -> u32 {
    match crc_type.resolve() {
        CrcType::Crc8 => u32::from(crc8(CRC8_INIT, data)),
        CrcType::Crc16 => u32::from(crc16(CRC16_INIT, data)),
        CrcType::Crc32 => crc32(CRC32_INIT, data),
        CrcType::Default => unreachable!(),
    }
}

/// Append the CRC of `data` to `out`, little-endian, trailer width per type.
pub fn append(crc_type: CrcType, data: &[u8], out: &mut Vec<u8>) {
    let value = compute(crc_type, data);
    out.extend_from_slice(&value.to_le_bytes()[..crc_type.width()]);
}

/// Verify that `trailer` holds the little-endian CRC of `data`.
pub fn verify(crc_type: CrcType, data: &[u8], trailer: &[u8]) -> bool {
    let width = crc_type.width();
    if trailer.len() != width {
        return false;
    }
    let value = compute(crc_type, data);
    trailer == &value.to_le_bytes()[..width]
}
