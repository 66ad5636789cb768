//! # CRC-16 Implementation
//!
//! Frame checksum for the ESC bus protocol.
//!
//! **Polynomial**: 0x8005, applied right-shifting (bit-reflected update)
//! **Initial Value**: 0x3692
//!
//! The polynomial is XORed in unreflected even though the register shifts
//! right. This matches what the flight controller sends on the wire.

/// CRC-16 polynomial
const CRC16_POLY: u16 = 0x8005;

/// CRC-16 initial register value
pub const CRC16_INIT: u16 = 0x3692;

/// Precomputed CRC16 lookup table for fast calculation
const CRC16_TABLE: [u16; 256] = generate_crc16_table();

/// Generate CRC16 lookup table at compile time
const fn generate_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the frame CRC-16 using the lookup table
///
/// # Arguments
///
/// * `data` - Every frame byte preceding the checksum field (sync through payload)
///
/// # Returns
///
/// * `u16` - Checksum, transmitted little-endian
///
/// # Examples
///
/// ```
/// use esc_bridge::esc::crc::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0xDF54);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc = (crc >> 8) ^ CRC16_TABLE[((crc ^ byte as u16) & 0xFF) as usize];
    }

    crc
}

/// Calculate the frame CRC-16 bit by bit (slow, for verification)
#[allow(dead_code)]
fn crc16_slow(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= byte as u16;

        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ CRC16_POLY;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// 16-bit additive sum of `data`.
///
/// Older tooling appended this instead of the CRC. It is never accepted as a
/// valid checksum; the decoder only uses it to label a mismatch.
pub fn legacy_sum16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_empty_is_init() {
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn test_crc16_known_vectors() {
        assert_eq!(crc16(b"123456789"), 0xDF54);
        assert_eq!(crc16(&[0x55]), 0xA532);
        assert_eq!(crc16(&[0x00]), 0xDE31);
        assert_eq!(crc16(&[0xFF]), 0x5334);
    }

    #[test]
    fn test_crc16_empty_telemetry_frame() {
        // 55 08 00 D0 A0 01 00 2A | 06 E5 on the wire
        let header = [0x55, 0x08, 0x00, 0xD0, 0xA0, 0x01, 0x00, 0x2A];
        assert_eq!(crc16(&header), 0xE506);
    }

    #[test]
    fn test_crc16_lookup_table_matches_slow() {
        let test_data = [
            vec![0x01, 0x02, 0x03],
            vec![0xFF, 0xFE, 0xFD],
            vec![0x55, 0x22, 0x00, 0x21, 0xA0, 0x01, 0x00, 0x00],
            vec![0x00; 34],
            vec![0xFF; 10],
        ];

        for data in test_data.iter() {
            assert_eq!(
                crc16(data),
                crc16_slow(data),
                "CRC mismatch for data: {:?}",
                data
            );
        }
    }

    #[test]
    fn test_crc16_changes_with_data() {
        let data1 = [0x55, 0x08, 0x00, 0x21];
        let data2 = [0x55, 0x08, 0x00, 0x22];

        assert_ne!(crc16(&data1), crc16(&data2), "CRC should change when data changes");
    }

    #[test]
    fn test_legacy_sum16() {
        let header = [0x55, 0x08, 0x00, 0xD0, 0xA0, 0x01, 0x00, 0x2A];
        assert_eq!(legacy_sum16(&header), 0x01F8);
        assert_eq!(legacy_sum16(&[0xFF; 300]), (0xFFu32 * 300 % 0x10000) as u16);
    }
}
