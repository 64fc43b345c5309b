//! CRC-16/ARC payload checksum.
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | Polynomial | 0x8005 (reflected 0xA001) |
//! | Init | 0x0000 |
//! | RefIn / RefOut | true |
//! | XorOut | 0x0000 |
//!
//! Check value for `"123456789"` is `0xBB3D`.

const POLY_REFLECTED: u16 = 0xA001;

const CRC_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut j = 0;
        while j < 8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Checksum of `data`.
#[inline]
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0, data)
}

/// Continue a checksum over more data.
#[inline]
#[must_use]
pub fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    let mut crc = crc;
    for &byte in data {
        let index = ((crc ^ u16::from(byte)) & 0x00FF) as usize;
        crc = (crc >> 8) ^ CRC_TABLE[index];
    }
    crc
}
