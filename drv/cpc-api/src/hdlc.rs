// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Header layout used by the CPC framing layer.
//!
//! Every frame on the wire starts with a fixed seven-byte header. The
//! `length` field counts the payload bytes *plus* the two-byte frame check
//! sequence that trails them; a header-only frame carries a length of zero
//! and no payload phase at all.
//!
//! ```text
//!  0      1         2    3     4         5    6
//! +------+---------+----------+---------+----------+
//! | flag | address | length   | control | hcs      |
//! +------+---------+----------+---------+----------+
//! ```
//!
//! The header check sequence (`hcs`) and the frame check sequence use the
//! same CRC-16/XMODEM polynomial.

use crc::{Crc, CRC_16_XMODEM};
use static_assertions::const_assert_eq;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const FLAG: u8 = 0x14;
pub const HEADER_RAW_SIZE: usize = 7;
pub const FCS_SIZE: usize = 2;

/// Number of leading header bytes covered by the HCS.
pub const HCS_COVERAGE: usize = 5;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct Header {
    pub flag: u8,
    pub address: u8,
    pub length: U16,
    pub control: u8,
    pub hcs: U16,
}

const_assert_eq!(core::mem::size_of::<Header>(), HEADER_RAW_SIZE);

impl Header {
    /// Builds a header with the framing flag and a correct HCS.
    pub fn new(address: u8, length: u16, control: u8) -> Self {
        let mut header = Header {
            flag: FLAG,
            address,
            length: U16::new(length),
            control,
            hcs: U16::new(0),
        };
        header.hcs = U16::new(checksum(&header.as_bytes()[..HCS_COVERAGE]));
        header
    }

    pub fn from_bytes(raw: &[u8; HEADER_RAW_SIZE]) -> Self {
        zerocopy::transmute!(*raw)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_RAW_SIZE] {
        zerocopy::transmute!(*self)
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }
}

pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Checks the HCS of a raw header. This says nothing about the flag byte or
/// the plausibility of the length; an all-zero header passes.
pub fn hcs_is_valid(raw: &[u8; HEADER_RAW_SIZE]) -> bool {
    let expected = u16::from_le_bytes([raw[5], raw[6]]);
    checksum(&raw[..HCS_COVERAGE]) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xmodem_check_value() {
        assert_eq!(checksum(b"123456789"), 0x31c3);
    }

    #[test]
    fn built_header_is_valid() {
        let header = Header::new(0x01, 22, 0xc0);
        let raw = header.to_bytes();

        assert_eq!(raw[0], FLAG);
        assert_eq!(raw[1], 0x01);
        assert_eq!(u16::from_le_bytes([raw[2], raw[3]]), 22);
        assert_eq!(raw[4], 0xc0);
        assert!(hcs_is_valid(&raw));
        assert_eq!(Header::from_bytes(&raw), header);
        assert_eq!(Header::from_bytes(&raw).length(), 22);
    }

    #[test]
    fn flipped_control_byte_breaks_hcs() {
        let mut raw = Header::new(0x01, 22, 0xc0).to_bytes();
        raw[4] = !raw[4];
        assert!(!hcs_is_valid(&raw));
    }
}
