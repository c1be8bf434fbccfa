// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_cpc_api::hdlc::{self, HEADER_RAW_SIZE};

/// What arrived in the header scratch buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeaderKind {
    /// All zeroes: the primary had nothing to send.
    Null,
    /// Bit error somewhere; the HCS does not match.
    Corrupted,
    /// A real frame follows with `length` bytes, FCS included.
    Valid { length: u16 },
}

pub fn classify(raw: &[u8; HEADER_RAW_SIZE]) -> HeaderKind {
    if raw.iter().all(|&b| b == 0) {
        HeaderKind::Null
    } else if hdlc::hcs_is_valid(raw) {
        HeaderKind::Valid {
            length: hdlc::Header::from_bytes(raw).length(),
        }
    } else {
        HeaderKind::Corrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_cpc_api::hdlc::Header;

    #[test]
    fn zeroes_are_null() {
        assert_eq!(classify(&[0; HEADER_RAW_SIZE]), HeaderKind::Null);
    }

    #[test]
    fn good_hcs_is_valid() {
        let raw = Header::new(1, 20, 0xc0).to_bytes();
        assert_eq!(classify(&raw), HeaderKind::Valid { length: 20 });

        let raw = Header::new(1, 0, 0x80).to_bytes();
        assert_eq!(classify(&raw), HeaderKind::Valid { length: 0 });
    }

    #[test]
    fn any_single_bit_flip_is_corrupted() {
        let good = Header::new(3, 100, 0x40).to_bytes();
        for byte in 0..HEADER_RAW_SIZE {
            for bit in 0..8 {
                let mut raw = good;
                raw[byte] ^= 1 << bit;
                assert_eq!(
                    classify(&raw),
                    HeaderKind::Corrupted,
                    "{byte}:{bit}"
                );
            }
        }
    }

    #[test]
    fn garbage_is_corrupted() {
        assert_eq!(classify(&[0xff; HEADER_RAW_SIZE]), HeaderKind::Corrupted);
    }
}
