// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deliberate bit errors, for testing the peer's recovery paths.

use crate::config::CRC_ERROR_INJECTION_FREQUENCY;
use drv_cpc_api::hdlc::HEADER_RAW_SIZE;

/// Byte of the header that gets inverted: the control byte, covered by the
/// HCS.
const HEADER_VICTIM: usize = 4;

/// One countdown per direction. They start out of phase so a single frame
/// never takes more than one hit.
pub struct Injector {
    tx_header: u32,
    rx_header: u32,
    rx_payload: u32,
}

impl Injector {
    pub fn new() -> Self {
        Self {
            tx_header: CRC_ERROR_INJECTION_FREQUENCY / 4,
            rx_header: 0,
            rx_payload: CRC_ERROR_INJECTION_FREQUENCY / 2,
        }
    }

    fn due(counter: &mut u32) -> bool {
        *counter += 1;
        if *counter >= CRC_ERROR_INJECTION_FREQUENCY {
            *counter = 0;
            true
        } else {
            false
        }
    }

    /// Returns a corrupted copy of an outbound header when one is due.
    pub fn tx_header(
        &mut self,
        header: &[u8; HEADER_RAW_SIZE],
    ) -> Option<[u8; HEADER_RAW_SIZE]> {
        Self::due(&mut self.tx_header).then(|| {
            let mut bad = *header;
            bad[HEADER_VICTIM] = !bad[HEADER_VICTIM];
            bad
        })
    }

    pub fn rx_header(&mut self, header: &mut [u8; HEADER_RAW_SIZE]) -> bool {
        let due = Self::due(&mut self.rx_header);
        if due {
            header[HEADER_VICTIM] = !header[HEADER_VICTIM];
        }
        due
    }

    /// Header-only frames have nothing to corrupt and are not counted.
    pub fn rx_payload(&mut self, payload: &mut [u8]) -> bool {
        let Some(first) = payload.first_mut() else {
            return false;
        };
        let due = Self::due(&mut self.rx_payload);
        if due {
            *first = !*first;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hit_per_period() {
        let mut injector = Injector::new();
        let period = CRC_ERROR_INJECTION_FREQUENCY as usize;

        let hits = (0..period * 3)
            .filter(|_| injector.rx_header(&mut [0; HEADER_RAW_SIZE]))
            .count();
        assert_eq!(hits, 3);
    }

    #[test]
    fn outbound_header_is_copied_not_modified() {
        let mut injector = Injector::new();
        let header = [1, 2, 3, 4, 5, 6, 7];
        let bad = (0..CRC_ERROR_INJECTION_FREQUENCY)
            .find_map(|_| injector.tx_header(&header))
            .unwrap();

        assert_eq!(header[HEADER_VICTIM], 5);
        assert_eq!(bad[HEADER_VICTIM], !5);
    }

    #[test]
    fn empty_payloads_do_not_advance_the_countdown() {
        let mut injector = Injector::new();
        let period = CRC_ERROR_INJECTION_FREQUENCY as usize;

        for _ in 0..period * 2 {
            assert!(!injector.rx_payload(&mut []));
        }

        let mut hits = 0;
        for _ in 0..period {
            let mut payload = [0x11; 4];
            if injector.rx_payload(&mut payload) {
                assert_eq!(payload, [!0x11u8, 0x11, 0x11, 0x11]);
                hits += 1;
            } else {
                assert_eq!(payload, [0x11; 4]);
            }
        }
        assert_eq!(hits, 1);
    }
}
