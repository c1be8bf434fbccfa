// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Out-of-band flow control.
//!
//! SPI has no notion of "that was the header, the payload comes next", so
//! two GPIO lines carry the phase boundaries:
//!
//! - *ready*, driven by us. Pulled low as soon as a transfer is armed, which
//!   tells the primary it may clock. Raised once that phase is over.
//! - *frame boundary*, driven by the primary and delivered to us as edge
//!   interrupts. A falling edge is where we find out that a clocked group
//!   finished and whether the line can go back up.
//!
//! The flags below are the only state the edge handlers look at.

use embedded_hal::digital::v2::OutputPin;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Drives `pin` to `level`.
pub fn drive<P: OutputPin>(pin: &mut P, level: Level) -> Result<(), P::Error> {
    match level {
        Level::Low => pin.set_low(),
        Level::High => pin.set_high(),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkFlags {
    pub header_rx_armed: bool,
    pub header_rx_done: bool,
    pub payload_rx_armed: bool,
    pub header_tx_done: bool,
    pub payload_tx_armed: bool,
    /// The last TX exchange was header-only. Nothing new is armed until the
    /// primary has seen it through.
    pub no_tx_payload: bool,
    /// The last RX exchange was header-only.
    pub no_rx_payload: bool,
    /// The primary has started clocking into an armed header receive.
    pub rx_started: bool,
}

impl LinkFlags {
    /// Handles a falling edge on the frame-boundary line. Returns true if
    /// the ready line should be raised.
    pub fn falling_edge(&mut self) -> bool {
        if self.header_rx_armed {
            self.rx_started = true;
        }

        let phase_over = (self.header_rx_done && self.payload_rx_armed)
            || (self.header_tx_done && self.payload_tx_armed)
            || self.no_tx_payload
            || self.no_rx_payload;

        if phase_over {
            self.header_rx_done = false;
            self.payload_rx_armed = false;
            self.header_tx_done = false;
            self.payload_tx_armed = false;
            self.no_tx_payload = false;
            self.no_rx_payload = false;
        }
        phase_over
    }

    /// Handles a rising edge on the frame-boundary line.
    pub fn rising_edge(&mut self) {
        if self.header_rx_armed {
            self.rx_started = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_on_armed_header_marks_reception() {
        let mut flags = LinkFlags {
            header_rx_armed: true,
            ..Default::default()
        };
        assert!(!flags.falling_edge());
        assert!(flags.rx_started);

        let mut flags = LinkFlags {
            header_rx_armed: true,
            ..Default::default()
        };
        flags.rising_edge();
        assert!(flags.rx_started);
    }

    #[test]
    fn idle_edges_change_nothing() {
        let mut flags = LinkFlags::default();
        assert!(!flags.falling_edge());
        flags.rising_edge();
        assert_eq!(flags, LinkFlags::default());
    }

    #[test]
    fn payload_phase_releases_ready() {
        let mut flags = LinkFlags {
            header_rx_done: true,
            payload_rx_armed: true,
            ..Default::default()
        };
        assert!(flags.falling_edge());
        assert_eq!(flags, LinkFlags::default());

        let mut flags = LinkFlags {
            header_tx_done: true,
            payload_tx_armed: true,
            ..Default::default()
        };
        assert!(flags.falling_edge());
        assert_eq!(flags, LinkFlags::default());
    }

    #[test]
    fn header_done_alone_holds_ready() {
        let mut flags = LinkFlags {
            header_rx_done: true,
            ..Default::default()
        };
        assert!(!flags.falling_edge());
        assert!(flags.header_rx_done);
    }

    #[test]
    fn header_only_exchanges_release_ready() {
        for flags in [
            LinkFlags {
                no_tx_payload: true,
                ..Default::default()
            },
            LinkFlags {
                no_rx_payload: true,
                ..Default::default()
            },
        ] {
            let mut flags = flags;
            assert!(flags.falling_edge());
            assert!(!flags.no_tx_payload && !flags.no_rx_payload);
        }
    }

    #[test]
    fn rx_started_survives_release() {
        let mut flags = LinkFlags {
            header_rx_armed: true,
            no_rx_payload: true,
            ..Default::default()
        };
        assert!(flags.falling_edge());
        assert!(flags.rx_started);
        assert!(flags.header_rx_armed);
    }
}
