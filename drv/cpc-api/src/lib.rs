// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces between a CPC transport driver and the things around it.
//!
//! A transport sits between two collaborators:
//!
//! - the *core* ([`CpcCore`]), the framing and reliability layer that owns
//!   frame buffers, hands out empty ones for reception, and wants to hear
//!   about frames that arrived or left;
//! - the *peripheral* ([`SpiSecondary`]), a bus-target SPI block with a DMA
//!   engine that can run one send or one receive at a time and reports the
//!   outcome through an interrupt.
//!
//! The transport never owns frame buffers for long. It borrows a handle
//! from the core between attach and detach, and gives it back through
//! [`CpcCore::on_tx_complete`] or [`RxFrame`].

#![cfg_attr(not(test), no_std)]

pub mod hdlc;

use core::fmt;

pub use embedded_hal::spi::{Mode, Phase, Polarity, MODE_0};

/// A frame buffer owned by the core.
///
/// # Safety
///
/// Transports hand raw pointers into these buffers to a DMA engine and then
/// move the handle around while the transfer runs. Implementors must
/// guarantee that the memory returned by `header_mut` and `data_mut` stays
/// at the same address for as long as the handle exists, regardless of
/// where the handle itself is moved. A `Box`, a `&'static mut`, or an index
/// into a static arena all qualify. An inline array does not.
pub unsafe trait FrameBuffer {
    fn header(&self) -> &[u8; hdlc::HEADER_RAW_SIZE];
    fn header_mut(&mut self) -> &mut [u8; hdlc::HEADER_RAW_SIZE];

    /// Payload area. For reception this must be able to hold the largest
    /// inbound length, trailing FCS included.
    fn data(&self) -> &[u8];
    fn data_mut(&mut self) -> &mut [u8];

    /// Frame check sequence to append after the payload on transmission.
    fn fcs(&self) -> [u8; hdlc::FCS_SIZE];
}

/// The upstream framing layer, as seen from a transport.
///
/// `on_rx_data` and `on_tx_complete` are called from inside the transport,
/// usually with the transport's lock held. They must not call back into the
/// transport. Record the event and let the main loop act on it.
pub trait CpcCore {
    type Buffer: FrameBuffer;

    /// Asks for an empty buffer to receive into. `None` means none are
    /// available right now; the transport will ask again after
    /// `on_rx_buffer_free`.
    fn rx_buffer(&mut self) -> Option<Self::Buffer>;

    /// A received frame is waiting to be collected with `read_data`.
    fn on_rx_data(&mut self);

    /// A frame handed to `transmit_data` has left the wire. The handle is
    /// returned to its owner.
    fn on_tx_complete(&mut self, buffer: Self::Buffer);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpiError {
    /// A transfer is already running.
    Busy,
    /// The peripheral rejected the request.
    Fault,
}

/// Outcome reported by the peripheral's completion interrupt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpiEvent {
    TransferComplete,
    DataLost,
    ModeFault,
}

#[derive(Copy, Clone, PartialEq)]
pub struct SpiConfig {
    pub mode: Mode,
    pub bitrate: u32,
    pub frame_bits: u8,
    /// Chip select is driven by the primary and handled in hardware.
    pub hardware_select: bool,
}

impl SpiConfig {
    pub fn secondary(bitrate: u32) -> Self {
        Self {
            mode: MODE_0,
            bitrate,
            frame_bits: 8,
            hardware_select: true,
        }
    }
}

// `Mode` has no `Debug`, so print it as the CPOL/CPHA bits.
impl fmt::Debug for SpiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cpol = u8::from(self.mode.polarity == Polarity::IdleHigh);
        let cpha =
            u8::from(self.mode.phase == Phase::CaptureOnSecondTransition);
        f.debug_struct("SpiConfig")
            .field("cpol", &cpol)
            .field("cpha", &cpha)
            .field("bitrate", &self.bitrate)
            .field("frame_bits", &self.frame_bits)
            .field("hardware_select", &self.hardware_select)
            .finish()
    }
}

/// A bus-target SPI peripheral with DMA.
///
/// At most one transfer is armed at a time. Completion, successful or not,
/// is delivered out of band: the integrator's interrupt handler forwards it
/// to the transport as an [`SpiEvent`].
pub trait SpiSecondary {
    fn initialize(&mut self, config: &SpiConfig) -> Result<(), SpiError>;

    /// Drops anything left in the peripheral FIFOs and abandons an armed
    /// transfer that has not started clocking.
    fn flush_fifos(&mut self);

    /// Arms a transfer clocking `len` bytes out of `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid for reads of `len` bytes until the transfer
    /// completes or is flushed.
    unsafe fn send(&mut self, buf: *const u8, len: usize)
        -> Result<(), SpiError>;

    /// Arms a transfer clocking `len` bytes into `buf`.
    ///
    /// # Safety
    ///
    /// `buf` must stay valid for writes of `len` bytes, and must not be read
    /// or written by anyone else, until the transfer completes or is
    /// flushed.
    unsafe fn receive(&mut self, buf: *mut u8, len: usize)
        -> Result<(), SpiError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpcDrvError {
    /// No received frame is waiting.
    Empty,
    /// Every transmit slot is in use. Try again after a completion.
    NotReady,
    /// The frame does not fit in a single transfer or in its own buffer.
    BadLength,
    /// The core could not supply enough receive buffers at init.
    AllocationFailed,
    Spi(SpiError),
}

impl From<SpiError> for CpcDrvError {
    fn from(e: SpiError) -> Self {
        Self::Spi(e)
    }
}

/// A submission the transport would not take, with the handle returned.
#[derive(Debug)]
pub struct Rejected<B> {
    pub error: CpcDrvError,
    pub buffer: B,
}

/// A received frame collected with `read_data`. `len` is the header's
/// length field: payload plus FCS, or zero for header-only frames.
#[derive(Debug)]
pub struct RxFrame<B> {
    pub buffer: B,
    pub len: usize,
}

/// What a transport does for the core and what it expects from it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Frames are received into core buffers, never a raw byte stream.
    pub use_raw_rx_buffer: bool,
    /// Headers are validated by the transport before delivery.
    pub preprocess_hdlc_header: bool,
    pub uart_flowcontrol: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secondary_config_debug_shows_mode_bits() {
        let config = SpiConfig::secondary(4_000_000);
        assert_eq!(
            format!("{config:?}"),
            "SpiConfig { cpol: 0, cpha: 0, bitrate: 4000000, frame_bits: 8, \
             hardware_select: true }"
        );

        let mode3 = SpiConfig {
            mode: Mode {
                polarity: Polarity::IdleHigh,
                phase: Phase::CaptureOnSecondTransition,
            },
            ..config
        };
        assert!(format!("{mode3:?}")
            .starts_with("SpiConfig { cpol: 1, cpha: 1,"));
    }
}
