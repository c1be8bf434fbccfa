// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CPC transport for the SPI secondary.
//!
//! We are the bus target: the primary owns the clock and decides when bytes
//! move. Every frame crosses the link in two clocked groups, a fixed-size
//! header and then, if the header says so, a payload. Between the groups
//! the primary waits on our *ready* line, and we learn where it is from
//! edges on its *frame-boundary* line (see `flow`).
//!
//! Work is split between two contexts:
//!
//! - interrupt handlers, which call [`Transport::on_spi_event`],
//!   [`Transport::on_boundary_falling`] and
//!   [`Transport::on_boundary_rising`]. These only record what happened and
//!   pick the next pump state.
//! - the main loop, which calls [`Transport::pump`] to arm the next
//!   transfer, classify headers, and deliver frames to the core.
//!
//! All of them go through one [`Shared`] holder, so every update is made
//! inside a critical section.
//!
//! At most one transfer is armed at a time, in either direction, so frames
//! go out in submission order and come in in arrival order.

#![cfg_attr(not(test), no_std)]

pub mod config;
mod flow;
mod header;
#[cfg(feature = "crc-error-injection")]
mod inject;
mod pool;
mod shared;

pub use flow::Level;
pub use header::HeaderKind;
pub use pool::{EntryId, Location, PoolLevels};
pub use shared::Shared;

use config::{
    BITRATE, DMA_MAX_XFER_LEN, DMA_MAX_XFER_PAYLOAD_LEN, RX_DATA_MAX_LENGTH,
    RX_QUEUE_SIZE, TX_QUEUE_SIZE,
};
use drv_cpc_api::hdlc::{FCS_SIZE, HEADER_RAW_SIZE};
use drv_cpc_api::{
    Capabilities, CpcCore, CpcDrvError, FrameBuffer, Rejected, RxFrame,
    SpiConfig, SpiError, SpiEvent, SpiSecondary,
};
use embedded_hal::digital::v2::OutputPin;
use flow::LinkFlags;
use pool::{RxPool, TxPool};
use ringbuf::{ringbuf, ringbuf_entry};

/// Where the pump picks up next time it runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// A transfer is armed; only its completion moves us on.
    Idle,
    TxHeader,
    TxPayload,
    /// A header-only frame went out.
    TxFlush,
    RxHeader,
    /// A header arrived and needs classifying.
    RxHeaderProcess,
    /// A payload phase finished in one direction or the other.
    Flush,
}

/// The transfer currently armed on the peripheral.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Armed {
    Idle,
    TxHeader,
    TxPayload,
    RxHeader,
    RxPayload,
}

#[derive(Copy, Clone, PartialEq)]
enum Trace {
    None,
    Init,
    Armed(Armed, u16),
    Completed(Armed),
    Header(HeaderKind),
    Oversized(u16),
    RxNoRoom(u16),
    RxDelivered(EntryId, u16),
    RxDropped(u16),
    TxQueued(EntryId, u16),
    TxComplete(EntryId),
    LateHeader(EntryId),
    ArmFailed(Armed, SpiError),
    Ready(Level),
    ReadyFault(Level),
    BoundaryFalling,
    BoundaryRising,
    DataLost,
    ModeFault,
    #[cfg(feature = "crc-error-injection")]
    Injected(Armed),
}

ringbuf!(Trace, 64, Trace::None);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub armed: u32,
    pub completed: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub tx_header: PhaseStats,
    pub tx_payload: PhaseStats,
    pub rx_header: PhaseStats,
    pub rx_payload: PhaseStats,

    pub rx_frames: u32,
    pub tx_frames: u32,
    pub null_headers: u32,
    pub corrupted_headers: u32,
    /// Headers with a good HCS announcing more than we can receive.
    pub oversized_headers: u32,
    /// Valid frames clocked into the discard buffer for want of an entry.
    pub rx_dropped: u32,
    pub late_headers: u32,

    pub data_lost: u32,
    pub mode_faults: u32,
    pub arm_failures: u32,
    pub ready_faults: u32,

    pub boundary_falling: u32,
    pub boundary_rising: u32,
}

impl TransportStats {
    fn phase_mut(&mut self, armed: Armed) -> Option<&mut PhaseStats> {
        match armed {
            Armed::Idle => None,
            Armed::TxHeader => Some(&mut self.tx_header),
            Armed::TxPayload => Some(&mut self.tx_payload),
            Armed::RxHeader => Some(&mut self.rx_header),
            Armed::RxPayload => Some(&mut self.rx_payload),
        }
    }
}

fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

/// Memory the DMA engine reads and writes outside of core frame buffers.
pub struct DmaBuffers {
    /// Every inbound header lands here first.
    header: [u8; HEADER_RAW_SIZE],
    /// Outbound payload followed by its FCS.
    tx_payload: [u8; DMA_MAX_XFER_LEN],
    /// Sink for frames we have nowhere to put.
    discard: [u8; DMA_MAX_XFER_LEN],
    #[cfg(feature = "crc-error-injection")]
    bad_header: [u8; HEADER_RAW_SIZE],
}

impl DmaBuffers {
    pub const fn new() -> Self {
        Self {
            header: [0; HEADER_RAW_SIZE],
            tx_payload: [0; DMA_MAX_XFER_LEN],
            discard: [0; DMA_MAX_XFER_LEN],
            #[cfg(feature = "crc-error-injection")]
            bad_header: [0; HEADER_RAW_SIZE],
        }
    }
}

impl Default for DmaBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// How to re-arm reception once an exchange is over and nothing is queued.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Rearm {
    /// After a payload phase: wait for the primary with ready high.
    Idle,
    /// After a header-only exchange: ready stays low until the next falling
    /// edge releases it.
    Resync,
}

/// Transport sized from the build-time configuration.
pub type SpiTransport<S, P, C> =
    Transport<S, P, C, RX_QUEUE_SIZE, TX_QUEUE_SIZE>;

pub struct Transport<S, P, C: CpcCore, const RX: usize, const TX: usize> {
    spi: S,
    ready: P,
    core: C,
    dma: &'static mut DmaBuffers,

    rx: RxPool<C::Buffer, RX>,
    tx: TxPool<C::Buffer, TX>,
    receiving: Option<EntryId>,
    transmitting: Option<EntryId>,
    /// The frame being received has nowhere to go and lands in `discard`.
    dropping: bool,

    state: State,
    armed: Armed,
    link: LinkFlags,
    last_header: HeaderKind,
    tx_payload_len: usize,
    /// The frame in `transmitting` has been clocked out in full.
    tx_frame_complete: bool,
    pending_late_header: bool,

    stats: TransportStats,
    #[cfg(feature = "crc-error-injection")]
    injector: inject::Injector,
}

impl<S, P, C, const RX: usize, const TX: usize> Transport<S, P, C, RX, TX>
where
    S: SpiSecondary,
    P: OutputPin,
    C: CpcCore,
{
    pub fn new(
        spi: S,
        ready: P,
        core: C,
        dma: &'static mut DmaBuffers,
    ) -> Self {
        Self {
            spi,
            ready,
            core,
            dma,
            rx: RxPool::new(),
            tx: TxPool::new(),
            receiving: None,
            transmitting: None,
            dropping: false,
            state: State::Idle,
            armed: Armed::Idle,
            link: LinkFlags::default(),
            last_header: HeaderKind::Null,
            tx_payload_len: 0,
            tx_frame_complete: false,
            pending_late_header: false,
            stats: TransportStats::default(),
            #[cfg(feature = "crc-error-injection")]
            injector: inject::Injector::new(),
        }
    }

    /// Fills the receive pool from the core, brings up the peripheral and
    /// raises the ready line. The first `pump` arms a header receive.
    pub fn init(&mut self) -> Result<(), CpcDrvError> {
        self.rx.refill(|| self.core.rx_buffer());
        if self.rx.free_no_buf_len() != 0 {
            return Err(CpcDrvError::AllocationFailed);
        }

        self.spi.initialize(&SpiConfig::secondary(BITRATE))?;
        self.drive_ready(Level::High);
        self.state = State::RxHeader;
        ringbuf_entry!(Trace::Init);
        Ok(())
    }

    /// Collects the oldest received frame. The entry it came from gets a
    /// fresh buffer from the core if one is available, and is parked
    /// otherwise.
    pub fn read_data(&mut self) -> Result<RxFrame<C::Buffer>, CpcDrvError> {
        let (id, buffer, len) =
            self.rx.take_pending().ok_or(CpcDrvError::Empty)?;
        match self.core.rx_buffer() {
            Some(fresh) => self.rx.attach_free(id, fresh),
            None => self.rx.park(id),
        }
        Ok(RxFrame { buffer, len })
    }

    /// Queues `buffer` for transmission with `len` payload bytes. The FCS is
    /// taken from the buffer and sent after the payload.
    ///
    /// `NotReady` means every transmit entry is in use; it is backpressure,
    /// and the buffer comes back untouched.
    pub fn transmit_data(
        &mut self,
        buffer: C::Buffer,
        len: usize,
    ) -> Result<(), Rejected<C::Buffer>> {
        if len > DMA_MAX_XFER_PAYLOAD_LEN || len > buffer.data().len() {
            return Err(Rejected {
                error: CpcDrvError::BadLength,
                buffer,
            });
        }

        let id = self.tx.submit(buffer, len).map_err(|buffer| Rejected {
            error: CpcDrvError::NotReady,
            buffer,
        })?;
        ringbuf_entry!(Trace::TxQueued(id, len as u16));

        self.prime_transmission();
        Ok(())
    }

    pub fn is_transmit_ready(&self) -> bool {
        self.tx.free_len() != 0
    }

    /// The core has buffers again: give them to parked entries.
    pub fn on_rx_buffer_free(&mut self) {
        self.rx.refill(|| self.core.rx_buffer());
    }

    /// Advances whatever the interrupt handlers left for us. Never blocks.
    pub fn pump(&mut self) {
        match self.state {
            State::Idle => {}
            // The primary has not yet released the last header-only
            // exchange; arming now would be clocked as part of it.
            State::TxHeader | State::RxHeader if self.link.no_tx_payload => {}
            State::TxHeader => self.arm_tx_header(),
            State::RxHeader => {
                if self.tx.head().is_some() {
                    self.arm_tx_header();
                } else {
                    self.arm_rx_header(Level::High);
                }
            }
            State::TxPayload => self.arm_tx_payload(),
            State::TxFlush => {
                self.flush_tx();
                self.state = if self.tx.head().is_some() {
                    State::TxHeader
                } else {
                    State::RxHeader
                };
            }
            State::RxHeaderProcess => self.process_header(),
            State::Flush => self.end_exchange(Rearm::Idle),
        }
    }

    /// Completion interrupt from the peripheral.
    pub fn on_spi_event(&mut self, event: SpiEvent) {
        match event {
            SpiEvent::TransferComplete => self.transfer_complete(),
            // Nothing to retry at this level; the core's checksums and
            // retransmissions take care of it.
            SpiEvent::DataLost => {
                bump(&mut self.stats.data_lost);
                ringbuf_entry!(Trace::DataLost);
            }
            SpiEvent::ModeFault => {
                bump(&mut self.stats.mode_faults);
                ringbuf_entry!(Trace::ModeFault);
            }
        }
    }

    /// Falling edge on the frame-boundary line.
    pub fn on_boundary_falling(&mut self) {
        bump(&mut self.stats.boundary_falling);
        ringbuf_entry!(Trace::BoundaryFalling);
        if self.link.falling_edge() {
            self.drive_ready(Level::High);
        }
    }

    /// Rising edge on the frame-boundary line.
    pub fn on_boundary_rising(&mut self) {
        bump(&mut self.stats.boundary_rising);
        ringbuf_entry!(Trace::BoundaryRising);
        self.link.rising_edge();
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn armed(&self) -> Armed {
        self.armed
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn pool_levels(&self) -> PoolLevels {
        PoolLevels {
            rx_free: self.rx.free_len(),
            rx_free_no_buf: self.rx.free_no_buf_len(),
            rx_pending: self.rx.pending_len(),
            tx_free: self.tx.free_len(),
            tx_submitted: self.tx.submitted_len(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            use_raw_rx_buffer: false,
            preprocess_hdlc_header: true,
            uart_flowcontrol: false,
        }
    }

    /// The primary drives the clock, so there is no rate of our own to
    /// report.
    pub fn bus_bitrate(&self) -> u32 {
        0
    }

    pub fn bus_max_bitrate(&self) -> u32 {
        BITRATE
    }

    fn transfer_complete(&mut self) {
        let armed = core::mem::replace(&mut self.armed, Armed::Idle);
        ringbuf_entry!(Trace::Completed(armed));
        if let Some(phase) = self.stats.phase_mut(armed) {
            bump(&mut phase.completed);
        }

        match armed {
            // Stray completion, e.g. after a flush.
            Armed::Idle => {}
            Armed::TxHeader => {
                if self.tx_payload_len != 0 {
                    self.state = State::TxPayload;
                    self.drive_ready(Level::High);
                } else {
                    self.link.no_tx_payload = true;
                    self.tx_frame_complete = true;
                    self.state = State::TxFlush;
                }
                self.link.header_tx_done = true;
            }
            Armed::TxPayload => {
                self.tx_payload_len = 0;
                self.link.payload_tx_armed = false;
                self.tx_frame_complete = true;
                self.state = State::Flush;
            }
            Armed::RxHeader => {
                self.link.header_rx_armed = false;
                self.link.header_rx_done = true;
                self.state = State::RxHeaderProcess;
            }
            Armed::RxPayload => {
                self.link.payload_rx_armed = false;
                self.state = State::Flush;
            }
        }
    }

    /// Starts sending the head of the queue if the link is free, or claims
    /// it if the primary is in the middle of clocking a frame to us.
    fn prime_transmission(&mut self) {
        if self.transmitting.is_some() {
            return;
        }
        let Some(head) = self.tx.head() else {
            return;
        };

        match self.armed {
            Armed::RxHeader if !self.link.rx_started => self.arm_tx_header(),
            Armed::RxHeader | Armed::RxPayload => {
                // Too late for this exchange. The end of the exchange sees
                // the frame was never clocked and sends it next.
                self.transmitting = Some(head);
                self.tx_frame_complete = false;
            }
            Armed::TxHeader | Armed::TxPayload => {}
            Armed::Idle => {
                if matches!(self.state, State::RxHeader | State::TxHeader) {
                    self.state = State::TxHeader;
                    if !self.link.no_tx_payload {
                        self.arm_tx_header();
                    }
                }
            }
        }
    }

    fn arm_tx_header(&mut self) {
        let Some((id, buffer, len)) = self.tx.head_frame() else {
            self.state = State::RxHeader;
            return;
        };

        // Anything sitting in the FIFOs belongs to a receive we are about
        // to abandon.
        self.spi.flush_fifos();
        self.link.header_rx_armed = false;
        self.armed = Armed::Idle;

        self.tx_payload_len = 0;
        if len != 0 {
            self.dma.tx_payload[..len].copy_from_slice(&buffer.data()[..len]);
            self.dma.tx_payload[len..len + FCS_SIZE]
                .copy_from_slice(&buffer.fcs());
            self.tx_payload_len = len + FCS_SIZE;
        }

        let header = buffer.header().as_ptr();
        #[cfg(feature = "crc-error-injection")]
        let header = match self.injector.tx_header(buffer.header()) {
            Some(bad) => {
                ringbuf_entry!(Trace::Injected(Armed::TxHeader));
                self.dma.bad_header = bad;
                self.dma.bad_header.as_ptr()
            }
            None => header,
        };

        // Safety: the header lives either in a frame buffer, whose memory
        // does not move for the life of the handle, or in the 'static DMA
        // buffers. Neither is written while the transfer is armed.
        if let Err(e) = unsafe { self.spi.send(header, HEADER_RAW_SIZE) } {
            self.arm_failed(Armed::TxHeader, e);
            self.state = State::TxHeader;
            return;
        }

        self.transmitting = Some(id);
        self.tx_frame_complete = false;
        self.drive_ready(Level::Low);
        self.set_armed(Armed::TxHeader, HEADER_RAW_SIZE);
    }

    fn arm_tx_payload(&mut self) {
        let len = self.tx_payload_len;
        // Safety: the staging buffer is 'static and left alone until the
        // transfer completes.
        if let Err(e) =
            unsafe { self.spi.send(self.dma.tx_payload.as_ptr(), len) }
        {
            self.arm_failed(Armed::TxPayload, e);
            return;
        }

        self.drive_ready(Level::Low);
        self.link.payload_tx_armed = true;
        self.set_armed(Armed::TxPayload, len);
    }

    /// Arms a header receive into the scratch buffer. Returns false if the
    /// peripheral refused, in which case the pump retries.
    fn arm_rx_header(&mut self, level: Level) -> bool {
        self.dma.header = [0; HEADER_RAW_SIZE];
        // Safety: the scratch header is 'static and only read once the
        // transfer has completed.
        if let Err(e) = unsafe {
            self.spi.receive(self.dma.header.as_mut_ptr(), HEADER_RAW_SIZE)
        } {
            self.arm_failed(Armed::RxHeader, e);
            self.state = State::RxHeader;
            return false;
        }

        self.drive_ready(level);
        self.link.header_rx_armed = true;
        self.set_armed(Armed::RxHeader, HEADER_RAW_SIZE);
        true
    }

    fn process_header(&mut self) {
        #[cfg(feature = "crc-error-injection")]
        if self.injector.rx_header(&mut self.dma.header) {
            ringbuf_entry!(Trace::Injected(Armed::RxHeader));
        }

        let kind = header::classify(&self.dma.header);
        ringbuf_entry!(Trace::Header(kind));
        self.last_header = kind;

        match kind {
            HeaderKind::Null => {
                bump(&mut self.stats.null_headers);
                self.end_exchange(Rearm::Resync);
            }
            HeaderKind::Corrupted => {
                bump(&mut self.stats.corrupted_headers);
                self.end_exchange(Rearm::Resync);
            }
            HeaderKind::Valid { length }
                if usize::from(length) > RX_DATA_MAX_LENGTH =>
            {
                // Good HCS but nothing we could receive; resync as if it
                // were corrupted.
                bump(&mut self.stats.oversized_headers);
                ringbuf_entry!(Trace::Oversized(length));
                self.last_header = HeaderKind::Corrupted;
                self.end_exchange(Rearm::Resync);
            }
            HeaderKind::Valid { length } => {
                self.receive_frame(usize::from(length));
            }
        }
    }

    /// Takes a receive entry for a valid header and arms its payload phase.
    fn receive_frame(&mut self, length: usize) {
        if self.receiving.is_none() {
            self.receiving = self.rx.take_free();
        }

        let header = self.dma.header;
        let target = match self.receiving.and_then(|id| self.rx.buffer_mut(id))
        {
            Some(buffer) if buffer.data().len() >= length => {
                *buffer.header_mut() = header;
                self.dropping = false;
                buffer.data_mut().as_mut_ptr()
            }
            _ => {
                ringbuf_entry!(Trace::RxNoRoom(length as u16));
                self.dropping = true;
                self.dma.discard.as_mut_ptr()
            }
        };

        if length == 0 {
            self.end_exchange(Rearm::Resync);
            return;
        }

        // Safety: the target is a frame buffer, whose memory does not move
        // for the life of the handle, or the 'static discard buffer. Both
        // hold at least `length` bytes and neither is touched until the
        // transfer completes.
        if let Err(e) = unsafe { self.spi.receive(target, length) } {
            self.arm_failed(Armed::RxPayload, e);
            return;
        }

        self.drive_ready(Level::Low);
        self.link.payload_rx_armed = true;
        self.set_armed(Armed::RxPayload, length);
    }

    /// Wraps up an exchange: deliver what came in, retire what went out,
    /// and arm the next transfer.
    fn end_exchange(&mut self, rearm: Rearm) {
        if let Some(id) = self.transmitting {
            if !self.tx_frame_complete {
                self.pending_late_header = true;
                bump(&mut self.stats.late_headers);
                ringbuf_entry!(Trace::LateHeader(id));
            }
        }

        self.flush_rx();
        self.flush_tx();
        self.link.rx_started = false;

        if self.pending_late_header {
            self.pending_late_header = false;
            self.transmitting = None;
            self.state = State::TxHeader;
        } else if self.tx.head().is_some() {
            self.arm_tx_header();
        } else {
            match rearm {
                Rearm::Idle => {
                    self.arm_rx_header(Level::High);
                }
                Rearm::Resync => {
                    if self.arm_rx_header(Level::Low) {
                        self.link.no_rx_payload = true;
                    }
                }
            }
        }
    }

    /// Hands a completed receive to the core.
    fn flush_rx(&mut self) {
        let HeaderKind::Valid { length } = self.last_header else {
            return;
        };
        self.last_header = HeaderKind::Null;

        if self.dropping {
            self.dropping = false;
            bump(&mut self.stats.rx_dropped);
            ringbuf_entry!(Trace::RxDropped(length));
            return;
        }
        let Some(id) = self.receiving.take() else {
            return;
        };
        let len = usize::from(length);

        #[cfg(feature = "crc-error-injection")]
        if let Some(buffer) = self.rx.buffer_mut(id) {
            if self.injector.rx_payload(&mut buffer.data_mut()[..len]) {
                ringbuf_entry!(Trace::Injected(Armed::RxPayload));
            }
        }

        self.rx.complete(id, len);
        bump(&mut self.stats.rx_frames);
        ringbuf_entry!(Trace::RxDelivered(id, length));
        self.core.on_rx_data();
    }

    /// Retires the frame that just went out and returns it to the core.
    fn flush_tx(&mut self) {
        let Some(id) = self.transmitting else {
            return;
        };
        if self.pending_late_header {
            return;
        }

        let buffer = self.tx.complete_head(id);
        self.transmitting = None;
        self.tx_frame_complete = false;
        bump(&mut self.stats.tx_frames);
        ringbuf_entry!(Trace::TxComplete(id));
        if let Some(buffer) = buffer {
            self.core.on_tx_complete(buffer);
        }
    }

    fn set_armed(&mut self, armed: Armed, len: usize) {
        self.armed = armed;
        self.state = State::Idle;
        if let Some(phase) = self.stats.phase_mut(armed) {
            bump(&mut phase.armed);
        }
        ringbuf_entry!(Trace::Armed(armed, len as u16));
    }

    fn arm_failed(&mut self, armed: Armed, e: SpiError) {
        bump(&mut self.stats.arm_failures);
        ringbuf_entry!(Trace::ArmFailed(armed, e));
    }

    fn drive_ready(&mut self, level: Level) {
        if flow::drive(&mut self.ready, level).is_ok() {
            ringbuf_entry!(Trace::Ready(level));
        } else {
            bump(&mut self.stats.ready_faults);
            ringbuf_entry!(Trace::ReadyFault(level));
        }
    }
}
