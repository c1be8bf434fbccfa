// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing drivers that run partly in interrupt context
//!
//! This is a static ring buffer meant to instrument code that has no logging
//! output to speak of. Nothing stops a ring buffer from being left in
//! production code, but the design center is debugging: the buffer is a
//! plain static that can be dumped from a debugger, or read back in host
//! tests with [`RingbufCell::with`].
//!
//! Every access goes through a [`critical_section::Mutex`], so entries can
//! be recorded from interrupt handlers and from the main loop alike.
//!
//! Payloads must be `Copy + PartialEq`. A payload equal to the previous
//! one, recorded from the same source line, bumps that entry's `count`
//! instead of taking a new slot, so a tight polling loop does not wash out
//! the history.
//!
//! ```ignore
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace {
//!     None,
//!     Edge(bool),
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! fn on_edge(high: bool) {
//!     ringbuf_entry!(Trace::Edge(high));
//! }
//! ```
//!
//! The unnamed form declares `__RINGBUF`, so a module gets one of those;
//! pass a name as the first argument to have several.
//!
//! From GDB, with symbols loaded:
//!
//! ```console
//! (gdb) set print pretty on
//! (gdb) print drv_cpc_spi_secondary::__RINGBUF
//! ```
//!
//! `last` indexes the newest entry. Each entry holds the `line` that wrote
//! it, a `generation` bumped every time its slot is overwritten, and the
//! repeat `count`.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;

/// Re-exported so code generated by the macros can always find it.
pub use critical_section;

/// `ringbuf!(NAME, Type, N, init)` declares a static
/// [`RingbufCell`] named `NAME` holding `N` entries of `Type`, each starting
/// out as `init`. Leave out `NAME` to get `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::RingbufCell<$t, $n> =
            $crate::RingbufCell::new($crate::Ringbuf::filled($init));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// `ringbuf_entry!(NAME, payload)` records `payload` in `NAME`, tagged with
/// the calling line. Leave out `NAME` to use `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate each argument on its own so neither can see the other's
        // binding.
        let (payload, buf) = ($payload, &$buf);
        $crate::RingbufCell::entry(buf, line!() as u16, payload);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        const _: $t = $init;
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// One recorded event.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

/// Fixed-size history of `N` entries. Normally declared with [`ringbuf!`].
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// An empty history whose slots all hold `init`.
    pub const fn filled(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        if let Some(ent) = self.last.and_then(|i| self.buffer.get_mut(i)) {
            if ent.line == line && ent.payload == payload {
                if let Some(count) = ent.count.checked_add(1) {
                    ent.count = count;
                    return;
                }
            }
        }

        // Compare rather than take a remainder; not every target divides in
        // hardware. An out-of-range `last` also restarts at slot 0.
        let next = match self.last {
            Some(i) if i + 1 < N => i + 1,
            _ => 0,
        };
        let Some(ent) = self.buffer.get_mut(next) else {
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };
        self.last = Some(next);
    }

    /// The most recently recorded payload, if any.
    pub fn latest(&self) -> Option<T> {
        self.last
            .and_then(|ndx| self.buffer.get(ndx))
            .map(|ent| ent.payload)
    }

    /// Returns true if any live entry carries `payload`.
    pub fn contains(&self, payload: T) -> bool {
        self.buffer
            .iter()
            .any(|ent| ent.count != 0 && ent.payload == payload)
    }
}

/// A [`Ringbuf`] that can live in a `static` and be written from any
/// context.
pub struct RingbufCell<T: Copy + PartialEq, const N: usize> {
    cell: critical_section::Mutex<RefCell<Ringbuf<T, N>>>,
}

impl<T: Copy + PartialEq, const N: usize> RingbufCell<T, N> {
    pub const fn new(ringbuf: Ringbuf<T, N>) -> Self {
        Self {
            cell: critical_section::Mutex::new(RefCell::new(ringbuf)),
        }
    }

    pub fn entry(&self, line: u16, payload: T) {
        critical_section::with(|cs| {
            self.cell.borrow_ref_mut(cs).entry(line, payload)
        })
    }

    /// Runs `f` against a snapshot-consistent view of the buffer.
    pub fn with<R>(&self, f: impl FnOnce(&Ringbuf<T, N>) -> R) -> R {
        critical_section::with(|cs| f(&self.cell.borrow_ref(cs)))
    }
}
