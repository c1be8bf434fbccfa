// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed pools of frame-buffer slots.
//!
//! Each direction has an arena of `N` entries, addressed by index, and a set
//! of queues holding those indices. An entry sits in exactly one queue at a
//! time, or is out on the wire as the current receive/transmit target. The
//! queues are sized to hold the whole arena, so a push can only fail if an
//! index has been queued twice, which is a bug.

use heapless::Deque;

pub type EntryId = u8;

/// Where an entry currently is.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    /// Has a buffer, ready to receive into.
    RxFree,
    /// Waiting for the core to supply a buffer.
    RxFreeNoBuf,
    /// Being received into.
    Receiving,
    /// Holds a received frame not yet collected.
    RxPending,
    /// Taken out by `take_pending`, about to be re-queued.
    RxDetached,
    /// Available for a new submission.
    TxFree,
    /// Queued or on the wire.
    TxSubmitted,
}

struct Entry<B> {
    buffer: Option<B>,
    len: usize,
    location: Location,
}

impl<B> Entry<B> {
    fn vacant(location: Location) -> Self {
        Self {
            buffer: None,
            len: 0,
            location,
        }
    }
}

/// Queue lengths across both pools.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolLevels {
    pub rx_free: usize,
    pub rx_free_no_buf: usize,
    pub rx_pending: usize,
    pub tx_free: usize,
    pub tx_submitted: usize,
}

fn push<const N: usize>(queue: &mut Deque<EntryId, N>, id: EntryId) {
    let pushed = queue.push_back(id);
    assert!(pushed.is_ok(), "entry {id} queued twice");
}

pub struct RxPool<B, const N: usize> {
    entries: [Entry<B>; N],
    free: Deque<EntryId, N>,
    free_no_buf: Deque<EntryId, N>,
    pending: Deque<EntryId, N>,
}

impl<B, const N: usize> RxPool<B, N> {
    const FITS: () = assert!(N > 0 && N <= EntryId::MAX as usize);

    /// All entries start out without a buffer.
    pub fn new() -> Self {
        let () = Self::FITS;
        let mut free_no_buf = Deque::new();
        for id in 0..N {
            push(&mut free_no_buf, id as EntryId);
        }
        Self {
            entries: core::array::from_fn(|_| {
                Entry::vacant(Location::RxFreeNoBuf)
            }),
            free: Deque::new(),
            free_no_buf,
            pending: Deque::new(),
        }
    }

    /// Gives buffers to parked entries, in the order they were parked, until
    /// `alloc` runs dry. Returns how many were promoted.
    pub fn refill(&mut self, mut alloc: impl FnMut() -> Option<B>) -> usize {
        let mut promoted = 0;
        while !self.free_no_buf.is_empty() {
            let Some(buffer) = alloc() else {
                break;
            };
            if let Some(id) = self.free_no_buf.pop_front() {
                self.attach_free(id, buffer);
                promoted += 1;
            }
        }
        promoted
    }

    /// Claims an entry to receive into.
    pub fn take_free(&mut self) -> Option<EntryId> {
        let id = self.free.pop_front()?;
        self.entries[usize::from(id)].location = Location::Receiving;
        Some(id)
    }

    pub fn buffer_mut(&mut self, id: EntryId) -> Option<&mut B> {
        self.entries[usize::from(id)].buffer.as_mut()
    }

    /// Moves a receiving entry to the pending queue with `len` bytes.
    pub fn complete(&mut self, id: EntryId, len: usize) {
        let entry = &mut self.entries[usize::from(id)];
        assert_eq!(entry.location, Location::Receiving);
        entry.len = len;
        entry.location = Location::RxPending;
        push(&mut self.pending, id);
    }

    /// Detaches the oldest received frame. The entry must be handed back
    /// with `attach_free` or `park`.
    pub fn take_pending(&mut self) -> Option<(EntryId, B, usize)> {
        let id = self.pending.pop_front()?;
        let entry = &mut self.entries[usize::from(id)];
        entry.location = Location::RxDetached;
        let buffer = entry.buffer.take()?;
        Some((id, buffer, core::mem::take(&mut entry.len)))
    }

    pub fn attach_free(&mut self, id: EntryId, buffer: B) {
        let entry = &mut self.entries[usize::from(id)];
        entry.buffer = Some(buffer);
        entry.len = 0;
        entry.location = Location::RxFree;
        push(&mut self.free, id);
    }

    /// Parks an entry until the core has a buffer for it.
    pub fn park(&mut self, id: EntryId) {
        let entry = &mut self.entries[usize::from(id)];
        entry.buffer = None;
        entry.location = Location::RxFreeNoBuf;
        push(&mut self.free_no_buf, id);
    }

    #[cfg(test)]
    pub fn location(&self, id: EntryId) -> Location {
        self.entries[usize::from(id)].location
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn free_no_buf_len(&self) -> usize {
        self.free_no_buf.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub struct TxPool<B, const N: usize> {
    entries: [Entry<B>; N],
    free: Deque<EntryId, N>,
    submitted: Deque<EntryId, N>,
}

impl<B, const N: usize> TxPool<B, N> {
    const FITS: () = assert!(N > 0 && N <= EntryId::MAX as usize);

    pub fn new() -> Self {
        let () = Self::FITS;
        let mut free = Deque::new();
        for id in 0..N {
            push(&mut free, id as EntryId);
        }
        Self {
            entries: core::array::from_fn(|_| Entry::vacant(Location::TxFree)),
            free,
            submitted: Deque::new(),
        }
    }

    /// Queues `buffer` for transmission behind everything already
    /// submitted. Hands the buffer back if every entry is in use.
    pub fn submit(&mut self, buffer: B, len: usize) -> Result<EntryId, B> {
        let Some(id) = self.free.pop_front() else {
            return Err(buffer);
        };
        let entry = &mut self.entries[usize::from(id)];
        entry.buffer = Some(buffer);
        entry.len = len;
        entry.location = Location::TxSubmitted;
        push(&mut self.submitted, id);
        Ok(id)
    }

    /// The next entry to go on the wire.
    pub fn head(&self) -> Option<EntryId> {
        self.submitted.front().copied()
    }

    /// The head entry with its buffer and payload length.
    pub fn head_frame(&self) -> Option<(EntryId, &B, usize)> {
        let id = self.head()?;
        let entry = &self.entries[usize::from(id)];
        Some((id, entry.buffer.as_ref()?, entry.len))
    }

    #[cfg(test)]
    pub fn buffer(&self, id: EntryId) -> Option<&B> {
        self.entries[usize::from(id)].buffer.as_ref()
    }

    #[cfg(test)]
    pub fn len(&self, id: EntryId) -> usize {
        self.entries[usize::from(id)].len
    }

    /// Retires the head of the submitted queue, which must be `id`, and
    /// returns its buffer.
    pub fn complete_head(&mut self, id: EntryId) -> Option<B> {
        let head = self.submitted.pop_front();
        assert_eq!(head, Some(id), "completed entry is not at the head");
        let entry = &mut self.entries[usize::from(id)];
        entry.len = 0;
        entry.location = Location::TxFree;
        push(&mut self.free, id);
        entry.buffer.take()
    }

    #[cfg(test)]
    pub fn location(&self, id: EntryId) -> Location {
        self.entries[usize::from(id)].location
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn submitted_len(&self) -> usize {
        self.submitted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rx<const N: usize>(buffers: u32) -> RxPool<u32, N> {
        let mut pool = RxPool::new();
        let mut next = 0;
        pool.refill(|| {
            (next < buffers).then(|| {
                next += 1;
                next
            })
        });
        pool
    }

    #[test]
    fn rx_refill_stops_when_core_runs_dry() {
        let pool = make_rx::<4>(3);
        assert_eq!(pool.free_len(), 3);
        assert_eq!(pool.free_no_buf_len(), 1);
        assert_eq!(pool.location(3), Location::RxFreeNoBuf);
    }

    #[test]
    fn rx_entry_moves_through_one_queue_at_a_time() {
        let mut pool = make_rx::<2>(2);

        let id = pool.take_free().unwrap();
        assert_eq!(pool.location(id), Location::Receiving);
        assert_eq!(pool.free_len(), 1);

        pool.complete(id, 20);
        assert_eq!(pool.location(id), Location::RxPending);
        assert_eq!(pool.pending_len(), 1);

        let (taken, buffer, len) = pool.take_pending().unwrap();
        assert_eq!((taken, buffer, len), (id, 1, 20));
        assert_eq!(pool.location(id), Location::RxDetached);

        pool.park(id);
        assert_eq!(pool.location(id), Location::RxFreeNoBuf);
        assert_eq!(pool.free_len() + pool.free_no_buf_len(), 2);

        assert_eq!(pool.refill(|| Some(9)), 1);
        assert_eq!(pool.free_len(), 2);
        assert_eq!(pool.location(id), Location::RxFree);
    }

    #[test]
    fn rx_pending_is_fifo() {
        let mut pool = make_rx::<3>(3);
        let a = pool.take_free().unwrap();
        let b = pool.take_free().unwrap();
        pool.complete(b, 5);
        pool.complete(a, 7);

        let mut next = || pool.take_pending().map(|(id, _, len)| (id, len));
        assert_eq!(next(), Some((b, 5)));
        assert_eq!(next(), Some((a, 7)));
        assert_eq!(next(), None);
    }

    #[test]
    fn tx_submit_backpressure_returns_buffer() {
        let mut pool = TxPool::<&str, 2>::new();
        assert!(pool.submit("a", 1).is_ok());
        assert!(pool.submit("b", 2).is_ok());
        assert_eq!(pool.submit("c", 3), Err("c"));
        assert_eq!(pool.submitted_len(), 2);
        assert_eq!(pool.free_len(), 0);
    }

    #[test]
    fn tx_completes_in_submission_order() {
        let mut pool = TxPool::<&str, 3>::new();
        let a = pool.submit("a", 1).unwrap();
        let b = pool.submit("b", 2).unwrap();

        assert_eq!(pool.head(), Some(a));
        assert_eq!(pool.len(a), 1);
        assert_eq!(pool.complete_head(a), Some("a"));
        assert_eq!(pool.location(a), Location::TxFree);

        assert_eq!(pool.head(), Some(b));
        assert_eq!(pool.buffer(b), Some(&"b"));
        assert_eq!(pool.head_frame(), Some((b, &"b", 2)));
        assert_eq!(pool.complete_head(b), Some("b"));
        assert_eq!(pool.free_len(), 3);
        assert_eq!(pool.head(), None);
    }

    #[test]
    #[should_panic]
    fn tx_out_of_order_completion_panics() {
        let mut pool = TxPool::<&str, 2>::new();
        let _a = pool.submit("a", 1).unwrap();
        let b = pool.submit("b", 2).unwrap();
        pool.complete_head(b);
    }
}
