//! Broadcast ring: every registered reader receives every element.
//!
//! Each cell carries `(seq, remain, data)`. A producer claims the next tail
//! position, publishes the element with `seq = pos`, and arms the countdown
//! `remain = K`. Each of the `K` registered readers holds a private cursor
//! and takes each position exactly once, decrementing the countdown; a cell
//! is only rewritable once its countdown reaches zero, so a slow reader
//! exerts backpressure on the producer rather than losing elements.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use bytemuck::Pod;

use super::CachePadded;
use crate::backoff::{Backoff, DEFAULT_TIMEOUT};
use crate::block::ShmInit;
use crate::error::{ShmError, ShmResult};
use crate::status::Status;

#[repr(C)]
struct Cell<T> {
    /// Lap stamp: the position whose element this cell currently holds.
    /// Initialized to `i - N` so the first-lap claim check is uniform.
    seq: AtomicU64,
    /// Readers that have not yet taken this element.
    remain: AtomicU32,
    data: UnsafeCell<T>,
}

/// Power-of-two broadcast ring for `K` registered readers.
///
/// Like [`MpmcRing`](super::MpmcRing), a zeroed `BroadcastRing` is not yet
/// valid: the cell stamps must be initialized, so construction always goes
/// through [`new`](Self::new) or [`ShmInit::init_in_place`].
#[repr(C)]
pub struct BroadcastRing<T, const N: usize, const K: usize> {
    cells: [Cell<T>; N],
    /// Producer-side counter: next position to claim.
    tail: CachePadded<AtomicU64>,
    /// Readers registered so far, capped at `K`.
    registered: CachePadded<AtomicU32>,
}

// SAFETY: elements are Pod and are copied out; cell access is coordinated by
// the seq/remain protocol.
unsafe impl<T: Pod + Send, const N: usize, const K: usize> Send for BroadcastRing<T, N, K> {}
unsafe impl<T: Pod + Send + Sync, const N: usize, const K: usize> Sync
    for BroadcastRing<T, N, K>
{
}

/// A registered reader's handle: a private cursor plus a reference to the
/// ring. Created through [`BroadcastRing::reader`] so the registration count
/// stays within the ring's countdown arithmetic.
///
/// Registration is permanent for the lifetime of the ring: dropping a reader
/// does not hand its outstanding countdowns to anyone else.
pub struct BroadcastReader<'a, T, const N: usize, const K: usize> {
    ring: &'a BroadcastRing<T, N, K>,
    cursor: u64,
}

impl<T: Pod, const N: usize, const K: usize> BroadcastRing<T, N, K> {
    const CAPACITY_OK: () = {
        assert!(
            N != 0 && N & (N - 1) == 0,
            "capacity must be a non-zero power of two"
        );
        assert!(K >= 1, "a broadcast ring needs at least one reader");
        assert!(K <= u32::MAX as usize, "reader count must fit in u32");
    };

    /// Create an empty ring in place (for in-process use and tests).
    pub fn new() -> Self {
        let _ = Self::CAPACITY_OK;
        // SAFETY: all-zero bytes are a valid representation; the stamps
        // written by init_in_place make it a valid empty ring.
        let mut ring: Self = unsafe { MaybeUninit::zeroed().assume_init() };
        unsafe { Self::init_in_place(&mut ring) };
        ring
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Readers registered so far.
    pub fn registered(&self) -> usize {
        self.registered.0.load(Ordering::Relaxed).min(K as u32) as usize
    }

    /// Register a reader. At most `K` readers may exist across all attached
    /// processes; further registrations are refused.
    pub fn reader(&self) -> ShmResult<BroadcastReader<'_, T, N, K>> {
        let id = self.registered.0.fetch_add(1, Ordering::Relaxed);
        if id as usize >= K {
            self.registered.0.fetch_sub(1, Ordering::Relaxed);
            return Err(ShmError::invalid_input(format!(
                "broadcast ring supports at most {K} readers"
            )));
        }
        Ok(BroadcastReader {
            ring: self,
            cursor: 0,
        })
    }

    /// Push an element with the default timeout. See
    /// [`push_with_timeout`](Self::push_with_timeout).
    pub fn push(&self, value: T) -> Status {
        self.push_with_timeout(value, DEFAULT_TIMEOUT)
    }

    /// Push an element to every registered reader.
    ///
    /// Claims the next tail position once the cell has been drained by all
    /// `K` readers of its previous lap, publishes the element, and arms the
    /// countdown. Waits with backoff while the cell is still draining;
    /// returns [`Status::Timeout`] when the budget runs out, in which case
    /// the ring is left untouched (the claim only happens after the cell is
    /// verified writable).
    pub fn push_with_timeout(&self, value: T, timeout: Duration) -> Status {
        let _ = Self::CAPACITY_OK;
        let mut backoff = Backoff::new(timeout);

        let pos = loop {
            let pos = self.tail.0.load(Ordering::Relaxed);
            let cell = &self.cells[(pos as usize) & (N - 1)];

            // Writable: the previous lap's element was published here
            // (seq == pos - N) and every reader has taken it (remain == 0).
            // Checking both closes the window where a fully-lapped claim
            // could land on a cell another producer has claimed but not yet
            // published.
            let drained = cell.seq.load(Ordering::Acquire) == pos.wrapping_sub(N as u64)
                && cell.remain.load(Ordering::Acquire) == 0;
            if !drained {
                if !backoff.step() {
                    return Status::Timeout;
                }
                continue;
            }

            match self.tail.0.compare_exchange_weak(
                pos,
                pos.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break pos,
                Err(_) => continue, // lost the claim race; re-evaluate
            }
        };

        let cell = &self.cells[(pos as usize) & (N - 1)];
        // SAFETY: winning the tail CAS at `pos` after the drained check
        // grants exclusive write access: readers stop at the old stamp and
        // no other producer can claim this position.
        unsafe {
            *cell.data.get() = value;
        }
        cell.seq.store(pos, Ordering::Release);
        cell.remain.store(K as u32, Ordering::Release);
        Status::Success
    }
}

impl<T: Pod, const N: usize, const K: usize> Default for BroadcastRing<T, N, K> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: stamps each cell's lap sequence to `i - N` over the zeroed bytes;
// counters start at zero which the zeroed representation already provides.
unsafe impl<T: Pod, const N: usize, const K: usize> ShmInit for BroadcastRing<T, N, K> {
    unsafe fn init_in_place(this: *mut Self) {
        let _ = Self::CAPACITY_OK;
        let cells = &(*this).cells;
        for (i, cell) in cells.iter().enumerate() {
            cell.seq
                .store((i as u64).wrapping_sub(N as u64), Ordering::Relaxed);
        }
    }
}

impl<T: Pod, const N: usize, const K: usize> BroadcastReader<'_, T, N, K> {
    /// Take the next element for this reader, or `None` when the producer
    /// has not yet published it.
    pub fn try_pop(&mut self) -> Option<T> {
        let cell = &self.ring.cells[(self.cursor as usize) & (N - 1)];

        if cell.seq.load(Ordering::Acquire) != self.cursor {
            return None; // not yet published for this position
        }
        if cell.remain.load(Ordering::Acquire) == 0 {
            return None; // countdown not yet armed
        }

        // SAFETY: the cell holds the element for `self.cursor` and this
        // reader has not decremented its countdown yet, so remain >= 1 and
        // the producer cannot rewrite the cell until after the fetch_sub
        // below.
        let value = unsafe { *cell.data.get() };
        cell.remain.fetch_sub(1, Ordering::AcqRel);
        self.cursor += 1;
        Some(value)
    }

    /// Position of the next element this reader will take.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}
