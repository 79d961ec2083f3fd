//! Single-producer ring buffer with claiming consumers.
//!
//! The producer publishes with a plain store on `tail`; any number of
//! consumers race a CAS on `head` to claim elements, and exactly one
//! consumer receives each element.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;

use super::CachePadded;
use crate::block::ShmInit;

/// Power-of-two FIFO: one producer, many claiming consumers.
///
/// A zeroed `SpmcRing` is a valid empty ring, so the type can be
/// constructed directly over a zero-filled shared region.
///
/// Only one thread (across all processes) may call [`push`](Self::push) —
/// the single-producer guarantee. Consumers have no such restriction.
#[repr(C)]
pub struct SpmcRing<T, const N: usize> {
    data: [UnsafeCell<T>; N],
    /// Consumer-side counter: next element to claim.
    head: CachePadded<AtomicU64>,
    /// Producer-side counter: next slot to fill.
    tail: CachePadded<AtomicU64>,
}

// SAFETY: elements are Pod and move across threads by copy; counter
// ownership is enforced by the push/pop protocol.
unsafe impl<T: Pod + Send, const N: usize> Send for SpmcRing<T, N> {}
unsafe impl<T: Pod + Send + Sync, const N: usize> Sync for SpmcRing<T, N> {}

impl<T: Pod, const N: usize> SpmcRing<T, N> {
    const CAPACITY_OK: () = assert!(
        N != 0 && N & (N - 1) == 0,
        "capacity must be a non-zero power of two"
    );

    /// Create an empty ring in place (for in-process use and tests).
    pub fn new() -> Self {
        let _ = Self::CAPACITY_OK;
        // SAFETY: zeroed counters and Pod slots are a valid empty ring.
        unsafe { MaybeUninit::zeroed().assume_init() }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of unclaimed elements at this snapshot.
    pub fn len(&self) -> usize {
        // head first: head never passes tail, so tail sampled afterwards
        // can only be >= the head we saw
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    /// Reset the ring to empty. Exclusive access only.
    pub fn clear(&mut self) {
        *self.head.0.get_mut() = 0;
        *self.tail.0.get_mut() = 0;
    }

    /// Push an element. Returns `false` when the ring is full.
    ///
    /// Single producer: only one thread across all attached processes may
    /// call this.
    pub fn push(&self, value: T) -> bool {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Relaxed);
        if tail.wrapping_sub(head) >= N as u64 {
            return false; // full
        }
        // SAFETY: single-producer contract; the slot at tail is outside
        // [head, tail) so no consumer claims it before the store below.
        unsafe {
            *self.data[(tail as usize) & (N - 1)].get() = value;
        }
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Claim and return the oldest element, or `None` when empty.
    ///
    /// Any number of threads may pop concurrently; each element is received
    /// by exactly one of them.
    pub fn pop(&self) -> Option<T> {
        let mut head = self.head.0.load(Ordering::Relaxed);
        loop {
            let tail = self.tail.0.load(Ordering::Acquire);
            if head >= tail {
                return None; // empty
            }
            match self.head.0.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // SAFETY: this thread claimed slot `head`. The producer
                    // may already be overwriting it for lap `head + N`; T is
                    // Pod, so even a torn read yields a valid value, and the
                    // claim guarantees no other consumer returns this slot.
                    let value = unsafe { *self.data[(head as usize) & (N - 1)].get() };
                    return Some(value);
                }
                Err(actual) => head = actual,
            }
        }
    }
}

impl<T: Pod, const N: usize> Default for SpmcRing<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: zeroed bytes are a valid empty ring; nothing to construct.
unsafe impl<T: Pod, const N: usize> ShmInit for SpmcRing<T, N> {
    unsafe fn init_in_place(_this: *mut Self) {
        let _ = Self::CAPACITY_OK;
    }
}
