//! Hash table bucket: a cache-line aligned `{state, key, value}` record.
//!
//! The state atomic is the sole synchronization point for the bucket body.
//! All key/value writes happen between an acquire CAS that takes a transient
//! state (INSERTING, ACCESSING) and the release store that returns to a
//! terminal state (EMPTY, READY), so any thread that acquires the terminal
//! state observes the writes performed under the preceding ownership.

use std::cell::UnsafeCell;
use std::sync::atomic::AtomicU32;

use bytemuck::Pod;

pub(crate) const EMPTY: u32 = 0;
pub(crate) const INSERTING: u32 = 1;
pub(crate) const READY: u32 = 2;
pub(crate) const ACCESSING: u32 = 3;

/// Snapshot of a bucket's state, for audit enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    /// Never inserted, or released by a failed insert
    Empty,
    /// Transient: one thread is inserting a new entry
    Inserting,
    /// Terminal: holds a reachable key/value pair
    Ready,
    /// Transient: one thread is visiting the value
    Accessing,
}

impl BucketState {
    /// Decode the raw state word. The crate only ever stores the four
    /// states, so anything else can only come from external corruption and
    /// is reported as the nearest transient.
    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            EMPTY => BucketState::Empty,
            INSERTING => BucketState::Inserting,
            READY => BucketState::Ready,
            _ => BucketState::Accessing,
        }
    }
}

/// One slot of the table's storage array.
///
/// Cache-line alignment keeps neighbouring buckets out of each other's
/// coherency traffic; `#[repr(C, align(64))]` also pads the size to a
/// multiple of the cache line. A zeroed bucket is a valid EMPTY bucket,
/// which is what makes zero-filled fresh regions directly usable.
#[repr(C, align(64))]
pub struct Bucket<K, V> {
    pub(crate) state: AtomicU32,
    pub(crate) key: UnsafeCell<K>,
    pub(crate) value: UnsafeCell<V>,
}

impl<K: Pod, V: Pod> Bucket<K, V> {
    /// Read the key. Sound only while the caller knows the key is stable:
    /// after observing READY with acquire ordering (keys are immutable from
    /// the first READY store onward), or under exclusive access.
    #[inline]
    pub(crate) unsafe fn key(&self) -> &K {
        &*self.key.get()
    }

    /// Mutable access to the value. Sound only while the calling thread
    /// holds the bucket in a transient state.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn value_mut(&self) -> &mut V {
        &mut *self.value.get()
    }
}
