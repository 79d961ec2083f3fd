//! Lock-free closed-addressing hash table for shared memory.
//!
//! The table is a fixed array of cache-line aligned buckets, each carrying a
//! four-state atomic (EMPTY / INSERTING / READY / ACCESSING). Keyed access
//! uses linear probing from the hashed start index; every bucket interaction
//! is a CAS into a transient state followed by a release store back to a
//! terminal state, which is what makes the table correct across processes
//! with no shared heap and no mutexes.
//!
//! Visitors run synchronously while the calling thread owns the bucket, so a
//! long visitor directly increases tail latency for contenders. Panicking
//! visitors are caught and translated to [`Status::Error`] without leaking
//! the transient state.

mod bucket;

pub use bucket::{Bucket, BucketState};

use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytemuck::Pod;

use crate::backoff::{Backoff, DEFAULT_TIMEOUT};
use crate::block::ShmInit;
use crate::status::{IntoStatus, Status};
use crate::CACHE_LINE_SIZE;

use bucket::{ACCESSING, EMPTY, INSERTING, READY};

/// Default hash builder for the table.
///
/// The probing sequence must agree across every process attached to the
/// same region, so the default is the fixed-key `DefaultHasher`. Never
/// substitute a per-process randomized hasher (e.g. `RandomState`) — the
/// processes would disagree on start indices and miss each other's entries.
pub type DefaultHashBuilder = BuildHasherDefault<DefaultHasher>;

/// How a keyed visit treats a missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Only visit an existing entry; an empty probe slot means NOT_FOUND.
    AccessExist,
    /// Insert the key with a zeroed value if probing ends on an empty slot.
    CreateIfMiss,
}

/// Lock-free fixed-capacity hash table over trivially-copyable keys and
/// values.
///
/// `ROLLBACK` snapshots the value before each visitor and restores it when
/// the visitor does not return success; it is a const generic so the
/// snapshot cost is only paid by tables that opted in.
///
/// A zeroed `ShmHashTable` is a valid empty table (all buckets EMPTY), so
/// the type can be constructed directly over a zero-filled shared region
/// via [`ShmInit::init_in_place`].
#[repr(C)]
pub struct ShmHashTable<
    K,
    V,
    const CAPACITY: usize,
    H = DefaultHashBuilder,
    const ROLLBACK: bool = false,
> {
    buckets: [Bucket<K, V>; CAPACITY],
    _hasher: PhantomData<H>,
}

// SAFETY: every bucket access is mediated by the per-bucket state machine;
// payloads are Pod and move across threads by copy.
unsafe impl<K, V, const CAPACITY: usize, H, const ROLLBACK: bool> Send
    for ShmHashTable<K, V, CAPACITY, H, ROLLBACK>
where
    K: Pod + Send,
    V: Pod + Send,
{
}
unsafe impl<K, V, const CAPACITY: usize, H, const ROLLBACK: bool> Sync
    for ShmHashTable<K, V, CAPACITY, H, ROLLBACK>
where
    K: Pod + Send + Sync,
    V: Pod + Send + Sync,
{
}

impl<K, V, const CAPACITY: usize, H, const ROLLBACK: bool>
    ShmHashTable<K, V, CAPACITY, H, ROLLBACK>
where
    K: Pod + Hash + PartialEq,
    V: Pod,
    H: BuildHasher + Default,
{
    /// Compile-time layout checks, forced on every construction path.
    const LAYOUT_OK: () = {
        assert!(CAPACITY > 0, "CAPACITY must be > 0");
        assert!(
            mem::size_of::<Bucket<K, V>>() % CACHE_LINE_SIZE == 0,
            "Bucket must be a cache-line multiple"
        );
    };

    /// Create an empty table in place (for in-process use and tests).
    ///
    /// Large-capacity tables are better placed behind a [`crate::ShmStorage`]
    /// or at least a `Box` — this constructor builds the whole bucket array
    /// by value.
    pub fn new() -> Self {
        let _ = Self::LAYOUT_OK;
        // SAFETY: zeroed buckets are EMPTY buckets, and every field of the
        // table is valid when zero-initialized.
        unsafe { MaybeUninit::zeroed().assume_init() }
    }

    pub const fn capacity(&self) -> usize {
        CAPACITY
    }

    #[inline]
    fn start_index(&self, key: &K) -> usize {
        let hash = H::default().hash_one(key);
        (hash % CAPACITY as u64) as usize
    }

    /// Visit the entry for `key`, waiting up to [`DEFAULT_TIMEOUT`] on
    /// contended buckets. See [`Self::visit_with_timeout`].
    pub fn visit<F, R>(&self, key: &K, mode: AccessMode, visitor: F) -> Status
    where
        F: FnMut(usize, &mut V, bool) -> R,
        R: IntoStatus,
    {
        self.visit_with_timeout(key, mode, visitor, DEFAULT_TIMEOUT)
    }

    /// Visit the entry for `key`.
    ///
    /// The visitor receives `(bucket_index, value, is_new)` and may return
    /// `()` (success) or a [`Status`]. Returns:
    ///
    /// - `SUCCESS` when the visitor ran (insert path), or the visitor's own
    ///   status (update path);
    /// - `NOT_FOUND` when `mode` is [`AccessMode::AccessExist`] and probing
    ///   reached a never-touched slot, or when all `CAPACITY` probes were
    ///   exhausted;
    /// - `TIMEOUT` when the backoff budget ran out waiting on a transient
    ///   bucket;
    /// - `ERROR` when the visitor panicked.
    ///
    /// A failing visitor during insert always releases the slot back to
    /// EMPTY, so a key is only ever present once its insertion succeeded.
    /// The key itself is written after the visitor and before the READY
    /// publication: a reader that observes READY observes both the key and
    /// the visitor-written value.
    pub fn visit_with_timeout<F, R>(
        &self,
        key: &K,
        mode: AccessMode,
        mut visitor: F,
        timeout: Duration,
    ) -> Status
    where
        F: FnMut(usize, &mut V, bool) -> R,
        R: IntoStatus,
    {
        let _ = Self::LAYOUT_OK;
        let mut backoff = Backoff::new(timeout);
        let start = self.start_index(key);

        for probe in 0..CAPACITY {
            let idx = (start + probe) % CAPACITY;
            let bucket = &self.buckets[idx];

            loop {
                let state = bucket.state.load(Ordering::Acquire);

                if state == READY {
                    // SAFETY: keys are immutable from the first READY store
                    // onward; the acquire load above synchronizes with the
                    // inserting thread's release store.
                    if unsafe { bucket.key() } != key {
                        break; // collision, next probe
                    }

                    if bucket
                        .state
                        .compare_exchange(READY, ACCESSING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        if !backoff.step() {
                            log::debug!("bucket[{idx}] backoff timeout");
                            return Status::Timeout;
                        }
                        continue;
                    }
                    log::trace!("bucket[{idx}] READY -> ACCESSING");

                    // SAFETY: this thread owns the ACCESSING state.
                    let value = unsafe { bucket.value_mut() };
                    let saved = if ROLLBACK { Some(*value) } else { None };

                    let status = Self::apply_visitor(&mut visitor, idx, value, false);
                    if ROLLBACK && status.is_failed() {
                        if let Some(old) = saved {
                            // SAFETY: still the owner until the store below.
                            unsafe { *bucket.value_mut() = old };
                        }
                    }

                    log::trace!("bucket[{idx}] ACCESSING -> READY");
                    bucket.state.store(READY, Ordering::Release);
                    return status;
                }

                if state == EMPTY {
                    if mode == AccessMode::AccessExist {
                        // A matching key would have been published before
                        // this slot ever left EMPTY, so the probe chain
                        // cannot continue past it.
                        return Status::NotFound;
                    }

                    if bucket
                        .state
                        .compare_exchange(EMPTY, INSERTING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        if !backoff.step() {
                            log::debug!("bucket[{idx}] backoff timeout");
                            return Status::Timeout;
                        }
                        continue;
                    }
                    log::trace!("bucket[{idx}] EMPTY -> INSERTING");

                    // SAFETY: this thread owns the INSERTING state.
                    let value = unsafe { bucket.value_mut() };
                    *value = V::zeroed();

                    let status = Self::apply_visitor(&mut visitor, idx, value, true);
                    if status.is_failed() {
                        // Release the slot back to the empty pool: a key is
                        // only reachable once its insertion succeeded.
                        log::trace!("bucket[{idx}] INSERTING -> EMPTY");
                        bucket.state.store(EMPTY, Ordering::Release);
                        return status;
                    }

                    // SAFETY: still the owner; the key must be in place
                    // before the READY publication below.
                    unsafe { *bucket.key.get() = *key };

                    log::trace!("bucket[{idx}] INSERTING -> READY");
                    bucket.state.store(READY, Ordering::Release);
                    return Status::Success;
                }

                // INSERTING or ACCESSING: some other thread owns the bucket.
                if !backoff.step() {
                    log::debug!("bucket[{idx}] backoff timeout");
                    return Status::Timeout;
                }
            }
        }

        // Full table on a create attempt, or the collision chain did not
        // contain the key.
        Status::NotFound
    }

    /// Visit every READY bucket in index order with the default timeout.
    pub fn travel<F, R>(&self, visitor: F) -> Status
    where
        F: FnMut(usize, &K, &mut V) -> R,
        R: IntoStatus,
    {
        self.travel_with_timeout(visitor, DEFAULT_TIMEOUT)
    }

    /// Visit every READY bucket in index order.
    ///
    /// Each visit acquires the bucket's ACCESSING right first. An EMPTY
    /// bucket only ends the wait on that index — the scan continues with
    /// the next one, because linear probing leaves EMPTY holes between
    /// occupied slots. A visitor returning non-success aborts the traversal
    /// with that status.
    ///
    /// No linearizability is implied against concurrent visits: a traveler
    /// may or may not observe an insertion that races with the scan.
    pub fn travel_with_timeout<F, R>(&self, mut visitor: F, timeout: Duration) -> Status
    where
        F: FnMut(usize, &K, &mut V) -> R,
        R: IntoStatus,
    {
        let _ = Self::LAYOUT_OK;
        let mut backoff = Backoff::new(timeout);

        for idx in 0..CAPACITY {
            let bucket = &self.buckets[idx];
            loop {
                let state = bucket.state.load(Ordering::Acquire);

                if state == EMPTY {
                    break;
                }

                if state == READY {
                    if bucket
                        .state
                        .compare_exchange(READY, ACCESSING, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        if !backoff.step() {
                            return Status::Timeout;
                        }
                        continue;
                    }

                    // SAFETY: this thread owns the ACCESSING state; the key
                    // is immutable while READY/ACCESSING.
                    let status = {
                        let key = unsafe { bucket.key() };
                        let value = unsafe { bucket.value_mut() };
                        Self::apply_travel_visitor(&mut visitor, idx, key, value)
                    };
                    bucket.state.store(READY, Ordering::Release);

                    if status.is_failed() {
                        return status;
                    }
                    break;
                }

                if !backoff.step() {
                    return Status::Timeout;
                }
            }
        }
        Status::Success
    }

    /// Visit one bucket directly by index, for exclusive-ownership
    /// scenarios such as auditing a table just joined.
    ///
    /// Returns `INVALID_ARGUMENT` for an out-of-range index and `NOT_FOUND`
    /// when the bucket is not observably READY (including when the
    /// READY→ACCESSING claim is lost to a contender — the operation never
    /// waits). With `ROLLBACK`, the value is snapshotted before the visitor
    /// and restored on non-success.
    pub fn visit_bucket<F, R>(&self, index: usize, mut visitor: F) -> Status
    where
        F: FnMut(&K, &mut V) -> R,
        R: IntoStatus,
    {
        if index >= CAPACITY {
            return Status::InvalidArgument;
        }
        let bucket = &self.buckets[index];

        if bucket
            .state
            .compare_exchange(READY, ACCESSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Status::NotFound;
        }

        // SAFETY: this thread owns the ACCESSING state.
        let value = unsafe { bucket.value_mut() };
        let saved = if ROLLBACK { Some(*value) } else { None };
        let status = {
            let key = unsafe { bucket.key() };
            Self::apply_bucket_visitor(&mut visitor, key, value)
        };
        if ROLLBACK && status.is_failed() {
            if let Some(old) = saved {
                // SAFETY: still the owner until the store below.
                unsafe { *bucket.value_mut() = old };
            }
        }
        bucket.state.store(READY, Ordering::Release);
        status
    }

    /// Raw enumeration of every slot regardless of state, with no
    /// synchronization at all. The `&mut self` receiver makes the
    /// single-threaded audit contract a compile-time fact.
    pub fn travel_bucket<F>(&mut self, mut visitor: F)
    where
        F: FnMut(usize, BucketState, &K, &V),
    {
        for idx in 0..CAPACITY {
            let bucket = &self.buckets[idx];
            let state = BucketState::from_raw(bucket.state.load(Ordering::Relaxed));
            // SAFETY: exclusive access through &mut self.
            unsafe {
                visitor(idx, state, &*bucket.key.get(), &*bucket.value.get());
            }
        }
    }

    fn apply_visitor<F, R>(visitor: &mut F, idx: usize, value: &mut V, is_new: bool) -> Status
    where
        F: FnMut(usize, &mut V, bool) -> R,
        R: IntoStatus,
    {
        match panic::catch_unwind(AssertUnwindSafe(|| visitor(idx, value, is_new).into_status())) {
            Ok(status) => status,
            Err(_) => Status::Error,
        }
    }

    fn apply_travel_visitor<F, R>(visitor: &mut F, idx: usize, key: &K, value: &mut V) -> Status
    where
        F: FnMut(usize, &K, &mut V) -> R,
        R: IntoStatus,
    {
        match panic::catch_unwind(AssertUnwindSafe(|| visitor(idx, key, value).into_status())) {
            Ok(status) => status,
            Err(_) => Status::Error,
        }
    }

    fn apply_bucket_visitor<F, R>(visitor: &mut F, key: &K, value: &mut V) -> Status
    where
        F: FnMut(&K, &mut V) -> R,
        R: IntoStatus,
    {
        match panic::catch_unwind(AssertUnwindSafe(|| visitor(key, value).into_status())) {
            Ok(status) => status,
            Err(_) => Status::Error,
        }
    }
}

impl<K, V, const CAPACITY: usize, H, const ROLLBACK: bool> Default
    for ShmHashTable<K, V, CAPACITY, H, ROLLBACK>
where
    K: Pod + Hash + PartialEq,
    V: Pod,
    H: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: a zeroed table is a valid empty table — every bucket state word is
// EMPTY and Pod payloads accept any bit pattern. Nothing else to construct.
unsafe impl<K, V, const CAPACITY: usize, H, const ROLLBACK: bool> ShmInit
    for ShmHashTable<K, V, CAPACITY, H, ROLLBACK>
where
    K: Pod + Hash + PartialEq,
    V: Pod,
    H: BuildHasher + Default,
{
    unsafe fn init_in_place(_this: *mut Self) {
        let _ = Self::LAYOUT_OK;
    }
}
