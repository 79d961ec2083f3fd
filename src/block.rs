//! One-shot in-place construction guard over a raw shared region.
//!
//! Processes race to attach to a freshly created region; exactly one runs
//! the embedded container's construction, and everyone else waits until the
//! block publishes READY. The handshake is a 3-state atomic in the first
//! four bytes of the region.

use std::cell::UnsafeCell;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::backoff::Backoff;
use crate::error::{ShmError, ShmResult};

const UNINIT: u32 = 0;
const BUILDING: u32 = 1;
const READY: u32 = 2;

/// In-place construction over zeroed bytes.
///
/// # Safety
///
/// Implementors guarantee that after `init_in_place` returns on a
/// zero-initialized, properly aligned allocation of `size_of::<Self>()`
/// bytes, the memory holds a valid empty instance of `Self`. Containers
/// whose zeroed representation is already valid implement this as a no-op.
pub unsafe trait ShmInit: Sized {
    /// Initialize an empty instance in place.
    ///
    /// # Safety
    ///
    /// `this` must point to `size_of::<Self>()` zero-initialized bytes with
    /// the alignment of `Self`, and no other thread may access the memory
    /// until initialization is published (the [`ShmBlock`] handshake does
    /// exactly that).
    unsafe fn init_in_place(this: *mut Self);
}

/// Header guarding one-shot construction of an embedded container.
///
/// The 4-byte state word is the very start of the region; the container
/// follows at its natural alignment. The embedded `T` is only observable
/// once the state reads READY.
#[repr(C)]
pub struct ShmBlock<T> {
    state: AtomicU32,
    inner: UnsafeCell<T>,
}

// SAFETY: access to the embedded container is published through the state
// handshake; afterwards T's own synchronization applies.
unsafe impl<T: Send> Send for ShmBlock<T> {}
unsafe impl<T: Send + Sync> Sync for ShmBlock<T> {}

impl<T: ShmInit> ShmBlock<T> {
    /// Exact byte size a region must have to back this block.
    pub const fn mem_usage() -> usize {
        mem::size_of::<Self>()
    }

    /// Attach to `mem`, constructing the container if this caller wins the
    /// UNINIT→BUILDING race, otherwise waiting for the winner to publish.
    ///
    /// # Safety
    ///
    /// `mem` must point to at least [`mem_usage`](Self::mem_usage) bytes of
    /// a shared mapping, aligned for `Self`, zero-filled at region creation,
    /// and must stay mapped for the lifetime of the returned pointer.
    pub unsafe fn create(mem: NonNull<u8>, timeout: Duration) -> ShmResult<NonNull<Self>> {
        let block = Self::cast(mem)?;
        let header = block.as_ref();

        if header
            .state
            .compare_exchange(UNINIT, BUILDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            T::init_in_place(header.inner.get());
            header.state.store(READY, Ordering::Release);
            log::debug!("block: constructed in place");
        } else {
            log::debug!("block: lost construction race, waiting for owner");
            header.wait_ready(timeout)?;
        }
        Ok(block)
    }

    /// Attach to `mem` without competing for construction; waits until a
    /// creator publishes READY.
    ///
    /// # Safety
    ///
    /// Same contract as [`create`](Self::create).
    pub unsafe fn open(mem: NonNull<u8>, timeout: Duration) -> ShmResult<NonNull<Self>> {
        let block = Self::cast(mem)?;
        block.as_ref().wait_ready(timeout)?;
        Ok(block)
    }

    unsafe fn cast(mem: NonNull<u8>) -> ShmResult<NonNull<Self>> {
        if mem.as_ptr() as usize % mem::align_of::<Self>() != 0 {
            return Err(ShmError::memory("block region is not properly aligned"));
        }
        Ok(mem.cast::<Self>())
    }

    fn wait_ready(&self, timeout: Duration) -> ShmResult<()> {
        let mut backoff = Backoff::new(timeout);
        while self.state.load(Ordering::Acquire) != READY {
            if !backoff.step() {
                return Err(ShmError::timeout(
                    "block construction did not complete; the owner may have died mid-build",
                ));
            }
        }
        Ok(())
    }

    /// Whether the embedded container has been published.
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// The embedded container.
    ///
    /// Handles returned by [`create`](Self::create)/[`open`](Self::open)
    /// are always READY; this only observes an unconstructed `T` if the
    /// caller broke that flow.
    pub fn get(&self) -> &T {
        debug_assert!(self.is_ready());
        // SAFETY: published via the acquire/release handshake.
        unsafe { &*self.inner.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::ShmVector;
    use std::mem::MaybeUninit;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    type Vec8 = ShmVector<u64, 8>;
    type Block = ShmBlock<Vec8>;

    /// Zeroed, properly aligned backing for a block, as a fresh region
    /// would provide.
    fn zeroed_region() -> Box<MaybeUninit<Block>> {
        Box::new(MaybeUninit::zeroed())
    }

    fn region_ptr(region: &mut MaybeUninit<Block>) -> NonNull<u8> {
        NonNull::new(region.as_mut_ptr() as *mut u8).unwrap()
    }

    #[test]
    fn create_constructs_and_publishes() {
        let mut region = zeroed_region();
        let block = unsafe { Block::create(region_ptr(&mut region), Duration::from_secs(1)) }
            .expect("create failed");
        let block = unsafe { block.as_ref() };
        assert!(block.is_ready());
        assert_eq!(block.get().push(42), Some(0));
        assert_eq!(block.get().get(0), Some(&42));
    }

    #[test]
    fn second_create_attaches_to_existing() {
        let mut region = zeroed_region();
        let ptr = region_ptr(&mut region);
        let first = unsafe { Block::create(ptr, Duration::from_secs(1)) }.unwrap();
        assert_eq!(unsafe { first.as_ref() }.get().push(7), Some(0));

        let second = unsafe { Block::create(ptr, Duration::from_secs(1)) }.unwrap();
        assert_eq!(unsafe { second.as_ref() }.get().get(0), Some(&7));
    }

    #[test]
    fn open_times_out_without_a_creator() {
        let mut region = zeroed_region();
        let result = unsafe { Block::open(region_ptr(&mut region), Duration::from_millis(20)) };
        assert!(matches!(result, Err(ShmError::Timeout(_))));
    }

    #[test]
    fn racing_creators_construct_exactly_once() {
        // The container tallies constructions through a side channel.
        struct CountingInit;
        static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

        // SAFETY: zeroed bytes are valid; init only bumps the counter.
        unsafe impl ShmInit for CountingInit {
            unsafe fn init_in_place(_this: *mut Self) {
                CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let region: Arc<MaybeUninit<ShmBlock<CountingInit>>> =
            Arc::new(MaybeUninit::zeroed());
        let addr = region.as_ptr() as usize;

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let region = region.clone();
                std::thread::spawn(move || {
                    let _hold = region;
                    let mem = NonNull::new(addr as *mut u8).unwrap();
                    unsafe { ShmBlock::<CountingInit>::create(mem, Duration::from_secs(5)) }
                        .expect("create failed");
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(CONSTRUCTIONS.load(Ordering::SeqCst), 1);
    }
}
