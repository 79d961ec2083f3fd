//! Lock-free ring buffers sharing the shared-memory discipline: fixed
//! power-of-two capacity, monotonically increasing 64-bit counters, and a
//! zero-allocation layout that lives entirely inside a mapped region.

mod broadcast;
mod mpmc;
mod spmc;

pub use broadcast::{BroadcastReader, BroadcastRing};
pub use mpmc::MpmcRing;
pub use spmc::SpmcRing;

/// Cache-line aligned wrapper to prevent false sharing between the
/// producer- and consumer-owned counters.
#[repr(C, align(64))]
pub(crate) struct CachePadded<T>(pub T);
