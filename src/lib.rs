//! # shmkit
//!
//! Fixed-capacity, lock-free concurrent containers designed to live entirely
//! inside a shared memory segment mapped by multiple cooperating processes.
//!
//! The crate provides the building blocks:
//!
//! - **Table**: a closed-addressing hash table whose buckets carry a small
//!   per-slot state machine ([`ShmHashTable`])
//! - **Rings**: single-producer claiming ([`SpmcRing`]), sequence-indexed
//!   MPMC ([`MpmcRing`]), and broadcast ([`BroadcastRing`]) ring buffers
//! - **Vector**: an atomic-size append-only array ([`ShmVector`])
//! - **Block**: a one-shot in-place construction guard over a raw region
//!   ([`ShmBlock`])
//! - **Storage**: a process-wide binding of a container type to a named
//!   POSIX shared-memory region ([`ShmStorage`])
//!
//! Containers never allocate and never block indefinitely: every wait is
//! bounded by a caller-supplied [`Backoff`] budget. Keys, values, and ring
//! elements are constrained to [`bytemuck::Pod`] so that byte copies are
//! correct across address spaces.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use shmkit::{AccessMode, ShmHashTable, ShmStorage};
//!
//! type Counters = ShmHashTable<u64, u64, 1024>;
//!
//! # fn main() -> shmkit::ShmResult<()> {
//! // Any number of processes can run this concurrently; the first one
//! // constructs the table, the rest attach to it.
//! let counters = ShmStorage::<Counters>::instance("my_counters")?;
//!
//! let status = counters.visit(&7, AccessMode::CreateIfMiss, |_, count, _| {
//!     *count += 1;
//! });
//! assert!(status.is_success());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod block;
pub mod error;
pub mod region;
pub mod ring;
pub mod status;
pub mod storage;
pub mod table;
pub mod vector;

pub use backoff::{Backoff, DEFAULT_TIMEOUT};
pub use block::{ShmBlock, ShmInit};
pub use error::{ShmError, ShmResult};
pub use region::ShmRegion;
pub use ring::{BroadcastReader, BroadcastRing, MpmcRing, SpmcRing};
pub use status::{IntoStatus, Status};
pub use storage::ShmStorage;
pub use table::{AccessMode, Bucket, BucketState, DefaultHashBuilder, ShmHashTable};
pub use vector::ShmVector;

// Re-export bytemuck for consistent Pod/Zeroable trait usage
pub use bytemuck;

/// Cache line size assumed for bucket alignment and counter padding.
pub const CACHE_LINE_SIZE: usize = 64;
