//! Process-wide binding of a container type to a named shared region.
//!
//! `ShmStorage<T>` is the top of the stack: it acquires the named region at
//! exactly the block's byte size, drives the one-shot construction
//! handshake, and exposes the embedded container. Each `(T, name)` pair
//! binds at most once per process through a lazily-initialized registry, so
//! every caller in the process shares one mapping.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, OnceLock};

use crate::backoff::DEFAULT_TIMEOUT;
use crate::block::{ShmBlock, ShmInit};
use crate::error::{ShmError, ShmResult};
use crate::region::ShmRegion;

type BindingMap = HashMap<(TypeId, String), Arc<dyn Any + Send + Sync>>;

/// Process-wide registry mapping (container type, region name) → storage.
static REGISTRY: OnceLock<Mutex<BindingMap>> = OnceLock::new();

fn registry() -> &'static Mutex<BindingMap> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A named shared region with a container of type `T` constructed inside.
///
/// Dropping the last handle unmaps the region but leaves the OS-level name
/// in place; [`ShmStorage::destroy`] removes the name as well. There is no
/// cross-process reference counting — coordinating who calls `destroy` is
/// the caller's job.
pub struct ShmStorage<T: ShmInit> {
    region: ShmRegion,
    block: NonNull<ShmBlock<T>>,
}

// SAFETY: the block pointer targets the region mapping owned by self; the
// embedded container carries its own synchronization.
unsafe impl<T: ShmInit + Send> Send for ShmStorage<T> {}
unsafe impl<T: ShmInit + Send + Sync> Sync for ShmStorage<T> {}

impl<T: ShmInit + Send + Sync + 'static> ShmStorage<T> {
    /// The process-wide binding for `(T, name)`, attaching on first use.
    ///
    /// The first call creates or opens the region and waits for the
    /// construction handshake; later calls return the same `Arc`.
    pub fn instance(name: &str) -> ShmResult<Arc<Self>> {
        let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
        let key = (TypeId::of::<T>(), name.to_string());

        if let Some(existing) = map.get(&key) {
            return existing
                .clone()
                .downcast::<Self>()
                .map_err(|_| ShmError::memory("storage registry entry has the wrong type"));
        }

        let storage = Arc::new(Self::attach(name)?);
        map.insert(key, storage.clone());
        Ok(storage)
    }

    fn attach(name: &str) -> ShmResult<Self> {
        let region = ShmRegion::create_or_open(name, ShmBlock::<T>::mem_usage())?;
        let mem = NonNull::new(region.as_mut_ptr())
            .ok_or_else(|| ShmError::memory("region mapped at null"))?;

        // SAFETY: the region is exactly mem_usage() bytes, page-aligned,
        // zero-filled at creation, and stays mapped for as long as `region`
        // (stored alongside the pointer) lives.
        let block = unsafe {
            if region.is_owner() {
                ShmBlock::create(mem, DEFAULT_TIMEOUT)?
            } else {
                ShmBlock::open(mem, DEFAULT_TIMEOUT)?
            }
        };

        log::debug!(
            "storage '{}' bound ({} bytes, owner: {})",
            name,
            region.size(),
            region.is_owner()
        );
        Ok(Self { region, block })
    }

    /// The embedded container.
    pub fn get(&self) -> &T {
        // SAFETY: block points into the mapping owned by self and was
        // published READY during attach.
        unsafe { self.block.as_ref() }.get()
    }

    /// The name this storage is bound to.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Whether this process created the region.
    pub fn is_owner(&self) -> bool {
        self.region.is_owner()
    }

    /// Drop this process's binding and remove the OS-level name, so the
    /// next instantiation starts from a fresh region.
    ///
    /// Mappings still held (here or in other processes) stay valid until
    /// they are dropped; the embedded container is never destructed, which
    /// is sound because everything stored in it is trivially copyable.
    pub fn destroy(name: &str) -> ShmResult<()> {
        let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
        map.remove(&(TypeId::of::<T>(), name.to_string()));
        drop(map);
        ShmRegion::unlink(name)
    }
}

impl<T: ShmInit + Send + Sync + 'static> Deref for ShmStorage<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}
