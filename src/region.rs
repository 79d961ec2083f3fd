//! Named POSIX shared-memory regions.
//!
//! A region is a byte range that is (a) shared across processes and (b)
//! identical byte-for-byte through every mapping. The first caller to a
//! name wins an exclusive create and becomes the owner responsible for
//! sizing the region; everyone else attaches to the existing object.
//! Dropping a region only unmaps it — removing the OS-level name is the
//! separate, explicit [`ShmRegion::unlink`].

#[cfg(not(unix))]
compile_error!("POSIX shared memory is required");

use std::ffi::CString;
use std::fs::File;
use std::os::unix::io::FromRawFd;
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};

use crate::backoff::Backoff;
use crate::error::{ShmError, ShmResult};

/// How long an attacher waits for the owner to grow a fresh region to its
/// final size before mapping it.
const SIZE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A mapped POSIX shared-memory object.
pub struct ShmRegion {
    mmap: MmapMut,
    _file: File,
    name: String,
    size: usize,
    owner: bool,
}

// SAFETY: the mapping has no thread-local state; concurrent access is
// governed by the atomics of whatever container lives inside it.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

/// Normalize to the POSIX convention: exactly one leading slash.
fn shm_name(name: &str) -> ShmResult<CString> {
    let normalized = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    CString::new(normalized)
        .map_err(|_| ShmError::invalid_input(format!("region name '{name}' contains a NUL byte")))
}

impl ShmRegion {
    /// Create the named region at exactly `size` bytes, or attach to an
    /// existing one.
    ///
    /// The exclusive-create winner truncates the object to `size` (POSIX
    /// zero-fills the fresh bytes). An attacher waits, bounded, for the
    /// object to reach `size` before mapping, so it can never fault on a
    /// partially-created region.
    pub fn create_or_open(name: &str, size: usize) -> ShmResult<Self> {
        if size == 0 {
            return Err(ShmError::invalid_input("region size must be non-zero"));
        }
        let c_name = shm_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string; flags are valid
        // POSIX constants.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o666,
            )
        };

        let (fd, owner) = if fd >= 0 {
            (fd, true)
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(ShmError::Memory(format!(
                    "shm_open '{name}' failed: {err}"
                )));
            }
            // SAFETY: as above.
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666) };
            if fd < 0 {
                return Err(ShmError::Memory(format!(
                    "shm_open existing '{name}' failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            (fd, false)
        };

        // SAFETY: fd is a valid descriptor freshly returned by shm_open;
        // File takes ownership and closes it on drop.
        let file = unsafe { File::from_raw_fd(fd) };

        if owner {
            // ftruncate zero-fills, so a fresh region satisfies the
            // zeroed-bytes contract of ShmInit.
            file.set_len(size as u64)?;
            log::info!("shm region '{name}' created ({size} bytes)");
        } else {
            Self::wait_for_size(&file, name, size)?;
            log::info!("shm region '{name}' attached ({size} bytes)");
        }

        // SAFETY: the object is at least `size` bytes (set_len above or the
        // size wait); mapping len matches.
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };

        Ok(Self {
            mmap,
            _file: file,
            name: name.to_string(),
            size,
            owner,
        })
    }

    /// The creating process may still be between `shm_open` and
    /// `ftruncate`; mapping before the object reaches its final size would
    /// fault on first touch.
    fn wait_for_size(file: &File, name: &str, size: usize) -> ShmResult<()> {
        let mut backoff = Backoff::new(SIZE_WAIT_TIMEOUT);
        loop {
            if file.metadata()?.len() >= size as u64 {
                return Ok(());
            }
            if !backoff.step() {
                return Err(ShmError::timeout(format!(
                    "region '{name}' never reached {size} bytes; its creator may have died"
                )));
            }
        }
    }

    /// Remove the name from the system so the next create starts fresh.
    /// Existing mappings stay valid until their holders drop.
    pub fn unlink(name: &str) -> ShmResult<()> {
        let c_name = shm_name(name)?;
        // SAFETY: c_name is a valid NUL-terminated string.
        let rc = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Ok(()); // already gone
            }
            return Err(ShmError::Memory(format!(
                "shm_unlink '{name}' failed: {err}"
            )));
        }
        log::info!("shm region '{name}' unlinked");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this handle won the exclusive create.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Raw mutable view of the mapping. The mapping is MAP_SHARED and
    /// writable; all concurrent mutation must go through the atomics of the
    /// container constructed inside it.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }
}
