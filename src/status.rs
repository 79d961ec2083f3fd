//! Plain-value status codes shared by every container operation.
//!
//! A `Status` is a value, not an error channel: call sites branch on it
//! uniformly with [`Status::is_success`]. Codes travel across process
//! boundaries as raw `u32`s, so [`Status::from_code`] maps anything a newer
//! peer might send into [`Status::Unknown`] instead of failing.

use std::fmt;

/// Result code for container operations.
///
/// Only a subset is produced by this crate today; the remaining codes are
/// reserved so that supervisors and future versions share one taxonomy.
#[must_use]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Normal completion
    #[default]
    Success = 0,
    /// A visitor panicked and was translated
    Error,
    /// Reserved for cross-process visitor failure reporting
    Exception,
    /// Key absent, or a read-only probe reached an empty slot
    NotFound,
    /// Reserved; the table merges create-or-update
    AlreadyExists,
    /// A backoff deadline was exceeded while waiting on a state transition
    Timeout,
    /// Reserved for callers of a block before publication
    NotReady,
    /// Reserved; the containers never allocate
    OutOfMemory,
    /// Bad bucket index passed to a direct operation
    InvalidArgument,
    /// Reserved for unsupported operations
    NotImplemented,
    /// Reserved for external supervisors
    Crash,
    /// Catch-all for codes received from a future version
    Unknown,
}

impl Status {
    /// Decode a raw wire code, mapping out-of-range values to `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Status::Success,
            1 => Status::Error,
            2 => Status::Exception,
            3 => Status::NotFound,
            4 => Status::AlreadyExists,
            5 => Status::Timeout,
            6 => Status::NotReady,
            7 => Status::OutOfMemory,
            8 => Status::InvalidArgument,
            9 => Status::NotImplemented,
            10 => Status::Crash,
            _ => Status::Unknown,
        }
    }

    /// Raw wire code.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    #[inline]
    pub fn is_failed(self) -> bool {
        self != Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::Exception => "EXCEPTION",
            Status::NotFound => "NOT_FOUND",
            Status::AlreadyExists => "ALREADY_EXISTS",
            Status::Timeout => "TIMEOUT",
            Status::NotReady => "NOT_READY",
            Status::OutOfMemory => "OUT_OF_MEMORY",
            Status::InvalidArgument => "INVALID_ARGUMENT",
            Status::NotImplemented => "NOT_IMPLEMENTED",
            Status::Crash => "CRASH",
            Status::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Conversion for visitor return values.
///
/// Visitors may return `()` (always treated as success) or an explicit
/// [`Status`]; the table's apply path normalizes both through this trait.
pub trait IntoStatus {
    fn into_status(self) -> Status;
}

impl IntoStatus for () {
    #[inline]
    fn into_status(self) -> Status {
        Status::Success
    }
}

impl IntoStatus for Status {
    #[inline]
    fn into_status(self) -> Status {
        self
    }
}
