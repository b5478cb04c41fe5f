//! # memcall
//!
//! Thin wrapper for the memory-related system calls a guarded secure buffer
//! is built from:
//! - page-aligned anonymous allocation and deallocation (`mmap`/`munmap`)
//! - memory protection changes for guard pages (`mprotect`)
//! - memory locking to prevent swapping to disk (`mlock`/`munlock`)
//! - process limits such as disabling core dumps (`setrlimit`)
//!
//! Only Unix targets are supported.

#[cfg(not(unix))]
compile_error!("memcall only supports unix targets");

mod error;
mod types;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

pub use error::MemcallError;
pub use types::{MemoryProtection, RlimitResource};

/// Allocates a new zeroed, read-write, page-aligned memory region of `size` bytes.
///
/// The region stays mapped until it is passed to [`free`].
pub fn alloc(size: usize) -> Result<&'static mut [u8], MemcallError> {
    platform::alloc(size)
}

/// Wipes and frees a memory region previously allocated with [`alloc`].
///
/// The whole region is made read-write first, so guard pages do not need to be
/// restored by the caller.
pub fn free(memory: &mut [u8]) -> Result<(), MemcallError> {
    platform::free(memory)
}

/// Changes the protection of a page-aligned memory region.
pub fn protect(memory: &mut [u8], protection: MemoryProtection) -> Result<(), MemcallError> {
    platform::protect(memory, protection)
}

/// Locks a memory region to prevent it from being swapped to disk.
pub fn lock(memory: &mut [u8]) -> Result<(), MemcallError> {
    platform::lock(memory)
}

/// Unlocks a memory region previously locked with [`lock`].
pub fn unlock(memory: &mut [u8]) -> Result<(), MemcallError> {
    platform::unlock(memory)
}

/// Returns the system's page size.
pub fn page_size() -> usize {
    platform::page_size()
}

/// Disables creation of core dump files for the current process.
pub fn disable_core_dumps() -> Result<(), MemcallError> {
    platform::disable_core_dumps()
}

/// Sets both the soft and hard limit of a resource for the current process.
pub fn set_limit(resource: RlimitResource, value: u64) -> Result<(), MemcallError> {
    platform::set_limit(resource, value)
}
