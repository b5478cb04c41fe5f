use crate::error::MemcallError;
use crate::types::{MemoryProtection, RlimitResource};
use log::{trace, warn};
use once_cell::sync::Lazy;
use std::ptr;

static PAGE_SIZE: Lazy<usize> = Lazy::new(page_size::get);

#[inline]
fn as_mut_ptr(memory: &mut [u8]) -> *mut libc::c_void {
    memory.as_mut_ptr().cast::<libc::c_void>()
}

#[inline]
fn as_len(memory: &[u8]) -> libc::size_t {
    memory.len() as libc::size_t
}

pub fn alloc(size: usize) -> Result<&'static mut [u8], MemcallError> {
    if size == 0 {
        return Err(MemcallError::InvalidArgument(
            "<memcall> cannot allocate a zero-length region".to_string(),
        ));
    }

    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(MemcallError::last_os_error(format!(
            "<memcall> could not allocate {} bytes",
            size
        )));
    }

    let memory = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), size) };

    // Wipe it in case there is some remnant data.
    memory.fill(0);

    trace!("<memcall> mapped {} bytes at {:p}", size, memory.as_ptr());
    Ok(memory)
}

pub fn free(memory: &mut [u8]) -> Result<(), MemcallError> {
    if memory.is_empty() {
        return Ok(());
    }

    protect(memory, MemoryProtection::ReadWrite)?;
    memory.fill(0);

    let result = unsafe { libc::munmap(as_mut_ptr(memory), as_len(memory)) };
    if result != 0 {
        return Err(MemcallError::last_os_error(format!(
            "<memcall> could not deallocate {:p}",
            memory.as_ptr()
        )));
    }

    trace!("<memcall> unmapped {} bytes at {:p}", memory.len(), memory.as_ptr());
    Ok(())
}

pub fn protect(memory: &mut [u8], protection: MemoryProtection) -> Result<(), MemcallError> {
    if memory.is_empty() {
        return Ok(());
    }

    let result = unsafe { libc::mprotect(as_mut_ptr(memory), as_len(memory), protection.as_prot()) };
    if result != 0 {
        return Err(MemcallError::last_os_error(format!(
            "<memcall> could not set {:?} on {:p}",
            protection,
            memory.as_ptr()
        )));
    }

    Ok(())
}

pub fn lock(memory: &mut [u8]) -> Result<(), MemcallError> {
    if memory.is_empty() {
        return Ok(());
    }

    // Keep the region out of core dumps as well as out of swap.
    #[cfg(target_os = "linux")]
    {
        let advised = unsafe { libc::madvise(as_mut_ptr(memory), as_len(memory), libc::MADV_DONTDUMP) };
        if advised != 0 {
            warn!(
                "<memcall> madvise(MADV_DONTDUMP) failed on {:p}: {}",
                memory.as_ptr(),
                std::io::Error::last_os_error()
            );
        }
    }

    let result = unsafe { libc::mlock(as_mut_ptr(memory), as_len(memory)) };
    if result != 0 {
        return Err(MemcallError::last_os_error(format!(
            "<memcall> could not acquire lock on {:p}, limit reached?",
            memory.as_ptr()
        )));
    }

    Ok(())
}

pub fn unlock(memory: &mut [u8]) -> Result<(), MemcallError> {
    if memory.is_empty() {
        return Ok(());
    }

    let result = unsafe { libc::munlock(as_mut_ptr(memory), as_len(memory)) };
    if result != 0 {
        return Err(MemcallError::last_os_error(format!(
            "<memcall> could not free lock on {:p}",
            memory.as_ptr()
        )));
    }

    Ok(())
}

pub fn page_size() -> usize {
    *PAGE_SIZE
}

pub fn set_limit(resource: RlimitResource, value: u64) -> Result<(), MemcallError> {
    let rlimit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };

    let result = unsafe {
        match resource {
            RlimitResource::Core => libc::setrlimit(libc::RLIMIT_CORE, &rlimit),
            RlimitResource::MemLock => libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit),
        }
    };

    if result != 0 {
        return Err(MemcallError::last_os_error(format!(
            "<memcall> could not set {:?} rlimit to {}",
            resource, value
        )));
    }

    Ok(())
}

pub fn disable_core_dumps() -> Result<(), MemcallError> {
    set_limit(RlimitResource::Core, 0)
}
