//! The native [`SecureAllocator`]: page-guarded, canary-checked mappings from `memcall`.
//!
//! Every region is laid out as
//!
//! ```text
//! | preguard page | canary ... data | postguard page |
//!                 |<---- inner --->|
//! ```
//!
//! - the guard pages are `NoAccess`, so running off either end of the data
//!   faults instead of reading or writing a neighbour;
//! - `inner` is the requested size rounded up to whole pages, and the data sits
//!   at its end so an overflow hits the postguard immediately;
//! - the slack in front of the data is filled with random canary bytes that are
//!   checked when the region is released.

use crate::allocator::{RegionBytes, SecureAllocator};
use crate::error::{Result, SecureBufferError};
use crate::runtime;
use log::{error, trace, warn};
use memcall::MemoryProtection;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Allocator backed by `mmap`, `mprotect` and `mlock`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardedAllocator;

impl GuardedAllocator {
    /// Creates the allocator. The process-wide runtime is initialized lazily.
    pub fn new() -> Self {
        Self
    }
}

/// A mapping owned by one buffer.
///
/// Dropping a region that was never released still wipes, unlocks and unmaps it.
pub struct GuardedRegion {
    memory: &'static mut [u8],
    page: usize,
    inner_len: usize,
    data_len: usize,
    canary: Vec<u8>,
}

impl GuardedRegion {
    fn data_offset(&self) -> usize {
        self.page + self.inner_len - self.data_len
    }

    fn inner_mut(&mut self) -> &mut [u8] {
        let page = self.page;
        &mut self.memory[page..page + self.inner_len]
    }

    fn canary_bytes(&self) -> &[u8] {
        &self.memory[self.page..self.data_offset()]
    }

    fn verify_canary(&self) -> Result<()> {
        if bool::from(self.canary_bytes().ct_eq(&self.canary)) {
            Ok(())
        } else {
            Err(SecureBufferError::MemoryCorruption(format!(
                "canary in front of {:p} was modified",
                self.as_bytes().as_ptr()
            )))
        }
    }

    /// Total bytes mapped, guard pages included.
    pub fn mapping_len(&self) -> usize {
        self.memory.len()
    }

    /// Bytes of random canary between the preguard and the data.
    pub fn canary_len(&self) -> usize {
        self.canary.len()
    }

    #[cfg(test)]
    pub(crate) fn mapping_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_canary(&mut self) {
        let page = self.page;
        if let Some(byte) = self.memory.get_mut(page) {
            *byte = !*byte;
        }
    }
}

impl RegionBytes for GuardedRegion {
    fn as_bytes(&self) -> &[u8] {
        let start = self.data_offset();
        &self.memory[start..start + self.data_len]
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let start = self.data_offset();
        &mut self.memory[start..start + self.data_len]
    }
}

impl std::fmt::Debug for GuardedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedRegion")
            .field("data_len", &self.data_len)
            .field("inner_len", &self.inner_len)
            .field("mapping_len", &self.memory.len())
            .finish_non_exhaustive()
    }
}

impl Drop for GuardedRegion {
    fn drop(&mut self) {
        let memory = std::mem::take(&mut self.memory);
        if memory.is_empty() {
            return;
        }

        trace!("Reclaiming unreleased region at {:p}", memory.as_ptr());

        #[cfg(not(feature = "no-mlock"))]
        {
            let page = self.page;
            if let Err(e) = memcall::unlock(&mut memory[page..page + self.inner_len]) {
                warn!("Failed to unlock dropped region: {}", e);
            }
        }

        if let Err(e) = memcall::free(memory) {
            error!("Failed to unmap dropped region: {}", e);
        }
    }
}

fn layout(size: usize, page: usize) -> Option<(usize, usize)> {
    let inner = size.checked_add(page - 1)? / page * page;
    let total = inner.checked_add(2 * page)?;
    Some((inner, total))
}

impl SecureAllocator for GuardedAllocator {
    type Region = GuardedRegion;

    fn init(&self) -> Result<()> {
        runtime::init()
    }

    fn allocate(&self, size: usize) -> Result<GuardedRegion> {
        let page = memcall::page_size();
        let (inner_len, total) = layout(size, page).ok_or_else(|| {
            SecureBufferError::Allocation(format!("{} bytes overflows the address space", size))
        })?;

        let memory = memcall::alloc(total).map_err(|e| SecureBufferError::Allocation(e.to_string()))?;

        // From here on, an early return drops the region and unmaps it.
        let mut region = GuardedRegion {
            memory,
            page,
            inner_len,
            data_len: size,
            canary: vec![0u8; inner_len - size],
        };

        getrandom::getrandom(&mut region.canary)
            .map_err(|e| SecureBufferError::Allocation(format!("canary generation failed: {}", e)))?;
        let start = page;
        let end = region.data_offset();
        region.memory[start..end].copy_from_slice(&region.canary);

        memcall::protect(&mut region.memory[..page], MemoryProtection::NoAccess)
            .map_err(|e| SecureBufferError::Allocation(e.to_string()))?;
        memcall::protect(&mut region.memory[page + inner_len..], MemoryProtection::NoAccess)
            .map_err(|e| SecureBufferError::Allocation(e.to_string()))?;

        trace!("Allocated guarded region of {} bytes ({} mapped)", size, total);
        Ok(region)
    }

    #[cfg(not(feature = "no-mlock"))]
    fn pin(&self, region: &mut GuardedRegion) -> Result<()> {
        memcall::lock(region.inner_mut()).map_err(|e| SecureBufferError::Pin(e.to_string()))
    }

    #[cfg(feature = "no-mlock")]
    fn pin(&self, _region: &mut GuardedRegion) -> Result<()> {
        Ok(())
    }

    fn wipe(&self, region: &mut GuardedRegion) {
        region.as_bytes_mut().zeroize();
    }

    #[cfg(not(feature = "no-mlock"))]
    fn unpin(&self, region: &mut GuardedRegion) -> Result<()> {
        memcall::unlock(region.inner_mut()).map_err(|e| SecureBufferError::Unpin(e.to_string()))
    }

    #[cfg(feature = "no-mlock")]
    fn unpin(&self, _region: &mut GuardedRegion) -> Result<()> {
        Ok(())
    }

    fn release(&self, mut region: GuardedRegion) -> Result<()> {
        let canary = region.verify_canary();
        region.canary.zeroize();

        let memory = std::mem::take(&mut region.memory);
        // free() restores ReadWrite on the guard pages and wipes the whole mapping.
        memcall::free(memory).map_err(|e| SecureBufferError::Release(e.to_string()))?;

        canary
    }
}
