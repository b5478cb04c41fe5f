//! The secure-allocation capability a [`SecureBuffer`](crate::SecureBuffer) is built on.
//!
//! A `SecureAllocator` hands out opaque regions and knows how to pin, wipe,
//! unpin and release them. The buffer never touches the platform directly,
//! so its lifecycle can be exercised against
//! [`FakeAllocator`](crate::test_utils::FakeAllocator) without locking real
//! memory.

use crate::error::Result;
use std::sync::Arc;

/// Byte access to the usable part of an allocated region.
pub trait RegionBytes {
    /// The region's bytes, exactly as many as were requested from `allocate`.
    fn as_bytes(&self) -> &[u8];

    /// Mutable access to the region's bytes.
    fn as_bytes_mut(&mut self) -> &mut [u8];
}

/// A facility that allocates guarded, swap-pinnable memory regions.
///
/// Implementations must uphold:
/// - `init` succeeds before the first `allocate`, and repeated calls are cheap;
/// - `wipe` leaves every byte of the region zero and cannot fail;
/// - `release` consumes the region, so each handle is released at most once.
pub trait SecureAllocator: Send + Sync {
    /// Opaque handle to an allocated region. Owned by exactly one buffer.
    type Region: RegionBytes + Send;

    /// Performs (or confirms) the facility's one-time process setup.
    fn init(&self) -> Result<()>;

    /// Reserves a region of exactly `size` usable bytes.
    fn allocate(&self, size: usize) -> Result<Self::Region>;

    /// Protects the region against being swapped to disk.
    fn pin(&self, region: &mut Self::Region) -> Result<()>;

    /// Overwrites every byte of the region with zero.
    fn wipe(&self, region: &mut Self::Region);

    /// Reverses [`pin`](Self::pin).
    fn unpin(&self, region: &mut Self::Region) -> Result<()>;

    /// Returns the region to the system.
    fn release(&self, region: Self::Region) -> Result<()>;
}

impl<A: SecureAllocator + ?Sized> SecureAllocator for Arc<A> {
    type Region = A::Region;

    fn init(&self) -> Result<()> {
        (**self).init()
    }

    fn allocate(&self, size: usize) -> Result<Self::Region> {
        (**self).allocate(size)
    }

    fn pin(&self, region: &mut Self::Region) -> Result<()> {
        (**self).pin(region)
    }

    fn wipe(&self, region: &mut Self::Region) {
        (**self).wipe(region)
    }

    fn unpin(&self, region: &mut Self::Region) -> Result<()> {
        (**self).unpin(region)
    }

    fn release(&self, region: Self::Region) -> Result<()> {
        (**self).release(region)
    }
}
